pub mod collector;
pub mod percentiles;
pub mod sampler;

pub use collector::{Stats, StatsSummary};
pub use percentiles::{error_margin, percentile, PERCENTILE_LEVELS};
pub use sampler::{get_sampler, AllSampler, Sampler, UniformReservoir, DEFAULT_RESERVOIR_SIZE};
