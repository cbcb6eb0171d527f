use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::config::SampleMode;
use crate::error::Result;

// ─── Configuration ───────────────────────────────────────────────

/// Reservoir size used when the sample mode does not name one.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1000;

// ─── Reservoir (Algorithm R) ─────────────────────────────────────

/// Fixed-capacity uniform sample of an unbounded stream.
///
/// Holds exactly `count` values until `count` reaches `size`, then never
/// more than `size`. Every value seen so far has the same `size / count`
/// chance of being in the reservoir.
#[derive(Debug)]
pub struct UniformReservoir {
    size: usize,
    count: u64,
    values: Vec<f64>,
    rng: StdRng,
}

impl UniformReservoir {
    pub fn new(size: usize) -> Self {
        Self::with_rng(size, StdRng::from_entropy())
    }

    /// Deterministic reservoir, handy for reproducible runs and tests.
    pub fn with_seed(size: usize, seed: u64) -> Self {
        Self::with_rng(size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(size: usize, rng: StdRng) -> Self {
        Self {
            size,
            count: 0,
            values: Vec::with_capacity(size.min(DEFAULT_RESERVOIR_SIZE * 16)),
            rng,
        }
    }

    pub fn add(&mut self, value: f64) {
        let count = self.count;
        if count < self.size as u64 {
            self.values.push(value);
        } else {
            let k = self.rng.gen_range(0..=count);
            if k < self.size as u64 {
                self.values[k as usize] = value;
            }
        }
        // Keep counting after the reservoir is full so later values get a
        // shrinking inclusion probability.
        self.count = count + 1;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

// ─── All ─────────────────────────────────────────────────────────

/// Keeps every sample, in arrival order.
#[derive(Debug, Default)]
pub struct AllSampler {
    values: Vec<f64>,
}

impl AllSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn count(&self) -> u64 {
        self.values.len() as u64
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

// ─── Sampler ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Sampler {
    All(AllSampler),
    Reservoir(UniformReservoir),
}

impl Sampler {
    pub fn from_mode(mode: SampleMode) -> Self {
        match mode {
            SampleMode::All => Self::All(AllSampler::new()),
            SampleMode::Reservoir(size) => Self::Reservoir(UniformReservoir::new(size)),
        }
    }

    pub fn add(&mut self, value: f64) {
        match self {
            Self::All(s) => s.add(value),
            Self::Reservoir(r) => r.add(value),
        }
    }

    /// Number of values offered so far (not the number retained).
    pub fn count(&self) -> u64 {
        match self {
            Self::All(s) => s.count(),
            Self::Reservoir(r) => r.count(),
        }
    }

    pub fn values(&self) -> &[f64] {
        match self {
            Self::All(s) => s.values(),
            Self::Reservoir(r) => r.values(),
        }
    }

    /// Whether the retained values are the complete population.
    pub fn keeps_all(&self) -> bool {
        matches!(self, Self::All(_))
    }
}

/// Builds a sampler from a mode string: `all`, `reservoir` or
/// `reservoir:<N>`.
pub fn get_sampler(mode: &str) -> Result<Sampler> {
    Ok(Sampler::from_mode(mode.parse()?))
}
