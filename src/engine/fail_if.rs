//! Regression gate evaluated against finished results.
//!
//! An expression is one or more comparisons joined by `and` / `or`
//! (`and` binds tighter, no parentheses):
//!
//! ```text
//! runtime_stats.mean > 100 or runtime_stats.percentile.99_9 >= 250
//! {statement} == 'select name' and concurrency > 1
//! ```
//!
//! Operands are numbers, quoted strings, or dotted paths into the result's
//! JSON object (`statement`, `runtime_stats`, `concurrency`, `bulk_size`,
//! `meta`, ...). A path may be wrapped in braces.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use super::result::BenchResult;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    lhs: Operand,
    op: Op,
    rhs: Operand,
}

/// A parsed fail-if expression: OR of ANDs of comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct FailIf {
    source: String,
    any_of: Vec<Vec<Comparison>>,
}

impl FailIf {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut any_of = Vec::new();
        let mut all_of = Vec::new();
        let mut rest = tokens.as_slice();

        loop {
            let (cmp, tail) = parse_comparison(rest, source)?;
            all_of.push(cmp);
            rest = tail;
            match rest.first() {
                None => break,
                Some(Token::Word(w)) if w == "and" => rest = &rest[1..],
                Some(Token::Word(w)) if w == "or" => {
                    any_of.push(std::mem::take(&mut all_of));
                    rest = &rest[1..];
                }
                Some(other) => {
                    return Err(invalid(source, &format!("unexpected {other}")));
                }
            }
        }
        any_of.push(all_of);

        Ok(Self {
            source: source.to_owned(),
            any_of,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression holds for `result`.
    pub fn evaluate(&self, result: &BenchResult) -> Result<bool> {
        let doc = result.to_value()?;
        for all_of in &self.any_of {
            let mut holds = true;
            for cmp in all_of {
                if !cmp.evaluate(&doc)? {
                    holds = false;
                    break;
                }
            }
            if holds {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fails with [`Error::BenchmarkFailure`] when the expression holds.
    pub fn check(&self, result: &BenchResult) -> Result<()> {
        if self.evaluate(result)? {
            return Err(Error::BenchmarkFailure(self.source.clone()));
        }
        Ok(())
    }
}

impl Comparison {
    fn evaluate(&self, doc: &Value) -> Result<bool> {
        let lhs = resolve(&self.lhs, doc);
        let rhs = resolve(&self.rhs, doc);
        let ordering = match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            // Missing fields and mixed types only compare for (in)equality.
            _ => match self.op {
                Op::Eq => return Ok(lhs == rhs),
                Op::Ne => return Ok(lhs != rhs),
                _ => {
                    return Err(Error::config(format!(
                        "cannot order {lhs} and {rhs} in fail-if expression"
                    )))
                }
            },
        };
        let Some(ordering) = ordering else {
            return Ok(self.op == Op::Ne);
        };
        Ok(match self.op {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
        })
    }
}

fn resolve(operand: &Operand, doc: &Value) -> Value {
    match operand {
        Operand::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Operand::Text(s) => Value::String(s.clone()),
        Operand::Path(path) => path
            .iter()
            .try_fold(doc, |node, key| node.get(key.as_str()))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

// ─── Tokenizer / parser ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Text(String),
    Op(Op),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "`{w}`"),
            Token::Text(t) => write!(f, "'{t}'"),
            Token::Op(op) => write!(f, "operator {op:?}"),
        }
    }
}

fn invalid(source: &str, reason: &str) -> Error {
    Error::config(format!("invalid fail-if expression {source:?}: {reason}"))
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                        None => return Err(invalid(source, "unterminated string")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if_eq(&'=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', true) => Op::Eq,
                    ('!', true) => Op::Ne,
                    ('<', true) => Op::Le,
                    ('<', false) => Op::Lt,
                    ('>', true) => Op::Ge,
                    ('>', false) => Op::Gt,
                    _ => return Err(invalid(source, &format!("unknown operator `{c}`"))),
                };
                tokens.push(Token::Op(op));
            }
            '{' => {
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(invalid(source, "unterminated `{`")),
                    }
                }
                tokens.push(Token::Word(word.trim().to_owned()));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' => {
                let mut word = String::new();
                while let Some(ch) =
                    chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '.' || *ch == '-')
                {
                    word.push(ch);
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(invalid(source, &format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

fn parse_operand(token: Option<&Token>, source: &str) -> Result<Operand> {
    match token {
        Some(Token::Text(t)) => Ok(Operand::Text(t.clone())),
        Some(Token::Word(w)) => {
            // `inf` and `nan` parse as floats but are field names here.
            let numeric = w.starts_with(|c: char| c.is_ascii_digit() || c == '-');
            if numeric {
                return w
                    .parse::<f64>()
                    .map(Operand::Number)
                    .map_err(|_| invalid(source, &format!("bad number `{w}`")));
            }
            if w.is_empty() || w.split('.').any(str::is_empty) {
                return Err(invalid(source, &format!("bad field path `{w}`")));
            }
            Ok(Operand::Path(w.split('.').map(str::to_owned).collect()))
        }
        Some(other) => Err(invalid(source, &format!("expected a value, got {other}"))),
        None => Err(invalid(source, "expected a value")),
    }
}

fn parse_comparison<'t>(tokens: &'t [Token], source: &str) -> Result<(Comparison, &'t [Token])> {
    let lhs = parse_operand(tokens.first(), source)?;
    let op = match tokens.get(1) {
        Some(Token::Op(op)) => *op,
        Some(other) => return Err(invalid(source, &format!("expected an operator, got {other}"))),
        None => return Err(invalid(source, "expected an operator")),
    };
    let rhs = parse_operand(tokens.get(2), source)?;
    Ok((Comparison { lhs, op, rhs }, &tokens[3..]))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::VersionInfo;
    use crate::engine::TimedStats;
    use crate::metrics::Stats;

    fn result(values: &[f64]) -> BenchResult {
        let stats = Stats::default();
        for v in values {
            stats.measure(*v);
        }
        let timed = TimedStats {
            started: 1,
            ended: 2,
            stats: Arc::new(stats),
        };
        BenchResult::new(VersionInfo::default(), "select name", None, &timed, 1, None)
    }

    #[test]
    fn string_equality_on_statement() {
        let gate = FailIf::parse("{statement} == 'select name'").unwrap();
        assert!(matches!(
            gate.check(&result(&[1.0])),
            Err(Error::BenchmarkFailure(_))
        ));
    }

    #[test]
    fn numeric_thresholds() {
        let r = result(&[10.0, 20.0, 30.0]);
        assert!(FailIf::parse("runtime_stats.mean > 15").unwrap().evaluate(&r).unwrap());
        assert!(!FailIf::parse("runtime_stats.max < 30").unwrap().evaluate(&r).unwrap());
        assert!(FailIf::parse("runtime_stats.max <= 30").unwrap().evaluate(&r).unwrap());
        assert!(FailIf::parse("runtime_stats.percentile.99_9 >= 30")
            .unwrap()
            .evaluate(&r)
            .unwrap());
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let r = result(&[10.0, 20.0]);
        let gate = FailIf::parse("concurrency > 5 and runtime_stats.n == 2 or statement != 'x'").unwrap();
        assert!(gate.evaluate(&r).unwrap());
        let gate = FailIf::parse("concurrency > 5 and runtime_stats.n == 2 or statement == 'x'").unwrap();
        assert!(!gate.evaluate(&r).unwrap());
    }

    #[test]
    fn missing_fields_are_null() {
        let r = result(&[]);
        assert!(FailIf::parse("runtime_stats.mean == null.x").unwrap().evaluate(&r).unwrap());
        assert!(FailIf::parse("runtime_stats.mean > 1").unwrap().evaluate(&r).is_err());
    }

    #[test]
    fn passing_gate_is_ok() {
        let gate = FailIf::parse("runtime_stats.n > 100").unwrap();
        assert!(gate.check(&result(&[1.0, 2.0])).is_ok());
    }

    #[test]
    fn float_words_are_field_names() {
        for word in ["inf", "nan", "infinity", "NaN"] {
            let gate = FailIf::parse(&format!("{word} == 1")).unwrap();
            assert_eq!(gate.any_of[0][0].lhs, Operand::Path(vec![word.to_owned()]));
        }
        let gate = FailIf::parse("concurrency > -1 and runtime_stats.n < 1e3").unwrap();
        assert_eq!(gate.any_of[0][0].rhs, Operand::Number(-1.0));
        assert_eq!(gate.any_of[0][1].rhs, Operand::Number(1000.0));
        assert!(gate.evaluate(&result(&[1.0])).unwrap());
    }

    #[test]
    fn rejects_malformed_expressions() {
        for src in ["", "a ==", "== 1", "a = 1", "a > 1 and", "'open", "a > 1 b", "a..b > 1", "import os", "a > 1x"] {
            assert!(
                matches!(FailIf::parse(src), Err(Error::Configuration(_))),
                "{src:?}"
            );
        }
    }
}
