//! Per-group accumulators and their merge rules.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::types::{scalar_cmp, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Count,
    Mean,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggFunc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggFunc::Sum),
            "count" => Ok(AggFunc::Count),
            "mean" | "avg" => Ok(AggFunc::Mean),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            other => Err(Error::Config(format!(
                "unsupported aggregation function '{other}' (expected sum, count, mean, min, max)"
            ))),
        }
    }
}

/// Running sum: exact while every input is integral, float afterwards.
///
/// The integer sum is carried as `i128` so partial sums never overflow on
/// `i64` inputs; the result only becomes a float in `finalize` when it does
/// not fit an `i64`. That keeps the output type independent of how the rows
/// were grouped into batches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SumState {
    Int(i128),
    Float(f64),
}

impl SumState {
    fn add_int(&mut self, v: i128) {
        *self = match *self {
            SumState::Int(a) => match a.checked_add(v) {
                Some(s) => SumState::Int(s),
                None => SumState::Float(a as f64 + v as f64),
            },
            SumState::Float(a) => SumState::Float(a + v as f64),
        };
    }

    fn add_float(&mut self, v: f64) {
        *self = SumState::Float(self.as_f64() + v);
    }

    fn add(&mut self, v: &Scalar) -> bool {
        if let Some(i) = v.as_i64() {
            self.add_int(i as i128);
        } else if let Some(f) = v.as_f64() {
            self.add_float(f);
        } else {
            return false;
        }
        true
    }

    fn merge(&mut self, other: SumState) {
        match other {
            SumState::Int(i) => self.add_int(i),
            SumState::Float(f) => self.add_float(f),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            SumState::Int(i) => i as f64,
            SumState::Float(f) => f,
        }
    }

    fn to_scalar(self) -> Scalar {
        match self {
            SumState::Int(i) => match i64::try_from(i) {
                Ok(v) => Scalar::I64(v),
                Err(_) => Scalar::F64(i as f64),
            },
            SumState::Float(f) => Scalar::F64(f),
        }
    }
}

/// One accumulator value. The variant fixes the merge rule.
///
/// `Mean` is carried as a `(sum, count)` pair and divided only in
/// `finalize`; two partial means are never averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Sum(SumState),
    Count(u64),
    Mean { sum: SumState, count: u64 },
    Min(Option<Scalar>),
    Max(Option<Scalar>),
}

impl Accumulator {
    pub fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Sum => Accumulator::Sum(SumState::Int(0)),
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Mean => Accumulator::Mean {
                sum: SumState::Int(0),
                count: 0,
            },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
        }
    }

    pub fn kind(&self) -> AggFunc {
        match self {
            Accumulator::Sum(_) => AggFunc::Sum,
            Accumulator::Count(_) => AggFunc::Count,
            Accumulator::Mean { .. } => AggFunc::Mean,
            Accumulator::Min(_) => AggFunc::Min,
            Accumulator::Max(_) => AggFunc::Max,
        }
    }

    /// Fold one input value. Returns false when the value was skipped as
    /// missing or non-numeric.
    pub fn update(&mut self, v: &Scalar) -> bool {
        if v.is_missing() {
            return false;
        }
        match self {
            Accumulator::Sum(s) => s.add(v),
            Accumulator::Count(n) => {
                *n += 1;
                true
            }
            Accumulator::Mean { sum, count } => {
                let added = sum.add(v);
                if added {
                    *count += 1;
                }
                added
            }
            Accumulator::Min(cur) => {
                keep_extreme(cur, v, Ordering::Less);
                true
            }
            Accumulator::Max(cur) => {
                keep_extreme(cur, v, Ordering::Greater);
                true
            }
        }
    }

    /// Combine a partial result of the same kind into this one.
    pub fn merge(&mut self, other: Accumulator) -> Result<()> {
        match (self, other) {
            (Accumulator::Sum(a), Accumulator::Sum(b)) => a.merge(b),
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (
                Accumulator::Mean { sum, count },
                Accumulator::Mean {
                    sum: bsum,
                    count: bcount,
                },
            ) => {
                sum.merge(bsum);
                *count += bcount;
            }
            (Accumulator::Min(a), Accumulator::Min(Some(b))) => keep_extreme(a, &b, Ordering::Less),
            (Accumulator::Max(a), Accumulator::Max(Some(b))) => {
                keep_extreme(a, &b, Ordering::Greater)
            }
            (Accumulator::Min(_), Accumulator::Min(None))
            | (Accumulator::Max(_), Accumulator::Max(None)) => {}
            (a, b) => {
                return Err(Error::Invariant(format!(
                    "cannot merge {} accumulator into {}",
                    b.kind(),
                    a.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn finalize(&self) -> Scalar {
        match self {
            Accumulator::Sum(s) => s.to_scalar(),
            Accumulator::Count(n) => Scalar::I64(*n as i64),
            Accumulator::Mean { count: 0, .. } => Scalar::Null,
            Accumulator::Mean { sum, count } => Scalar::F64(sum.as_f64() / *count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone().unwrap_or(Scalar::Null),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        match self {
            Accumulator::Min(Some(v)) | Accumulator::Max(Some(v)) => 16 + v.estimated_bytes(),
            _ => 24,
        }
    }
}

fn keep_extreme(cur: &mut Option<Scalar>, v: &Scalar, want: Ordering) {
    let replace = match cur {
        None => true,
        Some(c) => scalar_cmp(v, c) == want,
    };
    if replace {
        *cur = Some(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(func: AggFunc, vals: &[Scalar]) -> Accumulator {
        let mut acc = Accumulator::new(func);
        for v in vals {
            acc.update(v);
        }
        acc
    }

    #[test]
    fn parse_functions() {
        assert_eq!("AVG".parse::<AggFunc>().unwrap(), AggFunc::Mean);
        assert_eq!(" max ".parse::<AggFunc>().unwrap(), AggFunc::Max);
        assert!(matches!("median".parse::<AggFunc>(), Err(Error::Config(_))));
    }

    #[test]
    fn mean_merges_sums_and_counts() {
        // Averaging the partial means (5.0 and 40.0) would give 22.5.
        let mut a = fold(AggFunc::Mean, &[Scalar::I64(10), Scalar::I64(0)]);
        let b = fold(AggFunc::Mean, &[Scalar::I64(40)]);
        a.merge(b).unwrap();
        assert_eq!(a.finalize(), Scalar::F64(50.0 / 3.0));
    }

    #[test]
    fn sum_promotes_on_float_and_overflow() {
        let mut a = fold(AggFunc::Sum, &[Scalar::I64(2), Scalar::I32(3)]);
        assert_eq!(a.finalize(), Scalar::I64(5));
        a.merge(fold(AggFunc::Sum, &[Scalar::F64(0.5)])).unwrap();
        assert_eq!(a.finalize(), Scalar::F64(5.5));

        let big = fold(AggFunc::Sum, &[Scalar::I64(i64::MAX), Scalar::I64(1)]);
        assert!(matches!(big.finalize(), Scalar::F64(_)));
    }

    #[test]
    fn sum_near_i64_limit_does_not_depend_on_split() {
        let whole = fold(AggFunc::Sum, &[Scalar::I64(i64::MAX), Scalar::I64(1), Scalar::I64(-1)]);
        let mut split = fold(AggFunc::Sum, &[Scalar::I64(i64::MAX)]);
        split.merge(fold(AggFunc::Sum, &[Scalar::I64(1), Scalar::I64(-1)])).unwrap();
        assert_eq!(whole.finalize(), Scalar::I64(i64::MAX));
        assert_eq!(split.finalize(), whole.finalize());
    }

    #[test]
    fn missing_values_are_skipped() {
        let vals = [Scalar::Null, Scalar::F64(f64::NAN), Scalar::I64(4), Scalar::Str("x".into())];
        assert_eq!(fold(AggFunc::Count, &vals).finalize(), Scalar::I64(2));
        assert_eq!(fold(AggFunc::Sum, &vals).finalize(), Scalar::I64(4));
        assert_eq!(fold(AggFunc::Mean, &[Scalar::Null]).finalize(), Scalar::Null);
        assert_eq!(fold(AggFunc::Sum, &[]).finalize(), Scalar::I64(0));
    }

    #[test]
    fn min_max_merge() {
        let mut lo = fold(AggFunc::Min, &[Scalar::I64(7), Scalar::I64(3)]);
        lo.merge(fold(AggFunc::Min, &[Scalar::I64(5)])).unwrap();
        lo.merge(Accumulator::new(AggFunc::Min)).unwrap();
        assert_eq!(lo.finalize(), Scalar::I64(3));

        let mut hi = fold(AggFunc::Max, &[Scalar::Str("apple".into())]);
        hi.merge(fold(AggFunc::Max, &[Scalar::Str("pear".into())])).unwrap();
        assert_eq!(hi.finalize(), Scalar::Str("pear".into()));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut a = Accumulator::new(AggFunc::Sum);
        let err = a.merge(Accumulator::new(AggFunc::Mean)).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }
}
