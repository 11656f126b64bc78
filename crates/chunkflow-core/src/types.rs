//! Lightweight logical value/column containers to avoid bringing Arrow into core.
//!
//! Sources convert their native representation (Arrow arrays, delimited text)
//! into these; operators only ever see `RowBatch`.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I32(_) => DataType::Int32,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F32(_) => DataType::Float32,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view of the value.
    ///
    /// Strings are parsed; `Null`, `NaN`, booleans, binary, and unparsable
    /// strings are treated as missing.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Scalar::I32(i) => *i as f64,
            Scalar::I64(i) => *i as f64,
            Scalar::F32(f) => *f as f64,
            Scalar::F64(f) => *f,
            Scalar::Str(s) => s.trim().parse::<f64>().ok()?,
            Scalar::Null | Scalar::Bool(_) | Scalar::Bin(_) => return None,
        };
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// Integral view of the value, used by exact sums.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I32(i) => Some(*i as i64),
            Scalar::I64(i) => Some(*i),
            Scalar::Str(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// True for values an aggregate should ignore (`Null` and float `NaN`).
    pub fn is_missing(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::F32(f) => f.is_nan(),
            Scalar::F64(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Approximate serialized size in bytes.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Scalar::Null => 1,
            Scalar::Bool(_) => 1,
            Scalar::I32(_) | Scalar::F32(_) => 4,
            Scalar::I64(_) | Scalar::F64(_) => 8,
            Scalar::Str(s) => s.len() + 4,
            Scalar::Bin(b) => b.len() + 4,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I32(i) => write!(f, "{i}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::F32(x) => write!(f, "{x}"),
            Scalar::F64(x) => write!(f, "{x}"),
            Scalar::Str(s) => write!(f, "{s}"),
            Scalar::Bin(b) => write!(f, "[binary {} bytes]", b.len()),
        }
    }
}

/// Minimal column representation: a name plus homogeneous values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered, named-column unit of streaming consumption.
///
/// All columns have equal length. Batches from the same source share a
/// column schema, though a projected batch may carry a subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Column>,
}

impl RowBatch {
    /// Build a batch, checking that all columns have the same length.
    pub fn try_new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let n = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != n) {
                return Err(Error::Schema(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.len(),
                    n
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Zero-row batch with the given column names.
    pub fn empty(names: &[String]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| Column::new(n.clone(), Vec::new()))
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Keep only `names`, in the requested order.
    pub fn project(&self, names: &[String]) -> Result<RowBatch> {
        let columns = names
            .iter()
            .map(|n| {
                self.column(n)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("column '{n}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RowBatch { columns })
    }

    /// Rows `[offset, offset + len)`, clamped to the batch.
    pub fn slice(&self, offset: usize, len: usize) -> RowBatch {
        let start = offset.min(self.num_rows());
        let end = offset.saturating_add(len).min(self.num_rows());
        RowBatch {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values[start..end].to_vec()))
                .collect(),
        }
    }

    /// Keep rows whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> Result<RowBatch> {
        if mask.len() != self.num_rows() {
            return Err(Error::Invariant(format!(
                "filter mask has {} entries for {} rows",
                mask.len(),
                self.num_rows()
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = c
                    .values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v.clone())
                    .collect();
                Column::new(c.name.clone(), values)
            })
            .collect();
        Ok(RowBatch { columns })
    }

    /// Vertically append batches that share the same column names.
    pub fn concat_rows(batches: &[RowBatch]) -> Result<RowBatch> {
        let Some(first) = batches.first() else {
            return Ok(RowBatch { columns: vec![] });
        };
        let names = first.column_names();
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(total)))
            .collect();
        for batch in batches {
            if batch.column_names() != names {
                return Err(Error::Schema(format!(
                    "cannot append batch with columns {:?} to {:?}",
                    batch.column_names(),
                    names
                )));
            }
            for (out, col) in columns.iter_mut().zip(&batch.columns) {
                out.values.extend(col.values.iter().cloned());
            }
        }
        Ok(RowBatch { columns })
    }

    /// Approximate serialized size: values plus per-column name overhead.
    pub fn estimated_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.name.len() + c.values.iter().map(Scalar::estimated_bytes).sum::<usize>())
            .sum()
    }

    /// Sort rows by the specified columns (in order).
    ///
    /// Creates a vector of (sort_key_tuple, original_index), sorts it,
    /// then reorders all columns accordingly.
    pub fn sort_by_columns(&mut self, sort_keys: &[String]) -> Result<()> {
        let num_rows = self.num_rows();
        if num_rows == 0 {
            return Ok(());
        }

        let key_indices: Vec<usize> = sort_keys
            .iter()
            .map(|key| {
                self.column_index(key)
                    .ok_or_else(|| Error::NotFound(format!("sort key column '{key}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut indices: Vec<(Vec<Scalar>, usize)> = (0..num_rows)
            .map(|row_idx| {
                let sort_tuple: Vec<Scalar> = key_indices
                    .iter()
                    .map(|&col_idx| self.columns[col_idx].values[row_idx].clone())
                    .collect();
                (sort_tuple, row_idx)
            })
            .collect();

        // Stable, so rows with equal keys keep their relative order.
        indices.sort_by(|(a, _), (b, _)| scalar_tuple_cmp(a, b));

        for col in &mut self.columns {
            let original = std::mem::take(&mut col.values);
            col.values = indices
                .iter()
                .map(|(_, idx)| original[*idx].clone())
                .collect();
        }

        Ok(())
    }
}

/// Ordered tuple of grouping-column values.
///
/// Equality and hashing are value-wise: numbers compare by value across
/// widths (`I64(5)`, `I32(5)` and `F64(5.0)` are one key), other floats by
/// bit pattern (so a `NaN` key groups with itself), and `Null` is an
/// ordinary group value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKey(pub Vec<Scalar>);

impl GroupKey {
    pub fn values(&self) -> &[Scalar] {
        &self.0
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| scalar_key_eq(a, b))
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for s in &self.0 {
            hash_scalar(s, state);
        }
    }
}

/// Canonical form of a numeric key value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NumKey {
    Int(i64),
    /// Non-integral, non-finite or out-of-range float, by bit pattern.
    Float(u64),
}

fn num_key(s: &Scalar) -> Option<NumKey> {
    match s {
        Scalar::I32(i) => Some(NumKey::Int(*i as i64)),
        Scalar::I64(i) => Some(NumKey::Int(*i)),
        Scalar::F32(f) => Some(float_key(*f as f64)),
        Scalar::F64(f) => Some(float_key(*f)),
        _ => None,
    }
}

fn float_key(f: f64) -> NumKey {
    match integral_f64(f) {
        Some(i) => NumKey::Int(i),
        None => NumKey::Float(f.to_bits()),
    }
}

/// `f` as an `i64` when it is a whole number inside the `i64` range.
fn integral_f64(f: f64) -> Option<i64> {
    // 2^63 is exact in f64; the range is half-open.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

fn scalar_key_eq(a: &Scalar, b: &Scalar) -> bool {
    match (num_key(a), num_key(b)) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a == b,
        _ => false,
    }
}

fn hash_scalar<H: Hasher>(scalar: &Scalar, state: &mut H) {
    use Scalar::*;

    match scalar {
        Null => 0u8.hash(state),
        Bool(b) => {
            1u8.hash(state);
            b.hash(state)
        }
        // Ints and floats share a discriminant so equal values collide.
        I32(_) | I64(_) | F32(_) | F64(_) => {
            2u8.hash(state);
            num_key(scalar).hash(state)
        }
        Str(s) => {
            4u8.hash(state);
            s.hash(state)
        }
        Bin(b) => {
            5u8.hash(state);
            b.hash(state)
        }
    }
}

/// Compare two scalar tuples lexicographically.
pub fn scalar_tuple_cmp(a: &[Scalar], b: &[Scalar]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match scalar_cmp(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Total order over scalars.
///
/// Nulls are sorted first. Integers and floats compare by numeric value
/// regardless of width; NaN sorts after every other number. Other mixed
/// pairs are ordered by type: Bool < numbers < Str < Bin.
pub fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(_) | I64(_), I32(_) | I64(_)) => int_value(a).cmp(&int_value(b)),
        (F32(_) | F64(_), F32(_) | F64(_)) => float_cmp(float_value(a), float_value(b)),
        (I32(_) | I64(_), F32(_) | F64(_)) => int_float_cmp(int_value(a), float_value(b)),
        (F32(_) | F64(_), I32(_) | I64(_)) => {
            int_float_cmp(int_value(b), float_value(a)).reverse()
        }
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        // Mixed types: order by variant order
        _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
    }
}

fn int_value(s: &Scalar) -> i64 {
    match s {
        Scalar::I32(i) => *i as i64,
        Scalar::I64(i) => *i,
        _ => 0,
    }
}

fn float_value(s: &Scalar) -> f64 {
    match s {
        Scalar::F32(f) => *f as f64,
        Scalar::F64(f) => *f,
        _ => 0.0,
    }
}

/// Exact comparison of an integer against a float.
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    match integral_f64(f) {
        Some(fi) => i.cmp(&fi),
        // A whole `i` can never equal a fractional or out-of-range `f`.
        None => float_cmp(i as f64, f).then(if f > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        }),
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) => 2,
        I64(_) => 2,
        F32(_) => 3,
        F64(_) => 3,
        Str(_) => 4,
        Bin(_) => 5,
    }
}
