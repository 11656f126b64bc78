//! Conversions between `RowBatch` and Arrow `RecordBatch`.
//!
//! Only compiled with the `arrow` feature; the pure core never sees Arrow.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray,
    LargeStringArray, RecordBatch, RecordBatchOptions, StringArray, StructArray,
    TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{
    DataType as ArrowType, Field as ArrowField, FieldRef, Schema as ArrowSchema, TimeUnit,
};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};
use crate::types::{Column, RowBatch, Scalar};

/// Map an Arrow schema to the logical schema reported by sources.
pub fn logical_schema(schema: &ArrowSchema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|f| Field::new(f.name().clone(), logical_type(f.data_type()), f.is_nullable()))
            .collect(),
    )
}

fn logical_type(dt: &ArrowType) -> DataType {
    match dt {
        ArrowType::Null => DataType::Null,
        ArrowType::Boolean => DataType::Boolean,
        ArrowType::Int8 | ArrowType::Int16 | ArrowType::Int32 | ArrowType::Date32 => {
            DataType::Int32
        }
        ArrowType::Int64
        | ArrowType::UInt8
        | ArrowType::UInt16
        | ArrowType::UInt32
        | ArrowType::Date64
        | ArrowType::Timestamp(_, _) => DataType::Int64,
        ArrowType::Float32 => DataType::Float32,
        ArrowType::UInt64 | ArrowType::Float64 | ArrowType::Decimal128(_, _) => DataType::Float64,
        ArrowType::Binary | ArrowType::LargeBinary => DataType::Binary,
        _ => DataType::Utf8,
    }
}

/// Convert every column of an Arrow batch to scalars.
pub fn record_batch_to_rows(rb: &RecordBatch) -> Result<RowBatch> {
    let schema = rb.schema();
    let columns = schema
        .fields()
        .iter()
        .zip(rb.columns())
        .map(|(field, array)| {
            let values = if field.metadata().contains_key(MIXED_COLUMN_KEY) {
                mixed_to_scalars(array.as_ref(), field.name())?
            } else {
                array_to_scalars(array.as_ref(), field.name())?
            };
            Ok(Column::new(field.name().clone(), values))
        })
        .collect::<Result<Vec<_>>>()?;
    RowBatch::try_new(columns)
}

macro_rules! collect_as {
    ($array:expr, $ty:ty, $map:expr) => {{
        let arr = $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| Error::Invariant(format!("array is not {}", stringify!($ty))))?;
        (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    Scalar::Null
                } else {
                    ($map)(arr.value(i))
                }
            })
            .collect::<Vec<Scalar>>()
    }};
}

/// Convert one Arrow array to scalars. Unsupported physical types are a
/// `FormatUnsupported` error naming the column.
pub fn array_to_scalars(array: &dyn Array, name: &str) -> Result<Vec<Scalar>> {
    let values = match array.data_type() {
        ArrowType::Null => vec![Scalar::Null; array.len()],
        ArrowType::Boolean => collect_as!(array, BooleanArray, Scalar::Bool),
        ArrowType::Int8 => collect_as!(array, Int8Array, |v: i8| Scalar::I32(v as i32)),
        ArrowType::Int16 => collect_as!(array, Int16Array, |v: i16| Scalar::I32(v as i32)),
        ArrowType::Int32 => collect_as!(array, Int32Array, Scalar::I32),
        ArrowType::Int64 => collect_as!(array, Int64Array, Scalar::I64),
        ArrowType::UInt8 => collect_as!(array, UInt8Array, |v: u8| Scalar::I64(v as i64)),
        ArrowType::UInt16 => collect_as!(array, UInt16Array, |v: u16| Scalar::I64(v as i64)),
        ArrowType::UInt32 => collect_as!(array, UInt32Array, |v: u32| Scalar::I64(v as i64)),
        ArrowType::UInt64 => collect_as!(array, UInt64Array, |v: u64| {
            i64::try_from(v).map(Scalar::I64).unwrap_or(Scalar::F64(v as f64))
        }),
        ArrowType::Float32 => collect_as!(array, Float32Array, Scalar::F32),
        ArrowType::Float64 => collect_as!(array, Float64Array, Scalar::F64),
        ArrowType::Utf8 => collect_as!(array, StringArray, |v: &str| Scalar::Str(v.to_string())),
        ArrowType::LargeUtf8 => {
            collect_as!(array, LargeStringArray, |v: &str| Scalar::Str(v.to_string()))
        }
        ArrowType::Binary => collect_as!(array, BinaryArray, |v: &[u8]| Scalar::Bin(v.to_vec())),
        ArrowType::LargeBinary => {
            collect_as!(array, LargeBinaryArray, |v: &[u8]| Scalar::Bin(v.to_vec()))
        }
        ArrowType::Decimal128(_, scale) => {
            let div = 10f64.powi(*scale as i32);
            collect_as!(array, Decimal128Array, |v: i128| Scalar::F64(v as f64 / div))
        }
        ArrowType::Date32 => collect_as!(array, Date32Array, Scalar::I32),
        ArrowType::Date64 => collect_as!(array, Date64Array, Scalar::I64),
        ArrowType::Timestamp(TimeUnit::Second, _) => {
            collect_as!(array, TimestampSecondArray, Scalar::I64)
        }
        ArrowType::Timestamp(TimeUnit::Millisecond, _) => {
            collect_as!(array, TimestampMillisecondArray, Scalar::I64)
        }
        ArrowType::Timestamp(TimeUnit::Microsecond, _) => {
            collect_as!(array, TimestampMicrosecondArray, Scalar::I64)
        }
        ArrowType::Timestamp(TimeUnit::Nanosecond, _) => {
            collect_as!(array, TimestampNanosecondArray, Scalar::I64)
        }
        other => {
            return Err(Error::FormatUnsupported(format!(
                "column '{name}' has unsupported type {other}"
            )))
        }
    };
    Ok(values)
}

/// Field metadata key marking a column written as one struct child per
/// scalar variant.
pub const MIXED_COLUMN_KEY: &str = "chunkflow.mixed";

/// How one column is laid out in Arrow.
#[derive(Debug, Clone, PartialEq)]
enum Layout {
    /// Every non-null value has this type (all-null columns are text).
    Typed(ArrowType),
    /// Values of several variants; each keeps its own child array so the
    /// exact variant survives a round trip.
    Mixed(Vec<ArrowType>),
}

fn variant_type(v: &Scalar) -> Option<ArrowType> {
    Some(match v {
        Scalar::Null => return None,
        Scalar::Bool(_) => ArrowType::Boolean,
        Scalar::I32(_) => ArrowType::Int32,
        Scalar::I64(_) => ArrowType::Int64,
        Scalar::F32(_) => ArrowType::Float32,
        Scalar::F64(_) => ArrowType::Float64,
        Scalar::Str(_) => ArrowType::Utf8,
        Scalar::Bin(_) => ArrowType::Binary,
    })
}

fn layout(values: &[Scalar]) -> Layout {
    let mut seen: Vec<ArrowType> = Vec::new();
    for t in values.iter().filter_map(variant_type) {
        if !seen.contains(&t) {
            seen.push(t);
        }
    }
    match seen.len() {
        0 => Layout::Typed(ArrowType::Utf8),
        1 => Layout::Typed(seen.remove(0)),
        _ => Layout::Mixed(seen),
    }
}

/// Child name inside a mixed column.
fn variant_name(ty: &ArrowType) -> &'static str {
    match ty {
        ArrowType::Boolean => "bool",
        ArrowType::Int32 => "i32",
        ArrowType::Int64 => "i64",
        ArrowType::Float32 => "f32",
        ArrowType::Float64 => "f64",
        ArrowType::Binary => "bin",
        _ => "str",
    }
}

/// Array of type `ty` holding the values of that exact variant; every other
/// value becomes null.
fn build_array(values: &[Scalar], ty: &ArrowType) -> ArrayRef {
    match ty {
        ArrowType::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Scalar::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowType::Int32 => Arc::new(Int32Array::from(
            values
                .iter()
                .map(|v| match v {
                    Scalar::I32(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowType::Int64 => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Scalar::I64(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowType::Float32 => Arc::new(Float32Array::from(
            values
                .iter()
                .map(|v| match v {
                    Scalar::F32(f) => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowType::Float64 => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Scalar::F64(f) => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowType::Binary => Arc::new(BinaryArray::from_iter(values.iter().map(|v| match v {
            Scalar::Bin(b) => Some(b.as_slice()),
            _ => None,
        }))),
        _ => Arc::new(StringArray::from_iter(values.iter().map(|v| match v {
            Scalar::Str(s) => Some(s.as_str()),
            _ => None,
        }))),
    }
}

fn build_column(name: &str, values: &[Scalar]) -> (ArrowField, ArrayRef) {
    match layout(values) {
        Layout::Typed(ty) => {
            let array = build_array(values, &ty);
            (ArrowField::new(name, ty, true), array)
        }
        Layout::Mixed(types) => {
            let children: Vec<(FieldRef, ArrayRef)> = types
                .iter()
                .map(|ty| {
                    let field = Arc::new(ArrowField::new(variant_name(ty), ty.clone(), true));
                    (field, build_array(values, ty))
                })
                .collect();
            let array = StructArray::from(children);
            let field = ArrowField::new(name, array.data_type().clone(), true).with_metadata(
                HashMap::from([(MIXED_COLUMN_KEY.to_string(), "true".to_string())]),
            );
            (field, Arc::new(array) as ArrayRef)
        }
    }
}

/// Convert a `RowBatch` to an Arrow batch; every field is nullable.
///
/// Homogeneous columns map to their natural Arrow type. A column mixing
/// variants (say `I64` and `F64`, or numbers and text) is written as a
/// struct tagged with [`MIXED_COLUMN_KEY`] so decoding restores each value's
/// original variant.
pub fn rows_to_record_batch(batch: &RowBatch) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(batch.columns.len());
    let mut arrays = Vec::with_capacity(batch.columns.len());
    for col in &batch.columns {
        let (field, array) = build_column(&col.name, &col.values);
        fields.push(field);
        arrays.push(array);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    RecordBatch::try_new_with_options(Arc::new(ArrowSchema::new(fields)), arrays, &options)
        .map_err(|e| Error::Schema(format!("arrow batch: {e}")))
}

/// Rebuild a mixed column: each row takes the first non-null child.
fn mixed_to_scalars(array: &dyn Array, name: &str) -> Result<Vec<Scalar>> {
    let arr = array
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| Error::Invariant(format!("mixed column '{name}' is not a struct")))?;
    let children = arr
        .columns()
        .iter()
        .map(|child| array_to_scalars(child.as_ref(), name))
        .collect::<Result<Vec<_>>>()?;
    Ok((0..arr.len())
        .map(|row| {
            children
                .iter()
                .map(|c| &c[row])
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Scalar::Null)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_columns_survive_conversion() {
        let batch = RowBatch::try_new(vec![
            Column::new("q", vec![Scalar::I64(1), Scalar::Null, Scalar::I64(3)]),
            Column::new("p", vec![Scalar::F64(1.5), Scalar::F64(2.5), Scalar::Null]),
            Column::new(
                "s",
                vec![Scalar::Str("a".into()), Scalar::Null, Scalar::Str("c".into())],
            ),
            Column::new("b", vec![Scalar::Bool(true), Scalar::Bool(false), Scalar::Null]),
        ])
        .unwrap();

        let rb = rows_to_record_batch(&batch).unwrap();
        assert_eq!(rb.num_rows(), 3);
        assert_eq!(record_batch_to_rows(&rb).unwrap(), batch);
    }

    #[test]
    fn mixed_columns_keep_each_variant() {
        let batch = RowBatch::try_new(vec![
            Column::new(
                "q",
                vec![Scalar::I64(1), Scalar::F64(0.5), Scalar::Null, Scalar::I32(3)],
            ),
            Column::new(
                "tag",
                vec![
                    Scalar::I64(7),
                    Scalar::Str("x".into()),
                    Scalar::Str("7".into()),
                    Scalar::Null,
                ],
            ),
        ])
        .unwrap();
        let rb = rows_to_record_batch(&batch).unwrap();
        let field = rb.schema().field(0).clone();
        assert!(matches!(field.data_type(), ArrowType::Struct(_)));
        assert!(field.metadata().contains_key(MIXED_COLUMN_KEY));
        assert_eq!(record_batch_to_rows(&rb).unwrap(), batch);
    }

    #[test]
    fn all_null_column_is_text() {
        let batch = RowBatch::try_new(vec![Column::new("n", vec![Scalar::Null; 3])]).unwrap();
        let rb = rows_to_record_batch(&batch).unwrap();
        assert_eq!(rb.schema().field(0).data_type(), &ArrowType::Utf8);
        assert_eq!(record_batch_to_rows(&rb).unwrap(), batch);
    }

    #[test]
    fn decimal_scaled_to_float() {
        let arr = Decimal128Array::from(vec![Some(12345_i128), None])
            .with_precision_and_scale(10, 2)
            .unwrap();
        let values = array_to_scalars(&arr, "price").unwrap();
        assert_eq!(values, vec![Scalar::F64(123.45), Scalar::Null]);
    }

    #[test]
    fn zero_row_batch_converts() {
        let batch = RowBatch::empty(&["a".to_string(), "b".to_string()]);
        let rb = rows_to_record_batch(&batch).unwrap();
        assert_eq!(rb.num_rows(), 0);
        assert_eq!(rb.num_columns(), 2);
    }
}
