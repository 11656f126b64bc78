//! Delimited-text reader (`.tbl`, `.csv`, `.dat`).
//!
//! Each field is typed from its own text: integers become `I64`, other
//! numbers `F64`, everything else `Str`, and empty fields `Null`. Typing
//! never looks at neighbouring rows, so a value's type cannot depend on
//! which batch it lands in.

use std::io::Read;

use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::schema::{DataType, Field, Schema};
use chunkflow_core::types::{Column, RowBatch, Scalar};

use super::io_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedFormat {
    pub delimiter: u8,
    pub has_header: bool,
    /// Drop one empty field at the end of each record (`a|b|c|`).
    pub strip_trailing: bool,
}

impl DelimitedFormat {
    /// `|`-separated, no header, trailing delimiter.
    pub const fn tbl() -> Self {
        Self {
            delimiter: b'|',
            has_header: false,
            strip_trailing: true,
        }
    }

    /// `,`-separated with a header row.
    pub const fn csv() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            strip_trailing: false,
        }
    }
}

pub struct DelimitedBatchReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    format: DelimitedFormat,
    names: Vec<String>,
    /// Source field index for each output column.
    indices: Vec<usize>,
    batch_size: usize,
    first: Option<csv::StringRecord>,
    done: bool,
}

impl<R: Read> DelimitedBatchReader<R> {
    /// Read the header (or peek the first record when there is none) and
    /// validate the projection.
    pub fn new(
        reader: R,
        format: DelimitedFormat,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(format.delimiter)
            .has_headers(format.has_header)
            .flexible(true)
            .from_reader(reader);

        let header_names: Option<Vec<String>> = if format.has_header {
            let headers = rdr.headers().map_err(io_err)?;
            Some(trimmed(headers, format.strip_trailing).map(|h| h.trim().to_string()).collect())
        } else {
            None
        };

        let mut records = rdr.into_records();
        let first = records.next().transpose().map_err(io_err)?;

        let names = match header_names {
            Some(names) => names,
            None => {
                let width = first
                    .as_ref()
                    .map(|r| trimmed(r, format.strip_trailing).count())
                    .unwrap_or(0);
                (0..width).map(|i| format!("column_{i}")).collect()
            }
        };

        let (names, indices) = match columns {
            Some(cols) if !cols.is_empty() => {
                let mut idx = Vec::with_capacity(cols.len());
                for c in cols {
                    let pos = names
                        .iter()
                        .position(|n| n == c)
                        .ok_or_else(|| Error::NotFound(format!("column '{c}'")))?;
                    idx.push(pos);
                }
                (cols.to_vec(), idx)
            }
            _ => {
                let idx = (0..names.len()).collect();
                (names, idx)
            }
        };

        Ok(Self {
            records,
            format,
            names,
            indices,
            batch_size: batch_size.max(1),
            first,
            done: false,
        })
    }

    /// Column names with types taken from the first record.
    pub fn schema(&self) -> Schema {
        let fields = self
            .names
            .iter()
            .zip(&self.indices)
            .map(|(name, &i)| {
                let data_type = self
                    .first
                    .as_ref()
                    .and_then(|r| r.get(i))
                    .map(|v| parse_field(v).data_type())
                    .unwrap_or(DataType::Utf8);
                let data_type = if data_type == DataType::Null {
                    DataType::Utf8
                } else {
                    data_type
                };
                Field::new(name.clone(), data_type, true)
            })
            .collect();
        Schema::new(fields)
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        let mut values: Vec<Vec<Scalar>> =
            vec![Vec::with_capacity(self.batch_size); self.indices.len()];
        let mut rows = 0;

        while rows < self.batch_size {
            let record = match self.first.take() {
                Some(r) => r,
                None => match self.records.next() {
                    Some(r) => r.map_err(io_err)?,
                    None => {
                        self.done = true;
                        break;
                    }
                },
            };
            let width = trimmed(&record, self.format.strip_trailing).count();
            for (out, &i) in values.iter_mut().zip(&self.indices) {
                let v = if i < width { record.get(i).unwrap_or("") } else { "" };
                out.push(parse_field(v));
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }

        let columns = self
            .names
            .iter()
            .zip(values)
            .map(|(name, vals)| Column::new(name.clone(), vals))
            .collect();
        RowBatch::try_new(columns).map(Some)
    }
}

impl<R: Read> Iterator for DelimitedBatchReader<R> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done && self.first.is_none() {
            return None;
        }
        match self.next_batch() {
            Ok(Some(b)) => Some(Ok(b)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn trimmed(record: &csv::StringRecord, strip_trailing: bool) -> impl Iterator<Item = &str> {
    let mut len = record.len();
    if strip_trailing && len > 0 && record.get(len - 1).map(str::is_empty).unwrap_or(false) {
        len -= 1;
    }
    record.iter().take(len)
}

/// Type one field from its text alone.
fn parse_field(raw: &str) -> Scalar {
    let v = raw.trim();
    if v.is_empty() {
        Scalar::Null
    } else if let Ok(i) = v.parse::<i64>() {
        Scalar::I64(i)
    } else if let Ok(f) = v.parse::<f64>() {
        Scalar::F64(f)
    } else {
        Scalar::Str(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TBL: &str = "1|17|24.5|A|\n2|36|45.0|N|\n3|8|13.25|R|\n";
    const CSV: &str = "quantity,price,flag\n10,1.5,A\n40,,B\n25,3.0,\n60,4.5,A\n";

    #[test]
    fn tbl_strips_trailing_delimiter_and_names_columns() {
        let r = DelimitedBatchReader::new(Cursor::new(TBL), DelimitedFormat::tbl(), None, 10).unwrap();
        assert_eq!(
            r.schema().names(),
            vec!["column_0", "column_1", "column_2", "column_3"]
        );
        let batches: Vec<RowBatch> = r.collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 1);
        let b = &batches[0];
        assert_eq!(b.num_rows(), 3);
        assert_eq!(b.columns.len(), 4);
        assert_eq!(b.columns[1].values[1], Scalar::I64(36));
        assert_eq!(b.columns[2].values[2], Scalar::F64(13.25));
        assert_eq!(b.columns[3].values[0], Scalar::Str("A".into()));
    }

    #[test]
    fn csv_header_projection_and_nulls() {
        let cols = vec!["flag".to_string(), "price".to_string()];
        let r = DelimitedBatchReader::new(Cursor::new(CSV), DelimitedFormat::csv(), Some(&cols), 3)
            .unwrap();
        let batches: Vec<RowBatch> = r.collect::<Result<_>>().unwrap();
        assert_eq!(batches.iter().map(|b| b.num_rows()).collect::<Vec<_>>(), vec![3, 1]);

        let first = &batches[0];
        assert_eq!(first.column_names(), cols);
        assert_eq!(first.columns[0].values[2], Scalar::Null);
        assert_eq!(first.columns[1].values[1], Scalar::Null);
        assert_eq!(first.columns[1].values[2], Scalar::F64(3.0));
    }

    #[test]
    fn unknown_projection_is_not_found() {
        let cols = vec!["nope".to_string()];
        let err = DelimitedBatchReader::new(Cursor::new(CSV), DelimitedFormat::csv(), Some(&cols), 3)
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn mixed_fields_keep_their_own_type() {
        let data = "q\n1\nx\n2.5\n";
        let r = DelimitedBatchReader::new(Cursor::new(data), DelimitedFormat::csv(), None, 10).unwrap();
        let b = r.into_iter().next().unwrap().unwrap();
        assert_eq!(
            b.columns[0].values,
            vec![Scalar::I64(1), Scalar::Str("x".into()), Scalar::F64(2.5)]
        );
    }

    #[test]
    fn value_types_do_not_depend_on_batch_size() {
        let data = "k,price\n5,100\n6,200\n5,1.5\n5.5,7\nx,\n";
        let read = |batch_size| {
            let r = DelimitedBatchReader::new(Cursor::new(data), DelimitedFormat::csv(), None, batch_size)
                .unwrap();
            let batches: Vec<RowBatch> = r.collect::<Result<_>>().unwrap();
            RowBatch::concat_rows(&batches).unwrap()
        };
        let whole = read(10);
        for batch_size in [1, 2, 3, 4] {
            assert_eq!(read(batch_size), whole, "batch size {batch_size}");
        }
        assert_eq!(
            whole.column("k").unwrap().values,
            vec![
                Scalar::I64(5),
                Scalar::I64(6),
                Scalar::I64(5),
                Scalar::F64(5.5),
                Scalar::Str("x".into()),
            ]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut r =
            DelimitedBatchReader::new(Cursor::new(""), DelimitedFormat::tbl(), None, 10).unwrap();
        assert!(r.schema().fields.is_empty());
        assert!(r.next().is_none());
    }
}
