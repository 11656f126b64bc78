//! Fixture datasets shared by the integration suites.
#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use chunkflow::chunkflow_core::config::ProcessorConfig;

/// Directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("chunkflow-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub const RETURN_FLAGS: [&str; 3] = ["A", "N", "R"];

#[derive(Debug, Clone)]
pub struct LineItem {
    pub orderkey: i64,
    pub returnflag: &'static str,
    pub quantity: i64,
    pub extendedprice: f64,
    pub comment: String,
}

/// Deterministic lineitem-like rows.
pub fn lineitems(rows: usize, seed: u64) -> Vec<LineItem> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows)
        .map(|i| LineItem {
            orderkey: i as i64 + 1,
            returnflag: RETURN_FLAGS[rng.gen_range(0..RETURN_FLAGS.len())],
            quantity: rng.gen_range(1..=50),
            extendedprice: rng.gen_range(100..1_000_000) as f64 / 100.0,
            comment: format!("deposits sleep furiously line {i:08}"),
        })
        .collect()
}

pub const LINEITEM_COLUMNS: [&str; 5] = [
    "l_orderkey",
    "l_returnflag",
    "l_quantity",
    "l_extendedprice",
    "l_comment",
];

pub fn lineitem_record_batch(rows: &[LineItem]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("l_orderkey", DataType::Int64, false),
        Field::new("l_returnflag", DataType::Utf8, false),
        Field::new("l_quantity", DataType::Int64, false),
        Field::new("l_extendedprice", DataType::Float64, false),
        Field::new("l_comment", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.orderkey))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.returnflag))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.quantity))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.extendedprice))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.comment.as_str()))),
    ];
    RecordBatch::try_new(schema, columns).expect("lineitem batch")
}

/// Parquet file bytes with row groups of at most `row_group_size` rows.
pub fn lineitem_parquet_bytes(rows: &[LineItem], row_group_size: usize) -> Vec<u8> {
    let batch = lineitem_record_batch(rows);
    let props = WriterProperties::builder()
        .set_max_row_group_size(row_group_size)
        .build();
    let mut writer =
        ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props)).expect("parquet writer");
    writer.write(&batch).expect("write parquet");
    writer.into_inner().expect("finish parquet")
}

pub fn write_lineitem_parquet(
    dir: &Path,
    name: &str,
    rows: &[LineItem],
    row_group_size: usize,
) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lineitem_parquet_bytes(rows, row_group_size)).expect("write fixture");
    path
}

/// Same rows as CSV with a header; prices keep two decimals.
pub fn lineitem_csv(rows: &[LineItem]) -> String {
    let mut out = LINEITEM_COLUMNS.join(",");
    out.push('\n');
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{},{:.2},{}",
            r.orderkey, r.returnflag, r.quantity, r.extendedprice, r.comment
        );
    }
    out
}

/// Same rows as a headerless `|`-terminated `.tbl` file.
pub fn lineitem_tbl(rows: &[LineItem]) -> String {
    let mut out = String::new();
    for r in rows {
        let _ = writeln!(
            out,
            "{}|{}|{}|{:.2}|{}|",
            r.orderkey, r.returnflag, r.quantity, r.extendedprice, r.comment
        );
    }
    out
}

pub fn write_text(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// The four-row orders file used by the concrete filter/aggregate checks.
pub fn write_orders_csv(dir: &Path) -> PathBuf {
    write_text(
        dir,
        "orders.csv",
        "region,quantity,price\nnorth,10,1.50\nsouth,40,2.50\nnorth,25,3.00\nsouth,60,4.00\n",
    )
}

pub fn config(batch_size: usize, max_memory_mb: u64) -> ProcessorConfig {
    ProcessorConfig {
        batch_size,
        max_memory_mb,
        spill_uri: Some("memory://spill".into()),
        seed: Some(7),
        ..Default::default()
    }
}
