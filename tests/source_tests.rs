mod test_data_gen;

use std::sync::Arc;

use chunkflow::chunkflow_core::error::Error;
use chunkflow::chunkflow_core::types::{RowBatch, Scalar};
use chunkflow::chunkflow_io::{
    BatchSource, InMemoryObjectClient, LocalBatchSource, OpenOptions, RemoteBatchSource,
};
use test_data_gen::*;

fn collect(source: &dyn BatchSource, dataset: &str, options: &OpenOptions) -> Vec<RowBatch> {
    source
        .open(dataset, options)
        .expect("open")
        .collect::<Result<Vec<_>, _>>()
        .expect("read")
}

fn ints(batches: &[RowBatch], column: &str) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| b.column(column).expect("column").values.iter())
        .map(|v| v.as_i64().expect("integer"))
        .collect()
}

#[test]
fn test_parquet_batches_respect_batch_size_across_row_groups() {
    let tmp = TempDir::new("source-parquet");
    let rows = lineitems(10_000, 1);
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &rows, 3_000);

    let source = LocalBatchSource::new(tmp.path(), 1_024).unwrap();
    let batches = collect(&source, "lineitem.parquet", &OpenOptions::all());

    assert!(batches.iter().all(|b| b.num_rows() <= 1_024 && !b.is_empty()));
    let keys = ints(&batches, "l_orderkey");
    assert_eq!(keys.len(), 10_000);
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "rows keep file order");
    assert_eq!(source.open_handles(), 0);
}

#[test]
fn test_extensionless_identifier_resolves_to_parquet() {
    let tmp = TempDir::new("source-ext");
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &lineitems(50, 2), 50);
    let source = LocalBatchSource::new(tmp.path(), 16).unwrap();

    let schema = source.schema("lineitem").unwrap();
    assert_eq!(schema.names(), LINEITEM_COLUMNS.to_vec());
    assert_eq!(ints(&collect(&source, "lineitem", &OpenOptions::all()), "l_orderkey").len(), 50);
}

#[test]
fn test_projection_yields_requested_columns_in_order() {
    let tmp = TempDir::new("source-proj");
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &lineitems(300, 3), 100);
    let source = LocalBatchSource::new(tmp.path(), 64).unwrap();

    let opts = OpenOptions::all().with_columns(["l_quantity", "l_orderkey"]);
    let batches = collect(&source, "lineitem.parquet", &opts);
    for b in &batches {
        assert_eq!(b.column_names(), vec!["l_quantity", "l_orderkey"]);
    }
}

#[test]
fn test_missing_dataset_column_and_format_fail_before_reading() {
    let tmp = TempDir::new("source-errors");
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &lineitems(10, 4), 10);
    write_text(tmp.path(), "sheet.xlsx", "not a table");
    write_text(tmp.path(), "broken.parquet", "l_orderkey,l_quantity\n1,2\n");
    let source = LocalBatchSource::new(tmp.path(), 8).unwrap();

    let err = source.open("nope.parquet", &OpenOptions::all()).err().expect("missing dataset");
    assert!(err.is_not_found());

    let opts = OpenOptions::all().with_columns(["l_orderkey", "l_tax"]);
    let err = source.open("lineitem.parquet", &opts).err().expect("missing column");
    assert!(err.is_not_found());
    assert!(err.to_string().contains("l_tax"));

    let err = source.open("sheet.xlsx", &OpenOptions::all()).err().expect("bad format");
    assert!(matches!(err, Error::FormatUnsupported(_)));

    let err = source.open("broken.parquet", &OpenOptions::all()).err().expect("bad footer");
    assert!(matches!(err, Error::FormatUnsupported(_)), "{err:?}");

    let err = source
        .open("lineitem.parquet", &OpenOptions::all().with_filter_hint("l_quantity ~ 3"))
        .err()
        .expect("bad hint");
    assert!(matches!(err, Error::Config(_)));

    assert_eq!(source.open_handles(), 0);
}

#[test]
fn test_filter_hint_drops_rows_and_hidden_column() {
    let tmp = TempDir::new("source-hint");
    let rows = lineitems(2_000, 5);
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &rows, 500);
    let source = LocalBatchSource::new(tmp.path(), 256).unwrap();

    let opts = OpenOptions::all()
        .with_columns(["l_orderkey"])
        .with_filter_hint("l_quantity > 40");
    let batches = collect(&source, "lineitem.parquet", &opts);

    let expected: Vec<i64> = rows.iter().filter(|r| r.quantity > 40).map(|r| r.orderkey).collect();
    assert_eq!(ints(&batches, "l_orderkey"), expected);
    assert!(batches.iter().all(|b| b.column_names() == vec!["l_orderkey"]));
}

#[test]
fn test_csv_and_tbl_match_parquet_values() {
    let tmp = TempDir::new("source-text");
    let rows = lineitems(700, 6);
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &rows, 700);
    write_text(tmp.path(), "lineitem.csv", &lineitem_csv(&rows));
    write_text(tmp.path(), "lineitem.tbl", &lineitem_tbl(&rows));
    let source = LocalBatchSource::new(tmp.path(), 128).unwrap();

    let parquet = collect(&source, "lineitem.parquet", &OpenOptions::all());
    let csv = collect(&source, "lineitem.csv", &OpenOptions::all());
    let tbl = collect(&source, "lineitem.tbl", &OpenOptions::all());

    assert_eq!(ints(&csv, "l_quantity"), ints(&parquet, "l_quantity"));
    assert_eq!(ints(&tbl, "column_2"), ints(&parquet, "l_quantity"));
    assert!(tbl.iter().all(|b| b.columns.len() == 5), "trailing delimiter is not a column");

    let prices: Vec<f64> = csv
        .iter()
        .flat_map(|b| b.column("l_extendedprice").unwrap().values.iter())
        .map(|v| v.as_f64().unwrap())
        .collect();
    let expected: Vec<f64> = rows.iter().map(|r| r.extendedprice).collect();
    assert_eq!(prices, expected);
}

#[test]
fn test_early_termination_releases_handle() {
    let tmp = TempDir::new("source-early");
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &lineitems(5_000, 7), 1_000);
    let source = LocalBatchSource::new(tmp.path(), 100).unwrap();

    let mut stream = source.open("lineitem.parquet", &OpenOptions::all()).unwrap();
    assert_eq!(source.open_handles(), 1);
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.num_rows(), 100);
    assert_eq!(stream.batches_read(), 1);
    drop(stream);
    assert_eq!(source.open_handles(), 0);
}

#[test]
fn test_remote_source_matches_local_source() {
    let tmp = TempDir::new("source-remote");
    let rows = lineitems(1_500, 8);
    write_lineitem_parquet(tmp.path(), "lineitem.parquet", &rows, 400);

    let client = Arc::new(InMemoryObjectClient::new());
    client
        .put("tpch/lineitem.parquet", lineitem_parquet_bytes(&rows, 400))
        .unwrap();
    client.put("tpch/lineitem.csv", lineitem_csv(&rows)).unwrap();

    let local = LocalBatchSource::new(tmp.path(), 250).unwrap();
    let remote = RemoteBatchSource::new(client, 250).unwrap();
    assert_eq!(remote.name(), "remote");

    let opts = OpenOptions::all().with_columns(["l_returnflag", "l_quantity"]);
    let from_local = collect(&local, "lineitem.parquet", &opts);
    let from_remote = collect(&remote, "tpch/lineitem.parquet", &opts);
    assert_eq!(from_local, from_remote);

    let from_csv = collect(&remote, "tpch/lineitem.csv", &opts);
    assert_eq!(ints(&from_csv, "l_quantity"), ints(&from_local, "l_quantity"));
    assert!(from_csv.iter().all(|b| b.num_rows() <= 250));

    let flags: Vec<Scalar> = from_remote
        .iter()
        .flat_map(|b| b.column("l_returnflag").unwrap().values.clone())
        .collect();
    assert_eq!(flags[0], Scalar::Str(rows[0].returnflag.to_string()));

    let err = remote.open("tpch/orders.parquet", &opts).err().expect("missing object");
    assert!(err.is_not_found());
    assert_eq!(remote.open_handles(), 0);
}
