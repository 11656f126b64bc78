//! Columnar encoding for spill segments.
//!
//! A segment is a self-contained parquet file. The codec only selects the
//! parquet page compression; the writer handles framing and statistics.

use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use chunkflow_core::arrow::{record_batch_to_rows, rows_to_record_batch};
use chunkflow_core::types::RowBatch;

use crate::error::{Error, Result};

pub use chunkflow_core::config::SpillCodec as Codec;

pub fn compression(codec: Codec) -> Compression {
    match codec {
        Codec::None => Compression::UNCOMPRESSED,
        Codec::Snappy => Compression::SNAPPY,
        Codec::Zstd => Compression::ZSTD(ZstdLevel::default()),
        Codec::Lz4 => Compression::LZ4_RAW,
    }
}

/// Encode one batch as a parquet file in memory.
pub fn encode(codec: Codec, batch: &RowBatch) -> Result<Vec<u8>> {
    let rb = rows_to_record_batch(batch)?;
    let props = WriterProperties::builder()
        .set_compression(compression(codec))
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, rb.schema(), Some(props))?;
    writer.write(&rb)?;
    writer.close()?;
    Ok(buf)
}

/// Decode a parquet segment back into row batches, in file order.
pub fn decode(bytes: Vec<u8>) -> Result<Vec<RowBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?.build()?;
    let mut out = Vec::new();
    for rb in reader {
        let rb = rb.map_err(|e| Error::Codec(format!("arrow: {e}")))?;
        out.push(record_batch_to_rows(&rb)?);
    }
    Ok(out)
}
