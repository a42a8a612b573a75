use crate::error::Result;
use crate::table::Codec;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::Path;
use tracing::debug;

/// Summary of a written columnar file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

/// Write `batch` to `path`, replacing any existing file.
///
/// Output depends only on the batch contents and codec, so identical input
/// produces byte-identical files.
pub fn write_parquet(batch: &RecordBatch, path: &Path, codec: Codec) -> Result<WrittenFile> {
    let props = WriterProperties::builder()
        .set_compression(codec.to_parquet())
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(batch)?;
    }
    writer.close()?;

    let bytes = fs::read(path)?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    debug!(
        "Wrote {} rows ({} bytes, {}) to {}",
        batch.num_rows(),
        bytes.len(),
        codec,
        path.display()
    );

    Ok(WrittenFile {
        rows: batch.num_rows(),
        bytes: bytes.len() as u64,
        sha256,
    })
}

/// Read a whole Parquet file into a single batch.
pub fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(concat_batches(&schema, &batches)?)
}

/// Render the first `rows` rows as a text table.
pub fn preview(batch: &RecordBatch, rows: usize) -> Result<String> {
    let head = batch.slice(0, rows.min(batch.num_rows()));
    Ok(pretty_format_batches(&[head])?.to_string())
}
