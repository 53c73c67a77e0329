//! Shared Parquet plumbing: whole-file reads, chunked writes, typed column access.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tm_core::{Error, Result};

/// Rows per record batch when writing large tables.
pub(crate) const WRITE_CHUNK_ROWS: usize = 10_000;

pub(crate) fn default_compression() -> Compression {
    Compression::ZSTD(Default::default())
}

/// Read a Parquet file, optionally only its first `limit` rows, into one batch.
///
/// The returned batch carries the file's full Arrow schema including
/// key-value metadata.
pub(crate) fn read_parquet(path: &Path, limit: Option<usize>) -> Result<RecordBatch> {
    let file = File::open(path)
        .map_err(|e| Error::Validation(format!("failed to open {}: {e}", path.display())))?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Validation(format!("failed to read Parquet {}: {e}", path.display())))?;
    if let Some(n) = limit {
        builder = builder.with_limit(n);
    }

    // Capture the Arrow schema (with key-value metadata) before building the reader.
    let full_schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| Error::Validation(format!("failed to build Parquet reader: {e}")))?;
    let batches: std::result::Result<Vec<_>, _> = reader.collect();
    let batches =
        batches.map_err(|e| Error::Validation(format!("failed to read Parquet batches: {e}")))?;

    arrow::compute::concat_batches(&full_schema, &batches)
        .map_err(|e| Error::Validation(format!("failed to concat Parquet batches: {e}")))
}

/// Write record batches sharing `schema` to a Zstd-compressed Parquet file.
pub(crate) fn write_parquet(path: &Path, schema: Arc<Schema>, batches: &[RecordBatch]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Validation(format!("failed to create {}: {e}", path.display())))?;
    let props = WriterProperties::builder().set_compression(default_compression()).build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| Error::Validation(format!("failed to create Parquet writer: {e}")))?;
    for batch in batches {
        writer.write(batch).map_err(|e| Error::Validation(format!("failed to write Parquet: {e}")))?;
    }
    writer
        .close()
        .map_err(|e| Error::Validation(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

pub(crate) fn build_batch(schema: &Arc<Schema>, columns: Vec<ArrayRef>) -> Result<RecordBatch> {
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
}

pub(crate) fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Validation(format!("missing required column '{name}'")))
}

fn cast(col: &ArrayRef, name: &str, to: &DataType) -> Result<ArrayRef> {
    arrow::compute::cast(col.as_ref(), to).map_err(|e| {
        Error::Validation(format!("column '{name}' has type {:?}, expected {to:?}: {e}", col.data_type()))
    })
}

fn reject_nulls(col: &ArrayRef, name: &str) -> Result<()> {
    if col.null_count() > 0 {
        return Err(Error::Validation(format!(
            "column '{name}' has {} null entries",
            col.null_count()
        )));
    }
    Ok(())
}

/// Any float or integer column as `f64`.
pub(crate) fn f64_values(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let col = column(batch, name)?;
    match col.data_type() {
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {}
        dt if dt.is_integer() => {}
        dt => {
            return Err(Error::Validation(format!(
                "column '{name}' has type {dt:?}, expected a numeric type"
            )));
        }
    }
    let arr = cast(col, name, &DataType::Float64)?;
    reject_nulls(&arr, name)?;
    Ok(arr.as_primitive::<Float64Type>().values().to_vec())
}

/// Any integer column as non-negative `u32`.
pub(crate) fn u32_values(batch: &RecordBatch, name: &str) -> Result<Vec<u32>> {
    let col = column(batch, name)?;
    if !col.data_type().is_integer() {
        return Err(Error::Validation(format!(
            "column '{name}' has type {:?}, expected an integer type",
            col.data_type()
        )));
    }
    // Values that do not fit Int64 become nulls and are rejected below.
    let arr = cast(col, name, &DataType::Int64)?;
    reject_nulls(&arr, name)?;
    arr.as_primitive::<Int64Type>()
        .values()
        .iter()
        .enumerate()
        .map(|(row, &v)| {
            u32::try_from(v).map_err(|_| {
                Error::Validation(format!("row {row}: column '{name}' value {v} is not a bin index"))
            })
        })
        .collect()
}

/// Utf8, LargeUtf8 or dictionary-encoded string column.
pub(crate) fn string_values(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let col = column(batch, name)?;
    let arr = cast(col, name, &DataType::Utf8)?;
    reject_nulls(&arr, name)?;
    Ok(arr.as_string::<i32>().iter().map(|s| s.unwrap_or_default().to_string()).collect())
}
