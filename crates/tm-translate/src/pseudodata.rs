//! Parquet pseudo-data artifact.
//!
//! # Schema: `toymaker_pseudodata_v1`
//!
//! | Column          | Arrow type | Description                  |
//! |-----------------|------------|------------------------------|
//! | `toy`           | `UInt32`   | Toy index, 0-based           |
//! | `m{mass}_b{bin}`| `Float64`  | One column per bin, in order |
//!
//! | Key                        | Value                                 |
//! |----------------------------|---------------------------------------|
//! | `toymaker.schema_version`  | `"toymaker_pseudodata_v1"`            |
//! | `toymaker.bin_labels`      | JSON array `[[mass, bin], ...]`       |
//! | `toymaker.mode`            | `"copula"` or `"gaussian"`            |
//!
//! Downstream consumers usually read only a prefix of the toys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use tm_core::{BinKey, Error, Result, check_bin_keys};
use tm_inference::{SamplingMode, ToyBatch};

use crate::parquet_io::{WRITE_CHUNK_ROWS, build_batch, f64_values, read_parquet, write_parquet};

/// Schema version string embedded in Parquet key-value metadata.
pub const PSEUDODATA_SCHEMA_V1: &str = "toymaker_pseudodata_v1";
/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "toymaker.schema_version";
/// Parquet metadata key for the bin labels (JSON).
pub const META_KEY_BIN_LABELS: &str = "toymaker.bin_labels";
/// Parquet metadata key for the sampling mode.
pub const META_KEY_MODE: &str = "toymaker.mode";
/// Toy index column.
pub const TOY_COLUMN: &str = "toy";

/// Pseudo-data read back from disk.
#[derive(Debug, Clone)]
pub struct PseudoData {
    /// Column order of `toys`.
    pub bin_keys: Vec<BinKey>,
    /// Toy rows.
    pub toys: ToyBatch,
}

fn schema(bin_keys: &[BinKey], mode: SamplingMode) -> Result<Arc<Schema>> {
    let labels = serde_json::to_string(bin_keys)
        .map_err(|e| Error::Validation(format!("failed to serialize bin labels: {e}")))?;
    let mut fields = Vec::with_capacity(bin_keys.len() + 1);
    fields.push(Field::new(TOY_COLUMN, DataType::UInt32, false));
    fields.extend(bin_keys.iter().map(|k| Field::new(k.to_string(), DataType::Float64, false)));
    let metadata = HashMap::from([
        (META_KEY_SCHEMA_VERSION.to_string(), PSEUDODATA_SCHEMA_V1.to_string()),
        (META_KEY_BIN_LABELS.to_string(), labels),
        (META_KEY_MODE.to_string(), mode.to_string()),
    ]);
    Ok(Arc::new(Schema::new(fields).with_metadata(metadata)))
}

/// Write `toys`, whose columns follow `bin_keys`.
pub fn write_pseudodata(path: &Path, bin_keys: &[BinKey], toys: &ToyBatch) -> Result<()> {
    check_bin_keys(bin_keys)?;
    if bin_keys.len() != toys.n_bins() {
        return Err(Error::Validation(format!(
            "{} bin labels for {} toy columns",
            bin_keys.len(),
            toys.n_bins()
        )));
    }
    let schema = schema(bin_keys, toys.mode())?;
    let n = toys.n_toys();
    let n_toys_u32 = u32::try_from(n)
        .map_err(|_| Error::Validation(format!("too many toys for a UInt32 index: {n}")))?;

    let mut batches = Vec::with_capacity(n.div_ceil(WRITE_CHUNK_ROWS));
    let mut start = 0u32;
    while start < n_toys_u32 {
        let end = (start as usize + WRITE_CHUNK_ROWS).min(n);
        let rows = start as usize..end;
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(toys.n_bins() + 1);
        arrays.push(Arc::new(UInt32Array::from_iter_values(start..end as u32)));
        for j in 0..toys.n_bins() {
            let col = Float64Array::from_iter_values(rows.clone().map(|i| toys.row(i)[j]));
            arrays.push(Arc::new(col));
        }
        batches.push(build_batch(&schema, arrays)?);
        start = end as u32;
    }
    write_parquet(path, schema, &batches)?;
    tracing::info!(path = %path.display(), n_toys = n, n_bins = toys.n_bins(), "wrote pseudo-data");
    Ok(())
}

/// Read pseudo-data, optionally only the first `n_toys` rows.
pub fn read_pseudodata(path: &Path, n_toys: Option<usize>) -> Result<PseudoData> {
    let batch = read_parquet(path, n_toys)?;
    let schema = batch.schema();
    let meta = schema.metadata();
    match meta.get(META_KEY_SCHEMA_VERSION) {
        Some(v) if v == PSEUDODATA_SCHEMA_V1 => {}
        other => {
            return Err(Error::Validation(format!(
                "{}: not a pseudo-data artifact (schema_version {other:?})",
                path.display()
            )));
        }
    }
    let labels = meta
        .get(META_KEY_BIN_LABELS)
        .ok_or_else(|| Error::Validation(format!("missing {META_KEY_BIN_LABELS} metadata")))?;
    let bin_keys: Vec<BinKey> = serde_json::from_str(labels)
        .map_err(|e| Error::Validation(format!("invalid {META_KEY_BIN_LABELS} metadata: {e}")))?;
    check_bin_keys(&bin_keys)?;
    let mode = match meta.get(META_KEY_MODE) {
        Some(m) => m.parse()?,
        None => SamplingMode::Copula,
    };

    if let Some(want) = n_toys.filter(|&w| batch.num_rows() < w) {
        return Err(Error::Validation(format!(
            "{} holds {} toys, {want} requested",
            path.display(),
            batch.num_rows()
        )));
    }

    let columns = bin_keys
        .iter()
        .map(|k| f64_values(&batch, &k.to_string()))
        .collect::<Result<Vec<_>>>()?;
    let n = batch.num_rows();
    let mut data = Vec::with_capacity(n * bin_keys.len());
    for i in 0..n {
        data.extend(columns.iter().map(|c| c[i]));
    }
    let toys = ToyBatch::from_rows(bin_keys.len(), mode, data)?;
    Ok(PseudoData { bin_keys, toys })
}
