//! Parquet event tables.
//!
//! | Column            | Arrow type                  | Required |
//! |-------------------|-----------------------------|----------|
//! | `weight`          | any float / integer         | yes      |
//! | `sample`          | Utf8 / LargeUtf8 / Dict     | no       |
//! | `PNN{mass}Bin`    | any integer, `0` = underflow| per mass |

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};
use tm_inference::WeightedEventTable;

use crate::parquet_io::{
    build_batch, f64_values, read_parquet, string_values, u32_values, write_parquet,
};

/// Placeholder replaced by the mass in [`EventTableColumns::bin_column_template`].
pub const MASS_PLACEHOLDER: &str = "{mass}";

/// Column naming of an event table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTableColumns {
    /// Event weight column.
    pub weight: String,
    /// Sample label column; absent columns are tolerated.
    pub sample: String,
    /// Bin-assignment column name with a `{mass}` placeholder.
    pub bin_column_template: String,
}

impl Default for EventTableColumns {
    fn default() -> Self {
        Self {
            weight: "weight".into(),
            sample: "sample".into(),
            bin_column_template: "PNN{mass}Bin".into(),
        }
    }
}

impl EventTableColumns {
    /// Bin-assignment column for `mass`.
    pub fn bin_column(&self, mass: u32) -> String {
        self.bin_column_template.replace(MASS_PLACEHOLDER, &mass.to_string())
    }
}

/// Read the weight, sample and bin-assignment columns of `masses`.
pub fn read_event_table(
    path: &Path,
    columns: &EventTableColumns,
    masses: &[u32],
) -> Result<WeightedEventTable> {
    if !columns.bin_column_template.contains(MASS_PLACEHOLDER) {
        return Err(Error::Validation(format!(
            "bin column template '{}' has no {MASS_PLACEHOLDER} placeholder",
            columns.bin_column_template
        )));
    }
    let batch = read_parquet(path, None)?;
    let weights = f64_values(&batch, &columns.weight)?;
    let samples = if batch.column_by_name(&columns.sample).is_some() {
        Some(string_values(&batch, &columns.sample)?)
    } else {
        tracing::debug!(column = %columns.sample, "event table has no sample column");
        None
    };
    let bin_columns = masses
        .iter()
        .map(|&m| Ok((m, u32_values(&batch, &columns.bin_column(m))?)))
        .collect::<Result<Vec<_>>>()?;

    let table = WeightedEventTable::from_columns(weights, samples, bin_columns)?;
    tracing::info!(
        path = %path.display(),
        n_events = table.n_events(),
        n_masses = masses.len(),
        "read event table"
    );
    Ok(table)
}

/// Write an event table with `Float64` weights and `UInt32` bin columns.
pub fn write_event_table(
    path: &Path,
    table: &WeightedEventTable,
    columns: &EventTableColumns,
) -> Result<()> {
    let mut fields = vec![Field::new(&columns.weight, DataType::Float64, false)];
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(table.weights().to_vec()))];
    if let Some(samples) = table.samples() {
        fields.push(Field::new(&columns.sample, DataType::Utf8, false));
        arrays.push(Arc::new(StringArray::from_iter_values(samples.iter())));
    }
    for mass in table.masses() {
        fields.push(Field::new(columns.bin_column(mass), DataType::UInt32, false));
        arrays.push(Arc::new(UInt32Array::from(table.bin_column(mass)?.to_vec())));
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = build_batch(&schema, arrays)?;
    write_parquet(path, schema, &[batch])
}
