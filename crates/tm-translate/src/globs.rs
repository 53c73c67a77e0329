//! Parquet global-observable artifacts.
//!
//! Vector toys (τ globs, control-region pseudo-data) are stored as
//! `index: Int32` plus one `List<Float64>` column of fixed length. Alpha toys
//! are stored with one `Float64` column per observable name.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Float64Builder, Int32Array, ListBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use tm_core::{Error, Result};
use tm_inference::{AlphaToys, VectorToys};

use crate::parquet_io::{
    WRITE_CHUNK_ROWS, build_batch, column, f64_values, read_parquet, write_parquet,
};

/// Toy index column.
pub const INDEX_COLUMN: &str = "index";
/// Default name of the vector column of global-observable toys.
pub const GLOBS_COLUMN: &str = "globs";

/// Write vector toys as `index` plus the list column `values_column`.
pub fn write_vector_toys(path: &Path, values_column: &str, toys: &VectorToys) -> Result<()> {
    let list_type = DataType::List(Arc::new(Field::new_list_field(DataType::Float64, true)));
    let schema = Arc::new(Schema::new(vec![
        Field::new(INDEX_COLUMN, DataType::Int32, false),
        Field::new(values_column, list_type, false),
    ]));
    let n = toys.n_toys();
    i32::try_from(n)
        .map_err(|_| Error::Validation(format!("too many toys for an Int32 index: {n}")))?;

    let mut batches = Vec::new();
    let mut start = 0usize;
    while start < n {
        let end = (start + WRITE_CHUNK_ROWS).min(n);
        let index = Int32Array::from_iter_values((start..end).map(|i| i as i32));
        let mut values = ListBuilder::new(Float64Builder::new());
        for i in start..end {
            values.values().append_slice(toys.row(i));
            values.append(true);
        }
        let arrays: Vec<ArrayRef> = vec![Arc::new(index), Arc::new(values.finish())];
        batches.push(build_batch(&schema, arrays)?);
        start = end;
    }
    write_parquet(path, schema, &batches)?;
    tracing::info!(path = %path.display(), n_toys = n, n_bins = toys.n_bins(), "wrote vector toys");
    Ok(())
}

/// Read vector toys written by [`write_vector_toys`]; every row must have the same length.
pub fn read_vector_toys(path: &Path, values_column: &str) -> Result<VectorToys> {
    let batch = read_parquet(path, None)?;
    let col = column(&batch, values_column)?;
    let list = match col.data_type() {
        DataType::List(_) => col.as_list::<i32>(),
        other => {
            return Err(Error::Validation(format!(
                "column '{values_column}' has type {other:?}, expected List<Float64>"
            )));
        }
    };
    let mut out: Option<VectorToys> = None;
    for i in 0..list.len() {
        let row = list.value(i);
        let values = row.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
            Error::Validation(format!("column '{values_column}' does not hold Float64 values"))
        })?;
        let toys = out.get_or_insert_with(|| VectorToys::new(values.len()));
        toys.push_row(values.values())?;
    }
    Ok(out.unwrap_or_else(|| VectorToys::new(0)))
}

/// Write alpha toys with one `Float64` column per observable.
pub fn write_alpha_toys(path: &Path, toys: &AlphaToys) -> Result<()> {
    if toys.names.len() != toys.values.n_bins() {
        return Err(Error::Validation(format!(
            "{} names for {} alpha columns",
            toys.names.len(),
            toys.values.n_bins()
        )));
    }
    let schema = Arc::new(Schema::new(
        toys.names.iter().map(|n| Field::new(n, DataType::Float64, false)).collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = (0..toys.names.len())
        .map(|j| Arc::new(Float64Array::from(toys.column(j))) as ArrayRef)
        .collect();
    let batch = build_batch(&schema, arrays)?;
    write_parquet(path, schema, &[batch])?;
    tracing::info!(
        path = %path.display(),
        n_toys = toys.values.n_toys(),
        n_observables = toys.names.len(),
        "wrote alpha toys"
    );
    Ok(())
}

/// Read alpha toys; columns are taken in file order.
pub fn read_alpha_toys(path: &Path) -> Result<AlphaToys> {
    let batch = read_parquet(path, None)?;
    let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
    let columns = names.iter().map(|n| f64_values(&batch, n)).collect::<Result<Vec<_>>>()?;
    let mut values = VectorToys::new(names.len());
    let mut row = vec![0.0; names.len()];
    for i in 0..batch.num_rows() {
        for (dst, c) in row.iter_mut().zip(&columns) {
            *dst = c[i];
        }
        values.push_row(&row)?;
    }
    Ok(AlphaToys { names, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tmp_path;

    #[test]
    fn test_vector_toys_roundtrip() {
        let path = tmp_path("globs.parquet");
        let data: Vec<f64> = (0..(WRITE_CHUNK_ROWS + 3) * 4).map(|i| i as f64 * 0.5).collect();
        let toys = VectorToys::from_rows(4, data).unwrap();
        write_vector_toys(&path, GLOBS_COLUMN, &toys).unwrap();

        let back = read_vector_toys(&path, GLOBS_COLUMN).unwrap();
        assert_eq!(back, toys);

        let raw = read_parquet(&path, None).unwrap();
        let index = raw.column(0).as_primitive::<arrow::datatypes::Int32Type>();
        assert_eq!(index.value(WRITE_CHUNK_ROWS + 2), (WRITE_CHUNK_ROWS + 2) as i32);
        assert!(read_vector_toys(&path, "pseudodata").is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_alpha_toys_roundtrip() {
        let path = tmp_path("alphas.parquet");
        let values = VectorToys::from_rows(2, vec![0.1, -0.2, 1.3, 4.9]).unwrap();
        let toys = AlphaToys { names: vec!["nom_alpha_a".into(), "nom_alpha_b".into()], values };
        write_alpha_toys(&path, &toys).unwrap();
        assert_eq!(read_alpha_toys(&path).unwrap(), toys);
        let _ = std::fs::remove_file(&path);
    }
}
