//! JSON bin-correlation artifact (`toymaker_bin_corr_v1`).
//!
//! ```json
//! {
//!   "schema_version": "toymaker_bin_corr_v1",
//!   "bin_labels": [[251, 1], [251, 2], ...],
//!   "corr": [[1.0, 0.3, ...], ...],
//!   "l1": ..., "l2": ..., "l3": ..., "l1_sumw2": ..., "l2_sumw2": ..., "l3_sumw2": ...,
//!   "report": { "negative_l1": 0, ... }
//! }
//! ```
//!
//! Matrices are row-major nested arrays. Undefined entries are `null`.

use std::fs;
use std::path::Path;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tm_core::{BinKey, Error, Result};
use tm_inference::{CorrelationEstimate, CorrelationMatrix, OverlapReport};

/// Schema version string of the correlation artifact.
pub const BIN_CORR_SCHEMA_V1: &str = "toymaker_bin_corr_v1";

/// Row-major matrix with `null` for non-finite entries.
pub type JsonMatrix = Vec<Vec<Option<f64>>>;

fn to_json(m: &DMatrix<f64>) -> JsonMatrix {
    (0..m.nrows())
        .map(|i| {
            (0..m.ncols())
                .map(|j| {
                    let v = m[(i, j)];
                    v.is_finite().then_some(v)
                })
                .collect()
        })
        .collect()
}

/// Persisted correlation estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationArtifact {
    /// Always [`BIN_CORR_SCHEMA_V1`].
    pub schema_version: String,
    /// Row/column order of every matrix.
    pub bin_labels: Vec<BinKey>,
    /// Correlation matrix.
    pub corr: JsonMatrix,
    /// Σw in row bin but not column bin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1: Option<JsonMatrix>,
    /// Σw in column bin but not row bin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2: Option<JsonMatrix>,
    /// Σw in both bins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3: Option<JsonMatrix>,
    /// Σw² analogue of `l1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_sumw2: Option<JsonMatrix>,
    /// Σw² analogue of `l2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2_sumw2: Option<JsonMatrix>,
    /// Σw² analogue of `l3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3_sumw2: Option<JsonMatrix>,
    /// Estimator diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<OverlapReport>,
}

impl CorrelationArtifact {
    /// Artifact of a full estimate, including overlap sums.
    pub fn from_estimate(est: &CorrelationEstimate) -> Self {
        let o = &est.overlaps;
        Self {
            schema_version: BIN_CORR_SCHEMA_V1.to_string(),
            bin_labels: est.bin_keys.clone(),
            corr: to_json(&est.matrix),
            l1: Some(to_json(&o.l1)),
            l2: Some(to_json(&o.l2)),
            l3: Some(to_json(&o.l3)),
            l1_sumw2: Some(to_json(&o.l1_sumw2)),
            l2_sumw2: Some(to_json(&o.l2_sumw2)),
            l3_sumw2: Some(to_json(&o.l3_sumw2)),
            report: Some(est.report.clone()),
        }
    }

    /// Artifact holding only a correlation matrix.
    pub fn from_matrix(corr: &CorrelationMatrix) -> Self {
        Self {
            schema_version: BIN_CORR_SCHEMA_V1.to_string(),
            bin_labels: corr.bin_keys().to_vec(),
            corr: to_json(corr.matrix()),
            l1: None,
            l2: None,
            l3: None,
            l1_sumw2: None,
            l2_sumw2: None,
            l3_sumw2: None,
            report: None,
        }
    }

    /// Validated correlation matrix.
    ///
    /// `null` entries fail with [`Error::Numerical`]; shape problems with
    /// [`Error::Validation`].
    pub fn correlation_matrix(&self) -> Result<CorrelationMatrix> {
        let n = self.bin_labels.len();
        if self.corr.len() != n || self.corr.iter().any(|row| row.len() != n) {
            return Err(Error::Validation(format!(
                "correlation matrix shape does not match {n} bin labels"
            )));
        }
        let mut m = DMatrix::zeros(n, n);
        for (i, row) in self.corr.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                m[(i, j)] = v.ok_or_else(|| {
                    Error::Numerical(format!(
                        "correlation entry ({}, {}) is undefined",
                        self.bin_labels[i], self.bin_labels[j]
                    ))
                })?;
            }
        }
        CorrelationMatrix::new(self.bin_labels.clone(), m)
    }

    /// Read and check the schema version.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("failed to read {}: {e}", path.display())))?;
        let art: Self = serde_json::from_str(&text)?;
        if art.schema_version != BIN_CORR_SCHEMA_V1 {
            return Err(Error::Validation(format!(
                "{}: unsupported schema_version '{}' (expected {BIN_CORR_SCHEMA_V1})",
                path.display(),
                art.schema_version
            )));
        }
        Ok(art)
    }

    /// Write as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}
