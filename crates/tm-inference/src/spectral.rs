//! Spectral decomposition of correlation matrices.
//!
//! Empirical overlap correlations are close to singular: many bins are
//! near-duplicates across neighbouring mass hypotheses. The symmetric
//! eigen-solver then returns eigenvalues scattered around zero at the level
//! of rounding noise. Those are clipped to exactly zero; eigenvalues that are
//! clearly negative mean the input is not a correlation matrix and are
//! rejected (or clipped, if the caller asks for it).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};

use crate::correlation::CorrelationMatrix;

/// Default relative noise floor for eigenvalues.
pub const DEFAULT_EIGEN_FLOOR: f64 = 1e-12;
/// Default relative tolerance for negative eigenvalues under [`PsdPolicy::Reject`].
pub const DEFAULT_NEGATIVE_TOLERANCE: f64 = 1e-8;

/// What to do with eigenvalues below `-negative_tolerance × scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsdPolicy {
    /// Fail with [`Error::Numerical`].
    #[default]
    Reject,
    /// Clip to zero and report.
    Clip,
}

/// Decomposition settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// Eigenvalues below `eigen_floor × scale` are set to 0.
    pub eigen_floor: f64,
    /// Eigenvalues below `-negative_tolerance × scale` trigger `policy`.
    pub negative_tolerance: f64,
    /// Handling of significantly negative eigenvalues.
    pub policy: PsdPolicy,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            eigen_floor: DEFAULT_EIGEN_FLOOR,
            negative_tolerance: DEFAULT_NEGATIVE_TOLERANCE,
            policy: PsdPolicy::Reject,
        }
    }
}

/// What the decomposer did to the raw spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralReport {
    /// `max(1, max |λ|)`, the reference for relative thresholds.
    pub scale: f64,
    /// Number of eigenvalues clipped to zero (noise and, under `Clip`, negative).
    pub n_clipped: usize,
    /// Number of eigenvalues below the negative tolerance.
    pub n_significantly_negative: usize,
    /// Smallest raw eigenvalue.
    pub min_eigenvalue: f64,
    /// Largest raw eigenvalue.
    pub max_eigenvalue: f64,
}

/// Clipped eigenvalues (ascending) with their eigenvectors as columns.
#[derive(Debug, Clone)]
pub struct SpectralBasis {
    eigenvalues: DVector<f64>,
    eigenvectors: DMatrix<f64>,
}

impl SpectralBasis {
    /// Wrap an externally computed basis.
    ///
    /// Eigenvalues must be finite and non-negative; column `k` of
    /// `eigenvectors` pairs with `eigenvalues[k]`.
    pub fn from_parts(eigenvalues: DVector<f64>, eigenvectors: DMatrix<f64>) -> Result<Self> {
        let n = eigenvalues.len();
        if eigenvectors.nrows() != n || eigenvectors.ncols() != n {
            return Err(Error::Validation(format!(
                "eigenvector matrix is {}x{}, expected {n}x{n}",
                eigenvectors.nrows(),
                eigenvectors.ncols()
            )));
        }
        if let Some(v) = eigenvalues.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::Numerical(format!(
                "spectral basis has an invalid eigenvalue {v} (must be finite and >= 0)"
            )));
        }
        Ok(Self { eigenvalues, eigenvectors })
    }

    /// Eigenvalues, ascending, clipped at zero.
    pub fn eigenvalues(&self) -> &DVector<f64> {
        &self.eigenvalues
    }

    /// Eigenvectors as columns, paired with [`Self::eigenvalues`].
    pub fn eigenvectors(&self) -> &DMatrix<f64> {
        &self.eigenvectors
    }

    /// Dimension.
    pub fn dim(&self) -> usize {
        self.eigenvalues.len()
    }

    /// `V · diag(λ) · Vᵀ`.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let scaled = &self.eigenvectors * DMatrix::from_diagonal(&self.eigenvalues);
        scaled * self.eigenvectors.transpose()
    }

    /// Coloring matrix `A = diag(√λ) · Vᵀ`.
    ///
    /// For a row vector `z` of iid standard normals, `z · A` has covariance
    /// `V diag(λ) Vᵀ`.
    pub fn coloring_matrix(&self) -> DMatrix<f64> {
        let sqrt_l = self.eigenvalues.map(f64::sqrt);
        DMatrix::from_diagonal(&sqrt_l) * self.eigenvectors.transpose()
    }
}

/// Eigendecompose a correlation matrix and clip its noise-level spectrum.
pub fn decompose(
    corr: &CorrelationMatrix,
    config: &SpectralConfig,
) -> Result<(SpectralBasis, SpectralReport)> {
    if !(config.eigen_floor >= 0.0 && config.negative_tolerance >= config.eigen_floor.max(0.0)) {
        return Err(Error::Validation(format!(
            "invalid spectral thresholds: eigen_floor={}, negative_tolerance={}",
            config.eigen_floor, config.negative_tolerance
        )));
    }

    let n = corr.dim();
    let eig = corr.matrix().clone().symmetric_eigen();

    // nalgebra does not order the spectrum; sort ascending, keeping pairs.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let raw = DVector::from_iterator(n, order.iter().map(|&k| eig.eigenvalues[k]));
    let mut vectors = DMatrix::<f64>::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        vectors.set_column(dst, &eig.eigenvectors.column(src));
    }

    if raw.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("eigen-solver returned non-finite eigenvalues".into()));
    }

    let min_eigenvalue = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max_eigenvalue = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = raw.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
    let floor = config.eigen_floor * scale;
    let negative_limit = -config.negative_tolerance * scale;

    let n_significantly_negative = raw.iter().filter(|&&v| v < negative_limit).count();
    if n_significantly_negative > 0 {
        match config.policy {
            PsdPolicy::Reject => {
                return Err(Error::Numerical(format!(
                    "correlation matrix is not positive semi-definite: {n_significantly_negative} \
                     eigenvalues below {negative_limit:e} (min {min_eigenvalue:e})"
                )));
            }
            PsdPolicy::Clip => {
                tracing::warn!(
                    n_significantly_negative,
                    min_eigenvalue,
                    "clipping negative eigenvalues of a non-PSD correlation matrix"
                );
            }
        }
    }

    let mut n_clipped = 0usize;
    let eigenvalues = raw.map(|v| {
        if v < floor {
            n_clipped += 1;
            0.0
        } else {
            v
        }
    });
    tracing::debug!(n, n_clipped, min_eigenvalue, max_eigenvalue, "decomposed correlation matrix");

    let report = SpectralReport {
        scale,
        n_clipped,
        n_significantly_negative,
        min_eigenvalue,
        max_eigenvalue,
    };
    Ok((SpectralBasis { eigenvalues, eigenvectors: vectors }, report))
}
