//! Correlated pseudo-data generation.
//!
//! Latent standard normals are colored through the spectral basis of the
//! target correlation matrix and then mapped onto per-bin marginals:
//!
//! - [`SamplingMode::Gaussian`]: `x = z·√μ + μ`, matching a Poisson's first
//!   two moments, valid for large rates;
//! - [`SamplingMode::Copula`]: `x = F⁻¹_μ(Φ(z))` with `F⁻¹_μ` the Poisson
//!   quantile function, giving exactly Poisson marginals.
//!
//! Each toy consumes exactly `B` standard-normal draws from the RNG, toy by
//! toy and bin by bin, so the chunk size bounds memory without changing which
//! draws end up in which toy.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};
use tm_prob::normal::StandardNormalCdf;
use tm_prob::poisson::PoissonQuantile;

use crate::spectral::SpectralBasis;

/// Rate below which the Gaussian approximation is considered unreliable.
pub const DEFAULT_MIN_GAUSSIAN_RATE: f64 = 20.0;

/// Marginal transform applied to the correlated latent normals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Gaussian copula with Poisson marginals (non-negative integers).
    #[default]
    Copula,
    /// First-order Gaussian approximation `z·√μ + μ`.
    Gaussian,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::Copula => write!(f, "copula"),
            SamplingMode::Gaussian => write!(f, "gaussian"),
        }
    }
}

impl FromStr for SamplingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "copula" | "poisson" => Ok(SamplingMode::Copula),
            "gaussian" | "normal" => Ok(SamplingMode::Gaussian),
            other => Err(Error::Validation(format!(
                "unknown sampling mode '{other}' (expected copula or gaussian)"
            ))),
        }
    }
}

/// Sampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Marginal transform.
    pub mode: SamplingMode,
    /// Warn in Gaussian mode when the smallest rate is below this.
    pub min_gaussian_rate: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { mode: SamplingMode::Copula, min_gaussian_rate: DEFAULT_MIN_GAUSSIAN_RATE }
    }
}

/// Row-major `(n_toys, n_bins)` block of pseudo-data.
#[derive(Debug, Clone, PartialEq)]
pub struct ToyBatch {
    n_bins: usize,
    mode: SamplingMode,
    data: Vec<f64>,
}

impl ToyBatch {
    /// Empty batch with `n_bins` columns.
    pub fn new(n_bins: usize, mode: SamplingMode) -> Result<Self> {
        Self::from_rows(n_bins, mode, Vec::new())
    }

    /// Wrap row-major data; `data.len()` must be a multiple of `n_bins`.
    pub fn from_rows(n_bins: usize, mode: SamplingMode, data: Vec<f64>) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("toy batch needs at least one bin".into()));
        }
        if data.len() % n_bins != 0 {
            return Err(Error::Validation(format!(
                "toy data length {} is not a multiple of n_bins={n_bins}",
                data.len()
            )));
        }
        Ok(Self { n_bins, mode, data })
    }

    /// Number of toys (rows).
    pub fn n_toys(&self) -> usize {
        self.data.len() / self.n_bins
    }

    /// Number of bins (columns).
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Marginal transform the rows were produced with.
    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Row `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_bins..(i + 1) * self.n_bins]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.data.chunks_exact(self.n_bins)
    }

    /// Flat row-major view.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Append the rows of `other`.
    pub fn extend(&mut self, other: ToyBatch) -> Result<()> {
        if other.n_bins != self.n_bins || other.mode != self.mode {
            return Err(Error::Validation(format!(
                "cannot append a {}-bin {} batch to a {}-bin {} batch",
                other.n_bins, other.mode, self.n_bins, self.mode
            )));
        }
        self.data.extend(other.data);
        Ok(())
    }

    /// Column `j` as an owned vector.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows().map(|r| r[j]).collect()
    }
}

/// Multiply all rates by `ceil(min_rate / min(rates))`.
///
/// Returns the scaled rates and the factor. A factor of 1 means the rates
/// were already in the Gaussian regime.
pub fn scale_to_gaussian_regime(rates: &[f64], min_rate: f64) -> Result<(Vec<f64>, f64)> {
    if !(min_rate.is_finite() && min_rate > 0.0) {
        return Err(Error::Validation(format!("min_rate must be finite and > 0, got {min_rate}")));
    }
    check_rates(rates)?;
    let lowest = rates.iter().copied().fold(f64::INFINITY, f64::min);
    let factor = (min_rate / lowest).ceil().max(1.0);
    Ok((rates.iter().map(|r| r * factor).collect(), factor))
}

fn check_rates(rates: &[f64]) -> Result<()> {
    if rates.is_empty() {
        return Err(Error::Validation("rate vector is empty".into()));
    }
    if let Some((i, r)) = rates.iter().enumerate().find(|(_, r)| !(r.is_finite() && **r > 0.0)) {
        return Err(Error::Numerical(format!(
            "expected rate of bin {i} is {r}; Poisson and Gaussian sampling need a finite rate > 0"
        )));
    }
    Ok(())
}

/// Correlated toy generator for one rate vector and one correlation structure.
#[derive(Debug, Clone)]
pub struct CorrelatedSampler {
    /// `diag(√λ)·Vᵀ`, so that a row `z` of iid normals maps to `z·A`.
    coloring: DMatrix<f64>,
    rates: Vec<f64>,
    sqrt_rates: Vec<f64>,
    quantiles: Vec<PoissonQuantile>,
    normal: StandardNormalCdf,
    mode: SamplingMode,
}

impl CorrelatedSampler {
    /// Prepare a sampler.
    ///
    /// Fails with [`Error::Numerical`] if any rate is zero, negative or
    /// non-finite, and with [`Error::Validation`] if the number of rates does
    /// not match the basis.
    pub fn new(basis: &SpectralBasis, rates: &[f64], config: &SamplerConfig) -> Result<Self> {
        if rates.len() != basis.dim() {
            return Err(Error::Validation(format!(
                "rate vector has {} entries but the correlation matrix has {} bins",
                rates.len(),
                basis.dim()
            )));
        }
        check_rates(rates)?;

        let min_rate = rates.iter().copied().fold(f64::INFINITY, f64::min);
        let quantiles = match config.mode {
            SamplingMode::Copula => {
                rates.iter().map(|&r| PoissonQuantile::new(r)).collect::<Result<Vec<_>>>()?
            }
            SamplingMode::Gaussian => {
                if min_rate < config.min_gaussian_rate {
                    tracing::warn!(
                        min_rate,
                        threshold = config.min_gaussian_rate,
                        "Gaussian approximation used below the large-rate regime"
                    );
                }
                Vec::new()
            }
        };

        Ok(Self {
            coloring: basis.coloring_matrix(),
            rates: rates.to_vec(),
            sqrt_rates: rates.iter().map(|r| r.sqrt()).collect(),
            quantiles,
            normal: StandardNormalCdf::new()?,
            mode: config.mode,
        })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.rates.len()
    }

    /// Target rates.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Marginal transform.
    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// `n_toys × B` correlated standard normals.
    pub fn latent_normals<R: Rng + ?Sized>(&self, n_toys: usize, rng: &mut R) -> DMatrix<f64> {
        let b = self.n_bins();
        let iid = DMatrix::from_row_iterator(
            n_toys,
            b,
            (0..n_toys * b).map(|_| rng.sample::<f64, _>(StandardNormal)),
        );
        iid * &self.coloring
    }

    /// Map latent normals onto the marginals of this sampler's mode.
    pub fn transform(&self, latent: &DMatrix<f64>) -> Result<ToyBatch> {
        let b = self.n_bins();
        if latent.ncols() != b {
            return Err(Error::Validation(format!(
                "latent block has {} columns, expected {b}",
                latent.ncols()
            )));
        }
        let n = latent.nrows();
        let mut data = Vec::with_capacity(n * b);
        for i in 0..n {
            for j in 0..b {
                let z = latent[(i, j)];
                let x = match self.mode {
                    SamplingMode::Gaussian => z * self.sqrt_rates[j] + self.rates[j],
                    SamplingMode::Copula => {
                        let q = &self.quantiles[j];
                        let k = if z <= 0.0 {
                            q.quantile(self.normal.cdf(z))
                        } else {
                            q.quantile_upper(self.normal.sf(z))
                        };
                        k as f64
                    }
                };
                data.push(x);
            }
        }
        ToyBatch::from_rows(b, self.mode, data)
    }

    /// Generate `n_toys` rows in chunks of at most `chunk_size`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n_toys: usize,
        chunk_size: usize,
        rng: &mut R,
    ) -> Result<ToyBatch> {
        if chunk_size == 0 {
            return Err(Error::Validation("chunk_size must be > 0".into()));
        }
        let mut out = ToyBatch::new(self.n_bins(), self.mode)?;
        out.data.reserve(n_toys * self.n_bins());
        let mut done = 0usize;
        while done < n_toys {
            let n = chunk_size.min(n_toys - done);
            let latent = self.latent_normals(n, rng);
            out.extend(self.transform(&latent)?)?;
            done += n;
            tracing::debug!(done, n_toys, "generated toy chunk");
        }
        Ok(out)
    }
}
