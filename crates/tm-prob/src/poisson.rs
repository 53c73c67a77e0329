//! Poisson distribution utilities.
//!
//! [`PoissonQuantile`] tabulates the CDF and survival function of a single
//! Poisson rate once, so that the Gaussian-copula transform can map hundreds
//! of thousands of uniforms per bin through the inverse CDF with a binary
//! search each.

use statrs::function::gamma::ln_gamma;
use tm_core::{Error, Result};

/// Half-width of the tabulated support in units of `sqrt(lambda)`.
const TABLE_SIGMAS: f64 = 40.0;
/// Fixed padding of the tabulated support (dominates for small rates).
const TABLE_PAD: f64 = 40.0;
/// Largest rate for which a quantile table is built.
pub const MAX_TABLE_RATE: f64 = 1.0e8;

/// Poisson log-pmf at `k` for rate `lambda > 0`.
pub fn ln_pmf(k: u64, lambda: f64) -> Result<f64> {
    if !lambda.is_finite() || lambda <= 0.0 {
        return Err(Error::Validation(format!("lambda must be finite and > 0, got {lambda}")));
    }
    let kf = k as f64;
    Ok(kf * lambda.ln() - lambda - ln_gamma(kf + 1.0))
}

/// Tabulated inverse CDF of `Poisson(lambda)`.
///
/// Follows the convention of returning the smallest `k` with `CDF(k) >= u`.
/// Support below `lambda - 40 sqrt(lambda) - 40` and above
/// `lambda + 40 sqrt(lambda) + 40` carries no representable probability mass
/// and is not tabulated.
#[derive(Debug, Clone)]
pub struct PoissonQuantile {
    k_min: u64,
    /// `cdf[i] = P(X <= k_min + i)`
    cdf: Vec<f64>,
    /// `sf[i] = P(X > k_min + i)`
    sf: Vec<f64>,
}

impl PoissonQuantile {
    /// Build the table for `lambda` (finite, `0 < lambda <= MAX_TABLE_RATE`).
    pub fn new(lambda: f64) -> Result<Self> {
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(Error::Numerical(format!(
                "Poisson rate must be finite and > 0, got {lambda}"
            )));
        }
        if lambda > MAX_TABLE_RATE {
            return Err(Error::Validation(format!(
                "Poisson rate {lambda} exceeds the tabulation limit {MAX_TABLE_RATE}"
            )));
        }

        let half_width = TABLE_SIGMAS * lambda.sqrt() + TABLE_PAD;
        let k_min = (lambda - half_width).floor().max(0.0) as u64;
        let k_max = (lambda + half_width).ceil() as u64;
        let n = (k_max - k_min + 1) as usize;

        let pmf: Vec<f64> =
            (k_min..=k_max).map(|k| ln_pmf(k, lambda).map(f64::exp)).collect::<Result<_>>()?;

        let mut cdf = Vec::with_capacity(n);
        let mut acc = 0.0f64;
        for &p in &pmf {
            acc += p;
            cdf.push(acc.min(1.0));
        }

        // Accumulate the upper tail from the top so small tail probabilities
        // keep full relative precision.
        let mut sf = vec![0.0; n];
        let mut tail = 0.0f64;
        for i in (0..n).rev() {
            sf[i] = tail.min(1.0);
            tail += pmf[i];
        }

        Ok(Self { k_min, cdf, sf })
    }

    /// `P(X <= k)`.
    pub fn cdf(&self, k: u64) -> f64 {
        if k < self.k_min {
            return 0.0;
        }
        let i = (k - self.k_min) as usize;
        self.cdf.get(i).copied().unwrap_or(1.0)
    }

    /// Smallest `k` with `P(X <= k) >= u`.
    pub fn quantile(&self, u: f64) -> u64 {
        if u.is_nan() || u <= 0.0 {
            return self.k_min;
        }
        let i = self.cdf.partition_point(|&c| c < u);
        self.k_min + i.min(self.cdf.len() - 1) as u64
    }

    /// Quantile at `1 - s`, computed from the survival function.
    ///
    /// Returns the smallest `k` with `P(X > k) <= s`, which equals
    /// `quantile(1 - s)` without losing `s` to rounding when `s` is tiny.
    pub fn quantile_upper(&self, s: f64) -> u64 {
        if s.is_nan() || s <= 0.0 {
            return self.k_min + (self.sf.len() - 1) as u64;
        }
        let i = self.sf.partition_point(|&v| v > s);
        self.k_min + i.min(self.sf.len() - 1) as u64
    }
}
