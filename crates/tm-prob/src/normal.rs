//! Standard-normal utilities.

use rand::Rng;
use rand_distr::StandardNormal;
use statrs::distribution::{ContinuousCDF, Normal};
use tm_core::{Error, Result};

/// Standard-normal distribution with a precomputed [`statrs`] handle.
#[derive(Debug, Clone)]
pub struct StandardNormalCdf {
    dist: Normal,
}

impl StandardNormalCdf {
    /// Construct `N(0, 1)`.
    pub fn new() -> Result<Self> {
        let dist = Normal::new(0.0, 1.0)
            .map_err(|e| Error::Computation(format!("standard normal: {e}")))?;
        Ok(Self { dist })
    }

    /// `Φ(z)`.
    #[inline]
    pub fn cdf(&self, z: f64) -> f64 {
        self.dist.cdf(z)
    }

    /// `1 - Φ(z)`, evaluated as `Φ(-z)` so that it stays accurate for large `z`.
    #[inline]
    pub fn sf(&self, z: f64) -> f64 {
        self.dist.cdf(-z)
    }
}

/// Draw from a standard normal truncated to `[-bound, bound]` by rejection.
///
/// The acceptance rate is `1 - 2Φ(-bound)`, so `bound` must be comfortably
/// positive (the global-observable toys use 5).
pub fn sample_truncated_standard<R: Rng + ?Sized>(rng: &mut R, bound: f64) -> Result<f64> {
    if !bound.is_finite() || bound < 0.5 {
        return Err(Error::Validation(format!(
            "truncation bound must be finite and >= 0.5, got {bound}"
        )));
    }
    loop {
        let z: f64 = rng.sample(StandardNormal);
        if z.abs() <= bound {
            return Ok(z);
        }
    }
}
