//! Moment and correlation checks for generated toys.
//!
//! Everything here is read-only: it recomputes empirical moments of a
//! [`ToyBatch`] and compares them with the rates and correlation matrix the
//! batch was generated from.

use nalgebra::DMatrix;
use serde::Serialize;
use tm_core::{Error, Result};

use crate::correlation::CorrelationMatrix;
use crate::sampler::{SamplingMode, ToyBatch};

/// Rows per block of the centered cross-product.
const CROSS_PRODUCT_CHUNK: usize = 4096;

/// Empirical first and second moments of a toy batch (population, ddof 0).
#[derive(Debug, Clone)]
pub struct ToyMoments {
    /// Per-bin mean.
    pub means: Vec<f64>,
    /// Per-bin variance.
    pub variances: Vec<f64>,
    /// Pearson correlation; `NaN` where a bin has zero variance.
    pub corr: DMatrix<f64>,
}

/// Compute means, variances and the Pearson correlation of `batch`.
pub fn toy_moments(batch: &ToyBatch) -> Result<ToyMoments> {
    let n = batch.n_toys();
    let b = batch.n_bins();
    if n < 2 {
        return Err(Error::Validation(format!("need at least 2 toys for moments, got {n}")));
    }

    let mut means = vec![0.0; b];
    for row in batch.rows() {
        for (m, x) in means.iter_mut().zip(row) {
            *m += x;
        }
    }
    let nf = n as f64;
    means.iter_mut().for_each(|m| *m /= nf);

    let mut cov = DMatrix::<f64>::zeros(b, b);
    let mut start = 0;
    while start < n {
        let end = (start + CROSS_PRODUCT_CHUNK).min(n);
        let block = DMatrix::from_fn(end - start, b, |i, j| batch.row(start + i)[j] - means[j]);
        cov += block.tr_mul(&block);
        start = end;
    }
    cov /= nf;

    let variances: Vec<f64> = (0..b).map(|j| cov[(j, j)]).collect();
    let corr = DMatrix::from_fn(b, b, |i, j| {
        let denom = (variances[i] * variances[j]).sqrt();
        if variances[i] > 0.0 && variances[j] > 0.0 { cov[(i, j)] / denom } else { f64::NAN }
    });

    Ok(ToyMoments { means, variances, corr })
}

/// Deviation of a toy batch from its generating rates and correlation.
///
/// Relative deviations are fractions (`0.01` = 1 %); correlation deviations
/// are absolute, in percentage points, over off-diagonal pairs.
#[derive(Debug, Clone, Serialize)]
pub struct ToyValidationReport {
    /// Number of toys analysed.
    pub n_toys: usize,
    /// Number of bins.
    pub n_bins: usize,
    /// Marginal transform of the batch.
    pub mode: SamplingMode,
    /// Empirical per-bin means.
    pub means: Vec<f64>,
    /// Empirical per-bin variances.
    pub variances: Vec<f64>,
    /// `(mean - rate) / rate` per bin.
    pub mean_rel_dev: Vec<f64>,
    /// Mean of `|mean_rel_dev|`.
    pub mean_rel_dev_avg: f64,
    /// Max of `|mean_rel_dev|`.
    pub mean_rel_dev_max: f64,
    /// `(variance - rate) / rate` per bin.
    pub var_rel_dev: Vec<f64>,
    /// Mean of `|var_rel_dev|`.
    pub var_rel_dev_avg: f64,
    /// Max of `|var_rel_dev|`.
    pub var_rel_dev_max: f64,
    /// Mean absolute correlation deviation, percentage points.
    pub corr_abs_dev_mean_pp: f64,
    /// Max absolute correlation deviation, percentage points.
    pub corr_abs_dev_max_pp: f64,
    /// Off-diagonal pairs that entered the correlation statistics.
    pub n_corr_pairs: usize,
    /// Bins with zero empirical variance (excluded from correlation statistics).
    pub n_zero_variance_bins: usize,
    /// Empirical Pearson correlation.
    #[serde(skip)]
    pub empirical_corr: DMatrix<f64>,
}

fn abs_mean_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let sum: f64 = values.iter().map(|v| v.abs()).sum();
    let max = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    (sum / values.len() as f64, max)
}

/// Compare `batch` against the rates and correlation it was generated from.
pub fn validate_toys(
    batch: &ToyBatch,
    rates: &[f64],
    target: &CorrelationMatrix,
) -> Result<ToyValidationReport> {
    let b = batch.n_bins();
    if rates.len() != b || target.dim() != b {
        return Err(Error::Validation(format!(
            "toy batch has {b} bins, rates {} and correlation matrix {}",
            rates.len(),
            target.dim()
        )));
    }
    if let Some(r) = rates.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
        return Err(Error::Numerical(format!("cannot validate against a non-positive rate {r}")));
    }

    let moments = toy_moments(batch)?;
    let mean_rel_dev: Vec<f64> =
        moments.means.iter().zip(rates).map(|(m, r)| (m - r) / r).collect();
    let var_rel_dev: Vec<f64> =
        moments.variances.iter().zip(rates).map(|(v, r)| (v - r) / r).collect();
    let (mean_rel_dev_avg, mean_rel_dev_max) = abs_mean_max(&mean_rel_dev);
    let (var_rel_dev_avg, var_rel_dev_max) = abs_mean_max(&var_rel_dev);

    let n_zero_variance_bins = moments.variances.iter().filter(|v| **v <= 0.0).count();
    let mut corr_dev = Vec::new();
    for i in 0..b {
        for j in (i + 1)..b {
            let emp = moments.corr[(i, j)];
            let want = target.matrix()[(i, j)];
            if emp.is_finite() && want.is_finite() {
                corr_dev.push(100.0 * (emp - want));
            }
        }
    }
    let (corr_abs_dev_mean_pp, corr_abs_dev_max_pp) = abs_mean_max(&corr_dev);

    Ok(ToyValidationReport {
        n_toys: batch.n_toys(),
        n_bins: b,
        mode: batch.mode(),
        means: moments.means,
        variances: moments.variances,
        mean_rel_dev,
        mean_rel_dev_avg,
        mean_rel_dev_max,
        var_rel_dev,
        var_rel_dev_avg,
        var_rel_dev_max,
        corr_abs_dev_mean_pp,
        corr_abs_dev_max_pp,
        n_corr_pairs: corr_dev.len(),
        n_zero_variance_bins,
        empirical_corr: moments.corr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tm_core::BinKey;

    fn identity(n: usize) -> CorrelationMatrix {
        let keys = (1..=n as u32).map(|bin| BinKey { mass: 251, bin }).collect();
        CorrelationMatrix::new(keys, DMatrix::identity(n, n)).unwrap()
    }

    #[test]
    fn test_small_batch_by_hand() {
        let batch = ToyBatch::from_rows(
            2,
            SamplingMode::Gaussian,
            vec![1.0, 6.0, 3.0, 4.0, 5.0, 2.0],
        )
        .unwrap();
        let m = toy_moments(&batch).unwrap();
        assert_relative_eq!(m.means[0], 3.0);
        assert_relative_eq!(m.means[1], 4.0);
        assert_relative_eq!(m.variances[0], 8.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(m.corr[(0, 1)], -1.0, epsilon = 1e-12);

        let report = validate_toys(&batch, &[3.0, 5.0], &identity(2)).unwrap();
        assert_relative_eq!(report.mean_rel_dev[1], -0.2, epsilon = 1e-12);
        assert_relative_eq!(report.mean_rel_dev_avg, 0.1, epsilon = 1e-12);
        assert_relative_eq!(report.mean_rel_dev_max, 0.2, epsilon = 1e-12);
        assert_relative_eq!(report.corr_abs_dev_max_pp, 100.0, epsilon = 1e-9);
        assert_eq!(report.n_corr_pairs, 1);
    }

    #[test]
    fn test_zero_variance_bins_are_excluded() {
        let batch =
            ToyBatch::from_rows(2, SamplingMode::Copula, vec![1.0, 7.0, 3.0, 7.0]).unwrap();
        let report = validate_toys(&batch, &[2.0, 7.0], &identity(2)).unwrap();
        assert_eq!(report.n_zero_variance_bins, 1);
        assert_eq!(report.n_corr_pairs, 0);
        assert_eq!(report.corr_abs_dev_max_pp, 0.0);
        assert!(report.empirical_corr[(0, 1)].is_nan());
    }

    #[test]
    fn test_chunked_cross_product_matches_direct_sum() {
        let n = 3 * CROSS_PRODUCT_CHUNK + 17;
        let data: Vec<f64> = (0..n)
            .flat_map(|i| {
                let t = i as f64;
                [(t * 0.37).sin() * 5.0 + 10.0, (t * 0.11).cos() * 3.0 + t * 1e-3]
            })
            .collect();
        let batch = ToyBatch::from_rows(2, SamplingMode::Gaussian, data.clone()).unwrap();
        let m = toy_moments(&batch).unwrap();

        let xs: Vec<f64> = data.iter().step_by(2).copied().collect();
        let ys: Vec<f64> = data.iter().skip(1).step_by(2).copied().collect();
        let mx = xs.iter().sum::<f64>() / n as f64;
        let my = ys.iter().sum::<f64>() / n as f64;
        let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
        let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
        let syy: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
        assert_relative_eq!(m.corr[(0, 1)], sxy / (sxx * syy).sqrt(), epsilon = 1e-10);
        assert_relative_eq!(m.variances[1], syy / n as f64, epsilon = 1e-10);
    }

    #[test]
    fn test_shape_and_rate_errors() {
        let batch = ToyBatch::from_rows(2, SamplingMode::Copula, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(matches!(
            validate_toys(&batch, &[1.0], &identity(2)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_toys(&batch, &[1.0, 0.0], &identity(2)),
            Err(Error::Numerical(_))
        ));
        let single = ToyBatch::from_rows(2, SamplingMode::Copula, vec![1.0, 2.0]).unwrap();
        assert!(toy_moments(&single).is_err());
    }
}
