//! Overlap correlations between analysis bins.
//!
//! Bins of different mass hypotheses are different discretizations of the
//! same simulated events, so their yields are correlated through the events
//! they share. For a bin pair `(i, j)` with
//!
//! - `λ1` = Σw over events in `i` but not `j`,
//! - `λ2` = Σw over events in `j` but not `i`,
//! - `λ3` = Σw over events in both,
//!
//! the correlation is `λ3 / sqrt((λ1 + λ3)(λ2 + λ3))`.

use std::collections::HashMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tm_core::{BinKey, Error, Result, check_bin_keys};

use crate::table::WeightedEventTable;

/// Symmetry tolerance for externally supplied correlation matrices.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;
/// Slack allowed beyond `[-1, 1]` (and around a unit diagonal).
pub const RANGE_TOLERANCE: f64 = 1e-9;

/// Treatment of negative overlap sums (possible with negative MC weights).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeOverlapPolicy {
    /// Set negative λ entries to 0 before forming the correlation.
    Clamp,
    /// Leave negative λ entries untouched.
    Propagate,
}

/// Diagnostics of an overlap-correlation estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapReport {
    /// Number of negative λ1 entries.
    pub negative_l1: usize,
    /// Number of negative λ2 entries.
    pub negative_l2: usize,
    /// Number of negative λ3 entries.
    pub negative_l3: usize,
    /// Whether negative entries were clamped to 0.
    pub clamped: bool,
    /// `(row, col)` positions whose correlation is undefined (zero,
    /// negative or non-finite denominator).
    pub undefined: Vec<(usize, usize)>,
    /// `(row, col)` positions whose correlation is defined but outside
    /// `[-1, 1]`, or a diagonal entry different from 1.
    #[serde(default)]
    pub out_of_range: Vec<(usize, usize)>,
}

/// Raw overlap sums (B×B, row = first bin of the pair).
#[derive(Debug, Clone)]
pub struct OverlapMatrices {
    /// Σw in row bin but not column bin.
    pub l1: DMatrix<f64>,
    /// Σw in column bin but not row bin.
    pub l2: DMatrix<f64>,
    /// Σw in both bins.
    pub l3: DMatrix<f64>,
    /// Σw² analogue of `l1`.
    pub l1_sumw2: DMatrix<f64>,
    /// Σw² analogue of `l2`.
    pub l2_sumw2: DMatrix<f64>,
    /// Σw² analogue of `l3`.
    pub l3_sumw2: DMatrix<f64>,
}

/// Validated square, finite, symmetric correlation matrix indexed by bin keys.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    bin_keys: Vec<BinKey>,
    matrix: DMatrix<f64>,
}

impl CorrelationMatrix {
    /// Validate and wrap `matrix`, whose rows/columns follow `bin_keys`.
    pub fn new(bin_keys: Vec<BinKey>, matrix: DMatrix<f64>) -> Result<Self> {
        check_bin_keys(&bin_keys)?;
        let n = bin_keys.len();
        if matrix.nrows() != n || matrix.ncols() != n {
            return Err(Error::Validation(format!(
                "correlation matrix is {}x{}, expected {n}x{n} from the bin labels",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        for i in 0..n {
            for j in 0..n {
                let v = matrix[(i, j)];
                if !v.is_finite() {
                    return Err(Error::Numerical(format!(
                        "correlation entry ({}, {}) is undefined ({v})",
                        bin_keys[i], bin_keys[j]
                    )));
                }
                let off = if i == j { (v - 1.0).abs() } else { v.abs() - 1.0 };
                if off > RANGE_TOLERANCE {
                    return Err(Error::Numerical(format!(
                        "correlation entry ({}, {}) = {v} is not a valid correlation",
                        bin_keys[i], bin_keys[j]
                    )));
                }
                if j > i && (v - matrix[(j, i)]).abs() > SYMMETRY_TOLERANCE {
                    return Err(Error::Validation(format!(
                        "correlation matrix is not symmetric at ({}, {}): {v} vs {}",
                        bin_keys[i],
                        bin_keys[j],
                        matrix[(j, i)]
                    )));
                }
            }
        }
        Ok(Self { bin_keys, matrix })
    }

    /// Bin keys fixing the row/column order.
    pub fn bin_keys(&self) -> &[BinKey] {
        &self.bin_keys
    }

    /// The dense matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Number of bins.
    pub fn dim(&self) -> usize {
        self.bin_keys.len()
    }
}

/// Result of [`estimate_correlation`].
#[derive(Debug, Clone)]
pub struct CorrelationEstimate {
    /// Bin keys fixing the row/column order.
    pub bin_keys: Vec<BinKey>,
    /// Correlation matrix; undefined entries are NaN and listed in `report`.
    pub matrix: DMatrix<f64>,
    /// Overlap sums the matrix was formed from.
    pub overlaps: OverlapMatrices,
    /// Negative-sum counts and undefined entries.
    pub report: OverlapReport,
}

impl CorrelationEstimate {
    /// The correlation matrix, refusing estimates with undefined entries.
    pub fn checked_matrix(&self) -> Result<CorrelationMatrix> {
        if let Some(&(i, j)) = self.report.undefined.first() {
            return Err(Error::Numerical(format!(
                "{} undefined correlation entries, first at ({}, {})",
                self.report.undefined.len(),
                self.bin_keys[i],
                self.bin_keys[j]
            )));
        }
        if let Some(&(i, j)) = self.report.out_of_range.first() {
            return Err(Error::Numerical(format!(
                "{} correlation entries outside [-1, 1], first at ({}, {}) = {}",
                self.report.out_of_range.len(),
                self.bin_keys[i],
                self.bin_keys[j],
                self.matrix[(i, j)]
            )));
        }
        CorrelationMatrix::new(self.bin_keys.clone(), self.matrix.clone())
    }
}

/// Estimate the bin×bin correlation matrix from event-weight overlaps.
///
/// Overlaps are accumulated in a single pass: every event contributes to the
/// λ3 cell of each pair of bins it belongs to (at most one bin per mass
/// hypothesis). The set differences follow as `λ1(i,j) = S_i - λ3(i,j)` with
/// `S_i = λ3(i,i)`; event counts are tracked alongside so that an empty set
/// difference is exactly zero rather than a rounding residue.
pub fn estimate_correlation(
    table: &WeightedEventTable,
    bin_keys: &[BinKey],
    policy: NegativeOverlapPolicy,
) -> Result<CorrelationEstimate> {
    check_bin_keys(bin_keys)?;
    let n = bin_keys.len();

    let index: HashMap<BinKey, usize> = bin_keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    let mut masses: Vec<u32> = bin_keys.iter().map(|k| k.mass).collect();
    masses.sort_unstable();
    masses.dedup();
    let columns: Vec<(u32, &[u32])> =
        masses.iter().map(|&m| table.bin_column(m).map(|c| (m, c))).collect::<Result<_>>()?;

    let mut sumw = vec![0.0f64; n * n];
    let mut sumw2 = vec![0.0f64; n * n];
    let mut counts = vec![0u64; n * n];
    let mut members: Vec<usize> = Vec::with_capacity(columns.len());

    for (e, &w) in table.weights().iter().enumerate() {
        members.clear();
        for &(mass, col) in &columns {
            let bin = col[e];
            if bin == 0 {
                continue;
            }
            if let Some(&i) = index.get(&BinKey { mass, bin }) {
                members.push(i);
            }
        }
        let w2 = w * w;
        for &a in &members {
            for &b in &members {
                let cell = a * n + b;
                sumw[cell] += w;
                sumw2[cell] += w2;
                counts[cell] += 1;
            }
        }
    }

    let set_difference = |vals: &[f64], i: usize, j: usize| -> f64 {
        if counts[i * n + i] == counts[i * n + j] { 0.0 } else { vals[i * n + i] - vals[i * n + j] }
    };

    let mut l3 = DMatrix::from_fn(n, n, |i, j| sumw[i * n + j]);
    let l3_sumw2 = DMatrix::from_fn(n, n, |i, j| sumw2[i * n + j]);
    let mut l1 = DMatrix::from_fn(n, n, |i, j| set_difference(&sumw, i, j));
    let mut l2 = DMatrix::from_fn(n, n, |i, j| set_difference(&sumw, j, i));
    let l1_sumw2 = DMatrix::from_fn(n, n, |i, j| set_difference(&sumw2, i, j));
    let l2_sumw2 = DMatrix::from_fn(n, n, |i, j| set_difference(&sumw2, j, i));

    let count_negative = |m: &DMatrix<f64>| m.iter().filter(|v| **v < 0.0).count();
    let negative_l1 = count_negative(&l1);
    let negative_l2 = count_negative(&l2);
    let negative_l3 = count_negative(&l3);

    let clamped = policy == NegativeOverlapPolicy::Clamp;
    if clamped {
        tracing::info!(negative_l1, negative_l2, negative_l3, "clamping negative overlap sums to 0");
        for m in [&mut l1, &mut l2, &mut l3] {
            m.apply(|v| {
                if *v < 0.0 {
                    *v = 0.0;
                }
            });
        }
    } else if negative_l1 + negative_l2 + negative_l3 > 0 {
        tracing::warn!(negative_l1, negative_l2, negative_l3, "negative overlap sums left in place");
    }

    let mut undefined = Vec::new();
    let mut out_of_range = Vec::new();
    let matrix = DMatrix::from_fn(n, n, |i, j| {
        let denom = (l1[(i, j)] + l3[(i, j)]) * (l2[(i, j)] + l3[(i, j)]);
        let rho = l3[(i, j)] / denom.sqrt();
        if denom.is_nan() || denom <= 0.0 || !rho.is_finite() {
            undefined.push((i, j));
            return f64::NAN;
        }
        let off = if i == j { (rho - 1.0).abs() } else { rho.abs() - 1.0 };
        if off > RANGE_TOLERANCE {
            out_of_range.push((i, j));
        }
        rho
    });
    undefined.sort_unstable();
    out_of_range.sort_unstable();
    if !undefined.is_empty() {
        tracing::warn!(count = undefined.len(), "undefined correlation entries");
    }
    if !out_of_range.is_empty() {
        tracing::warn!(count = out_of_range.len(), "correlation entries outside [-1, 1]");
    }

    Ok(CorrelationEstimate {
        bin_keys: bin_keys.to_vec(),
        matrix,
        overlaps: OverlapMatrices { l1, l2, l3, l1_sumw2, l2_sumw2, l3_sumw2 },
        report: OverlapReport {
            negative_l1,
            negative_l2,
            negative_l3,
            clamped,
            undefined,
            out_of_range,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn keys(pairs: &[(u32, u32)]) -> Vec<BinKey> {
        pairs.iter().map(|&(mass, bin)| BinKey { mass, bin }).collect()
    }

    /// Brute-force mask sums, as in the defining formula.
    fn brute_force(table: &WeightedEventTable, ks: &[BinKey]) -> DMatrix<f64> {
        let n = ks.len();
        DMatrix::from_fn(n, n, |i, j| {
            let ci = table.bin_column(ks[i].mass).unwrap();
            let cj = table.bin_column(ks[j].mass).unwrap();
            let (mut l1, mut l2, mut l3) = (0.0, 0.0, 0.0);
            for (e, &w) in table.weights().iter().enumerate() {
                let in_i = ci[e] == ks[i].bin;
                let in_j = cj[e] == ks[j].bin;
                match (in_i, in_j) {
                    (true, true) => l3 += w,
                    (true, false) => l1 += w,
                    (false, true) => l2 += w,
                    _ => {}
                }
            }
            l3 / ((l1 + l3) * (l2 + l3)).sqrt()
        })
    }

    fn toy_table() -> WeightedEventTable {
        // Two mass hypotheses that split six events differently.
        WeightedEventTable::from_columns(
            vec![1.0, 2.0, 0.5, 1.5, 3.0, 0.25],
            None,
            vec![(251, vec![1, 1, 1, 2, 2, 2]), (300, vec![1, 1, 2, 2, 2, 0])],
        )
        .unwrap()
    }

    #[test]
    fn test_matches_brute_force_and_properties() {
        let table = toy_table();
        let ks = table.bin_keys(&[251, 300]).unwrap();
        let est = estimate_correlation(&table, &ks, NegativeOverlapPolicy::Propagate).unwrap();
        let expected = brute_force(&table, &ks);
        let n = ks.len();
        for i in 0..n {
            assert_relative_eq!(est.matrix[(i, i)], 1.0, epsilon = 1e-15);
            for j in 0..n {
                assert_relative_eq!(est.matrix[(i, j)], expected[(i, j)], epsilon = 1e-12);
                assert_eq!(est.matrix[(i, j)], est.matrix[(j, i)]);
            }
        }
        assert!(est.report.undefined.is_empty());
        assert!(est.checked_matrix().is_ok());
    }

    #[test]
    fn test_hand_computed_entry() {
        let table = toy_table();
        let ks = keys(&[(251, 1), (300, 1)]);
        let est = estimate_correlation(&table, &ks, NegativeOverlapPolicy::Propagate).unwrap();
        // λ3 = 3.0 (events 0,1), λ1 = 0.5 (event 2), λ2 = 0.
        assert_eq!(est.overlaps.l3[(0, 1)], 3.0);
        assert_eq!(est.overlaps.l1[(0, 1)], 0.5);
        assert_eq!(est.overlaps.l2[(0, 1)], 0.0);
        assert_eq!(est.overlaps.l1[(1, 0)], 0.0);
        assert_relative_eq!(est.matrix[(0, 1)], 3.0 / (3.5f64 * 3.0).sqrt(), epsilon = 1e-15);
        // Σw² analogue of λ1 is 0.25.
        assert_eq!(est.overlaps.l1_sumw2[(0, 1)], 0.25);
    }

    #[test]
    fn test_same_mass_bins_uncorrelated() {
        let table = toy_table();
        let ks = keys(&[(251, 1), (251, 2)]);
        let est = estimate_correlation(&table, &ks, NegativeOverlapPolicy::Propagate).unwrap();
        assert_eq!(est.matrix[(0, 1)], 0.0);
    }

    #[test]
    fn test_negative_policy() {
        // Bin (1,1) has net weight -1, bin (2,1) contains one of its events.
        let table = WeightedEventTable::from_columns(
            vec![-3.0, 2.0, 1.0],
            None,
            vec![(1, vec![1, 1, 2]), (2, vec![1, 0, 1])],
        )
        .unwrap();
        let ks = keys(&[(1, 1), (2, 1)]);

        let prop = estimate_correlation(&table, &ks, NegativeOverlapPolicy::Propagate).unwrap();
        assert_eq!(prop.report.negative_l3, 4);
        assert_eq!(prop.report.negative_l1, 0);
        assert!(!prop.report.clamped);
        // λ3(0,0) = -1 gives a diagonal of -1; the off-diagonal leaves [-1, 1].
        assert_eq!(prop.report.out_of_range, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(matches!(prop.checked_matrix(), Err(Error::Numerical(_))));

        let clamp = estimate_correlation(&table, &ks, NegativeOverlapPolicy::Clamp).unwrap();
        assert!(clamp.report.clamped);
        assert_eq!(clamp.report.negative_l3, prop.report.negative_l3);
        assert!(clamp.overlaps.l1.iter().all(|v| *v >= 0.0));
        assert!(clamp.overlaps.l3.iter().all(|v| *v >= 0.0));
        // Every λ3 is clamped to 0: diagonals become 0/0, off-diagonals 0.
        assert_eq!(clamp.report.undefined, vec![(0, 0), (1, 1)]);
        assert_eq!(clamp.matrix[(0, 1)], 0.0);
        assert!(matches!(clamp.checked_matrix(), Err(Error::Numerical(_))));
    }

    #[test]
    fn test_rejects_bad_keys() {
        let table = toy_table();
        assert!(
            estimate_correlation(&table, &keys(&[(251, 1), (251, 1)]), NegativeOverlapPolicy::Clamp)
                .is_err()
        );
        assert!(
            estimate_correlation(&table, &keys(&[(999, 1)]), NegativeOverlapPolicy::Clamp).is_err()
        );
    }

    #[test]
    fn test_correlation_matrix_validation() {
        let ks = keys(&[(1, 1), (1, 2)]);
        let ok = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 1.0]);
        assert!(CorrelationMatrix::new(ks.clone(), ok).is_ok());
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.4, 1.0]);
        assert!(matches!(CorrelationMatrix::new(ks.clone(), asym), Err(Error::Validation(_))));
        let nan = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, f64::NAN, 1.0]);
        assert!(matches!(CorrelationMatrix::new(ks.clone(), nan), Err(Error::Numerical(_))));
        let wrong = DMatrix::from_element(3, 3, 0.0);
        assert!(CorrelationMatrix::new(ks, wrong).is_err());
    }
}
