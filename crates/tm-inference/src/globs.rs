//! Toys for global observables.
//!
//! Two families:
//!
//! - `nom_alpha_*` observables of multiplicative systematics: independent
//!   standard normals truncated to `[-5, 5]`;
//! - Barlow-Beeston τ observables: a Poisson(1) bootstrap of the simulated
//!   events, re-summed per bin and rescaled so the toy mean is τ. Events
//!   shared between bins of different mass hypotheses receive the same
//!   bootstrap weight, which induces the inter-bin correlation.

use std::collections::BTreeSet;

use rand::Rng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use tm_core::{Channel, Error, ExpectedYields, Result};
use tm_prob::normal::sample_truncated_standard;

use crate::table::WeightedEventTable;
use crate::toys::VectorToys;

/// Name prefix of systematic-nuisance global observables.
pub const DEFAULT_ALPHA_PREFIX: &str = "nom_alpha_";
/// Truncation of the alpha toys in units of σ.
pub const DEFAULT_TRUNCATION: f64 = 5.0;
/// Accepted relative deviation between τ from the model and from the events.
pub const DEFAULT_TAU_TOLERANCE: f64 = 0.05;
/// Accepted relative deviation of the bootstrap mean from τ.
pub const DEFAULT_TOY_MEAN_TOLERANCE: f64 = 0.01;

/// Keep the names starting with `prefix`, deduplicated and sorted.
pub fn collect_alpha_names<I, S>(names: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = names
        .into_iter()
        .filter(|n| n.as_ref().starts_with(prefix))
        .map(|n| n.as_ref().to_string())
        .collect();
    set.into_iter().collect()
}

/// One row per toy, one column per named observable.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaToys {
    /// Observable names, one per column.
    pub names: Vec<String>,
    /// Toy values.
    pub values: VectorToys,
}

impl AlphaToys {
    /// Values of observable `j` across toys.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.values.rows().map(|r| r[j]).collect()
    }
}

/// Draw truncated-normal toys; within a toy, names are drawn in order.
///
/// `names` must be sorted and unique so that the column order, and with it
/// the random stream, is deterministic.
pub fn alpha_toys<R: Rng + ?Sized>(
    names: &[String],
    n_toys: usize,
    truncation: f64,
    rng: &mut R,
) -> Result<AlphaToys> {
    if names.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Validation("alpha names must be sorted and unique".into()));
    }
    let mut values = VectorToys::new(names.len());
    let mut row = vec![0.0; names.len()];
    for _ in 0..n_toys {
        for v in row.iter_mut() {
            *v = sample_truncated_standard(rng, truncation)?;
        }
        values.push_row(&row)?;
    }
    Ok(AlphaToys { names: names.to_vec(), values })
}

/// Settings of the τ bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TauBootstrapConfig {
    /// Relative tolerance of model τ vs event τ.
    pub tau_tolerance: f64,
    /// Relative tolerance of model τ vs the toy mean.
    pub toy_mean_tolerance: f64,
}

impl Default for TauBootstrapConfig {
    fn default() -> Self {
        Self { tau_tolerance: DEFAULT_TAU_TOLERANCE, toy_mean_tolerance: DEFAULT_TOY_MEAN_TOLERANCE }
    }
}

/// Bins of one mass whose relative deviation exceeded a tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationCheck {
    /// Mass hypothesis.
    pub mass: u32,
    /// Largest `|a / b - 1|` over the bins.
    pub max_rel_dev: f64,
    /// 1-based bin indices above tolerance.
    pub flagged_bins: Vec<u32>,
}

impl DeviationCheck {
    fn new(mass: u32, bins: &[u32], a: &[f64], b: &[f64], tolerance: f64) -> Self {
        let mut max_rel_dev = 0.0f64;
        let mut flagged_bins = Vec::new();
        for ((&bin, &x), &y) in bins.iter().zip(a).zip(b) {
            let dev = (x / y - 1.0).abs();
            if !dev.is_finite() || dev > tolerance {
                flagged_bins.push(bin);
            }
            if dev.is_finite() {
                max_rel_dev = max_rel_dev.max(dev);
            }
        }
        Self { mass, max_rel_dev, flagged_bins }
    }

    /// Whether any bin exceeded the tolerance.
    pub fn is_flagged(&self) -> bool {
        !self.flagged_bins.is_empty()
    }
}

/// Data-quality signals of a τ bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TauBootstrapReport {
    /// τ from the model vs τ = (Σw)² / Σw² from the events.
    pub tau_checks: Vec<DeviationCheck>,
    /// τ from the model vs the mean over toys.
    pub toy_mean_checks: Vec<DeviationCheck>,
}

#[derive(Debug, Clone)]
struct MassBins {
    mass: u32,
    bins: Vec<u32>,
    /// Bin position per event, `None` for underflow.
    slot: Vec<Option<usize>>,
    tau_ws: Vec<f64>,
    scale: Vec<f64>,
}

/// Poisson(1) bootstrap of the τ global observables of one channel.
#[derive(Debug, Clone)]
pub struct TauBootstrap {
    channel: Channel,
    weights: Vec<f64>,
    masses: Vec<MassBins>,
    config: TauBootstrapConfig,
}

impl TauBootstrap {
    /// Prepare the bootstrap from the simulated events and the model's τ.
    ///
    /// Collision-data rows are dropped. Weights are used unscaled, as in the
    /// statistical model. A bin-count mismatch between the events and the
    /// model is fatal; τ deviations are reported and logged.
    pub fn new(
        table: &WeightedEventTable,
        masses: &[u32],
        yields: &dyn ExpectedYields,
        channel: Channel,
        config: TauBootstrapConfig,
    ) -> Result<(Self, Vec<DeviationCheck>)> {
        let table = table.without_data();
        let mut per_mass = Vec::with_capacity(masses.len());
        let mut checks = Vec::with_capacity(masses.len());

        for &mass in masses {
            let sums = table.bin_sums(mass)?;
            let name = channel.tau_hist_name(mass);
            let hist = yields.histogram(&name)?;
            if hist.len() != sums.bins.len() {
                return Err(Error::Validation(format!(
                    "mass {mass}: events populate {} bins but '{name}' has {}",
                    sums.bins.len(),
                    hist.len()
                )));
            }
            let tau_ws = sums
                .bins
                .iter()
                .map(|&bin| {
                    hist.get(bin as usize - 1).copied().ok_or_else(|| {
                        Error::Validation(format!("mass {mass}: bin {bin} not in '{name}'"))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            let tau_ntuple: Vec<f64> =
                sums.sumw.iter().zip(&sums.sumw2).map(|(sw, sw2)| sw * sw / sw2).collect();
            let check =
                DeviationCheck::new(mass, &sums.bins, &tau_ws, &tau_ntuple, config.tau_tolerance);
            if check.is_flagged() {
                tracing::warn!(
                    mass,
                    max_rel_dev = check.max_rel_dev,
                    bins = ?check.flagged_bins,
                    "model tau deviates from tau computed from events"
                );
            }
            checks.push(check);

            let scale = sums
                .sumw
                .iter()
                .zip(&tau_ws)
                .zip(&sums.bins)
                .map(|((&sw, &t), &bin)| {
                    if sw == 0.0 {
                        Err(Error::Numerical(format!(
                            "mass {mass}, bin {bin}: zero sum of weights, tau scale undefined"
                        )))
                    } else {
                        Ok(t / sw)
                    }
                })
                .collect::<Result<Vec<f64>>>()?;

            let col = table.bin_column(mass)?;
            let slot = col
                .iter()
                .map(|&b| if b == 0 { None } else { sums.bins.binary_search(&b).ok() })
                .collect();
            per_mass.push(MassBins { mass, bins: sums.bins, slot, tau_ws, scale });
        }

        let boot = Self { channel, weights: table.weights().to_vec(), masses: per_mass, config };
        Ok((boot, checks))
    }

    /// Channel these observables belong to.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Mass points in generation order.
    pub fn masses(&self) -> Vec<u32> {
        self.masses.iter().map(|m| m.mass).collect()
    }

    /// Draw `n_toys` bootstrap replicas.
    ///
    /// Each toy draws one Poisson(1) weight per event, shared by all masses.
    /// Returns one [`VectorToys`] per mass (in [`Self::masses`] order) and the
    /// toy-mean checks.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        n_toys: usize,
        rng: &mut R,
    ) -> Result<(Vec<VectorToys>, Vec<DeviationCheck>)> {
        let poisson = Poisson::new(1.0)
            .map_err(|e| Error::Computation(format!("Poisson(1): {e}")))?;
        let mut out: Vec<VectorToys> =
            self.masses.iter().map(|m| VectorToys::new(m.bins.len())).collect();
        let mut toy_weight = vec![0.0; self.weights.len()];
        let mut row = Vec::new();

        for toy in 0..n_toys {
            for (tw, &w) in toy_weight.iter_mut().zip(&self.weights) {
                let pw: f64 = poisson.sample(rng);
                *tw = pw * w;
            }
            for (m, dst) in self.masses.iter().zip(out.iter_mut()) {
                row.clear();
                row.resize(m.bins.len(), 0.0);
                for (slot, &tw) in m.slot.iter().zip(&toy_weight) {
                    if let Some(k) = slot {
                        row[*k] += tw;
                    }
                }
                for (v, s) in row.iter_mut().zip(&m.scale) {
                    *v *= s;
                }
                dst.push_row(&row)?;
            }
            if (toy + 1) % 1000 == 0 {
                tracing::debug!(done = toy + 1, n_toys, "tau bootstrap progress");
            }
        }

        let mut checks = Vec::with_capacity(self.masses.len());
        if n_toys > 0 {
            for (m, toys) in self.masses.iter().zip(&out) {
                let mean = toys.mean();
                let check = DeviationCheck::new(
                    m.mass,
                    &m.bins,
                    &m.tau_ws,
                    &mean,
                    self.config.toy_mean_tolerance,
                );
                if check.is_flagged() {
                    tracing::warn!(
                        mass = m.mass,
                        max_rel_dev = check.max_rel_dev,
                        bins = ?check.flagged_bins,
                        "bootstrap mean deviates from model tau"
                    );
                }
                checks.push(check);
            }
        }
        Ok((out, checks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    struct MapYields(HashMap<String, Vec<f64>>);

    impl ExpectedYields for MapYields {
        fn histogram(&self, name: &str) -> Result<&[f64]> {
            self.0
                .get(name)
                .map(Vec::as_slice)
                .ok_or_else(|| Error::Validation(format!("missing histogram '{name}'")))
        }
    }

    /// 400 events with unit weight: 300 in bin 1 and 100 in bin 2 of mass 300;
    /// mass 400 puts all of them in bin 1. A data row is appended and must be
    /// ignored.
    fn table() -> WeightedEventTable {
        let n = 400;
        let mut weights = vec![1.0; n];
        let mut samples = vec!["ttbar".to_string(); n];
        let mut m300: Vec<u32> = (0..n).map(|i| if i < 300 { 1 } else { 2 }).collect();
        let mut m400 = vec![1u32; n];
        weights.push(5.0);
        samples.push("data".to_string());
        m300.push(2);
        m400.push(1);
        WeightedEventTable::from_columns(weights, Some(samples), [(300, m300), (400, m400)])
            .unwrap()
    }

    fn yields(tau300: Vec<f64>, tau400: Vec<f64>) -> MapYields {
        let mut m = HashMap::new();
        m.insert(Channel::Hadhad.tau_hist_name(300), tau300);
        m.insert(Channel::Hadhad.tau_hist_name(400), tau400);
        MapYields(m)
    }

    #[test]
    fn test_collect_alpha_names() {
        let names = collect_alpha_names(
            ["nom_alpha_b", "nom_gamma_x", "nom_alpha_a", "nom_alpha_b", "alpha_c"],
            DEFAULT_ALPHA_PREFIX,
        );
        assert_eq!(names, vec!["nom_alpha_a".to_string(), "nom_alpha_b".to_string()]);
    }

    #[test]
    fn test_alpha_toys_are_truncated_and_reproducible() {
        let names = collect_alpha_names(["nom_alpha_x", "nom_alpha_y"], DEFAULT_ALPHA_PREFIX);
        let a = alpha_toys(&names, 5_000, 1.0, &mut StdRng::seed_from_u64(64782119739)).unwrap();
        let b = alpha_toys(&names, 5_000, 1.0, &mut StdRng::seed_from_u64(64782119739)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.values.n_toys(), 5_000);
        assert!(a.values.as_slice().iter().all(|v| v.abs() <= 1.0));
        let mean: f64 = a.column(1).iter().sum::<f64>() / 5_000.0;
        assert!(mean.abs() < 0.05);

        let unsorted = vec!["nom_alpha_y".to_string(), "nom_alpha_x".to_string()];
        assert!(alpha_toys(&unsorted, 1, 5.0, &mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_tau_bootstrap_mean_and_shared_weights() {
        // Unit weights: τ = N per bin.
        let y = yields(vec![300.0, 100.0], vec![400.0]);
        let (boot, checks) =
            TauBootstrap::new(&table(), &[300, 400], &y, Channel::Hadhad, Default::default())
                .unwrap();
        assert!(checks.iter().all(|c| !c.is_flagged()));
        assert_eq!(boot.masses(), vec![300, 400]);

        let mut rng = StdRng::seed_from_u64(9312347923);
        let (toys, mean_checks) = boot.generate(4_000, &mut rng).unwrap();
        assert_eq!(toys[0].n_bins(), 2);
        assert_eq!(toys[1].n_bins(), 1);
        // Bin 1 of mass 400 is the sum of both mass-300 bins in every toy.
        for (a, b) in toys[0].rows().zip(toys[1].rows()) {
            assert!((a[0] + a[1] - b[0]).abs() < 1e-9);
        }
        let mean = toys[0].mean();
        assert!((mean[0] / 300.0 - 1.0).abs() < 0.01, "{mean:?}");
        assert!((mean[1] / 100.0 - 1.0).abs() < 0.01, "{mean:?}");
        assert_eq!(mean_checks.len(), 2);
    }

    #[test]
    fn test_tau_deviation_is_reported_not_fatal() {
        let y = yields(vec![330.0, 100.0], vec![400.0]);
        let (_, checks) =
            TauBootstrap::new(&table(), &[300, 400], &y, Channel::Hadhad, Default::default())
                .unwrap();
        assert_eq!(checks[0].flagged_bins, vec![1]);
        assert!((checks[0].max_rel_dev - 0.1).abs() < 1e-12);
        assert!(!checks[1].is_flagged());
    }

    #[test]
    fn test_tau_bin_count_mismatch_is_fatal() {
        let y = yields(vec![300.0], vec![400.0]);
        let err = TauBootstrap::new(&table(), &[300, 400], &y, Channel::Hadhad, Default::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
