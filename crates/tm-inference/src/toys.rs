//! Independent Poisson toys.
//!
//! Used where bins carry no inter-bin correlation: the mass-independent
//! control region and its Barlow-Beeston global observables.

use rand::Rng;
use rand_distr::{Distribution, Poisson};
use tm_core::{Error, ExpectedYields, Result};

/// Agreement required between control-region histograms of different masses.
pub const CONTROL_REGION_TOLERANCE: f64 = 1e-12;

/// Fixed-width vector per toy, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorToys {
    n_bins: usize,
    data: Vec<f64>,
}

impl VectorToys {
    /// Empty set of `n_bins`-wide toys.
    pub fn new(n_bins: usize) -> Self {
        Self { n_bins, data: Vec::new() }
    }

    /// Wrap row-major data.
    pub fn from_rows(n_bins: usize, data: Vec<f64>) -> Result<Self> {
        if (n_bins == 0 && !data.is_empty()) || (n_bins > 0 && data.len() % n_bins != 0) {
            return Err(Error::Validation(format!(
                "toy data length {} does not fit rows of width {n_bins}",
                data.len()
            )));
        }
        Ok(Self { n_bins, data })
    }

    /// Append one toy.
    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.n_bins {
            return Err(Error::Validation(format!(
                "toy row has {} entries, expected {}",
                row.len(),
                self.n_bins
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Width of each toy.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Number of toys.
    pub fn n_toys(&self) -> usize {
        if self.n_bins == 0 { 0 } else { self.data.len() / self.n_bins }
    }

    /// Toy `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_bins..(i + 1) * self.n_bins]
    }

    /// Iterate over toys.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks(self.n_bins.max(1))
    }

    /// Flat row-major view.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Per-bin mean over toys (empty if there are no toys).
    pub fn mean(&self) -> Vec<f64> {
        let n = self.n_toys();
        if n == 0 {
            return Vec::new();
        }
        let mut acc = vec![0.0; self.n_bins];
        for row in self.rows() {
            for (a, x) in acc.iter_mut().zip(row) {
                *a += x;
            }
        }
        acc.iter().map(|a| a / n as f64).collect()
    }
}

fn poisson_dists(expected: &[f64]) -> Result<Vec<Option<Poisson<f64>>>> {
    expected
        .iter()
        .map(|&lam| {
            if !lam.is_finite() || lam <= 0.0 {
                // Poisson(0) is deterministically 0; negative or non-finite
                // expectations are treated the same way.
                return Ok(None);
            }
            Poisson::new(lam)
                .map(Some)
                .map_err(|e| Error::Computation(format!("Poisson({lam}): {e}")))
        })
        .collect()
}

/// Sample `n_toys` independent Poisson vectors, toy by toy.
pub fn poisson_toys<R: Rng + ?Sized>(
    expected: &[f64],
    n_toys: usize,
    rng: &mut R,
) -> Result<VectorToys> {
    let dists = poisson_dists(expected)?;
    let mut out = VectorToys::new(expected.len());
    out.data.reserve(n_toys * expected.len());
    for _ in 0..n_toys {
        for d in &dists {
            out.data.push(d.as_ref().map_or(0.0, |p| p.sample(rng)));
        }
    }
    Ok(out)
}

/// Histogram name of the control-region expectation at `mass`.
pub fn control_region_observed_name(mass: u32) -> String {
    format!("obs_zcr_m{mass}")
}

/// Histogram name of the control-region Barlow-Beeston τ at `mass`.
pub fn control_region_tau_name(mass: u32) -> String {
    format!("tau_zcr_m{mass}")
}

/// Read a histogram that must be identical for every mass hypothesis.
pub fn mass_independent_histogram(
    yields: &dyn ExpectedYields,
    masses: &[u32],
    name_for_mass: &dyn Fn(u32) -> String,
) -> Result<Vec<f64>> {
    let (&first, rest) = masses
        .split_first()
        .ok_or_else(|| Error::Validation("no mass points given".into()))?;
    let reference = yields.histogram(&name_for_mass(first))?.to_vec();
    for &mass in rest {
        let name = name_for_mass(mass);
        let other = yields.histogram(&name)?;
        if other.len() != reference.len() {
            return Err(Error::Validation(format!(
                "histogram '{name}' has {} bins, expected {} as for mass {first}",
                other.len(),
                reference.len()
            )));
        }
        if let Some(i) = reference
            .iter()
            .zip(other)
            .position(|(a, b)| (a - b).abs() >= CONTROL_REGION_TOLERANCE)
        {
            return Err(Error::Validation(format!(
                "histogram '{name}' differs from mass {first} in bin {}: {} vs {}",
                i + 1,
                other[i],
                reference[i]
            )));
        }
    }
    Ok(reference)
}

/// Pseudo-data and global-observable toys for the control region.
#[derive(Debug, Clone)]
pub struct ControlRegionToys {
    /// Poisson pseudo-data around the expected yield.
    pub pseudodata: VectorToys,
    /// Poisson global observables around τ.
    pub globs: VectorToys,
}

/// Generate control-region toys.
///
/// All pseudo-data toys are drawn before all global-observable toys from the
/// same generator.
pub fn control_region_toys<R: Rng + ?Sized>(
    yields: &dyn ExpectedYields,
    masses: &[u32],
    n_toys: usize,
    rng: &mut R,
) -> Result<ControlRegionToys> {
    let expected = mass_independent_histogram(yields, masses, &control_region_observed_name)?;
    let tau = mass_independent_histogram(yields, masses, &control_region_tau_name)?;
    if expected.len() != tau.len() {
        return Err(Error::Validation(format!(
            "control region has {} observed bins but {} tau bins",
            expected.len(),
            tau.len()
        )));
    }
    tracing::info!(n_bins = expected.len(), n_toys, "generating control-region toys");
    let pseudodata = poisson_toys(&expected, n_toys, rng)?;
    let globs = poisson_toys(&tau, n_toys, rng)?;
    Ok(ControlRegionToys { pseudodata, globs })
}
