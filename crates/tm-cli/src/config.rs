//! Analysis configuration.
//!
//! Loaded once at startup from an optional YAML or JSON file and passed by
//! reference to every command. Every field has a default, so an empty file
//! (or no file) reproduces the standard analysis setup.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tm_core::{Channel, MASS_POINTS, SampleGroup};
use tm_inference::globs::{
    DEFAULT_ALPHA_PREFIX, DEFAULT_TAU_TOLERANCE, DEFAULT_TOY_MEAN_TOLERANCE, DEFAULT_TRUNCATION,
};
use tm_inference::sampler::DEFAULT_MIN_GAUSSIAN_RATE;
use tm_inference::spectral::{DEFAULT_EIGEN_FLOOR, DEFAULT_NEGATIVE_TOLERANCE};
use tm_inference::{PsdPolicy, SpectralConfig, TauBootstrapConfig};
use tm_translate::EventTableColumns;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Mass hypotheses, in any order (bin labels sort them).
    pub mass_points: Vec<u32>,
    pub weight_column: String,
    pub sample_column: String,
    /// Bin-assignment column with a `{mass}` placeholder.
    pub bin_column_template: String,
    /// Weight corrections applied by `make-corr` only.
    pub scale_factors: BTreeMap<SampleGroup, f64>,
    pub seeds: SeedConfig,
    pub sampling: SamplingSettings,
    pub globs: GlobSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mass_points: MASS_POINTS.to_vec(),
            weight_column: "weight".into(),
            sample_column: "sample".into(),
            bin_column_template: "PNN{mass}Bin".into(),
            scale_factors: BTreeMap::from([
                (SampleGroup::ZHeavyFlavour, 1.35),
                (SampleGroup::Ttbar, 0.97),
            ]),
            seeds: SeedConfig::default(),
            sampling: SamplingSettings::default(),
            globs: GlobSettings::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn columns(&self) -> EventTableColumns {
        EventTableColumns {
            weight: self.weight_column.clone(),
            sample: self.sample_column.clone(),
            bin_column_template: self.bin_column_template.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.mass_points.is_empty() {
            bail!("mass_points must not be empty");
        }
        if self.sampling.n_chunks == 0 || self.sampling.chunk_size == 0 {
            bail!("sampling.n_chunks and sampling.chunk_size must be > 0");
        }
        if let Some((g, f)) = self.scale_factors.iter().find(|(_, f)| !(f.is_finite() && **f > 0.0)) {
            bail!("scale factor for {g:?} must be finite and > 0, got {f}");
        }
        Ok(())
    }
}

/// Seeds for one value per analysis channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSeeds {
    pub hadhad: u64,
    pub slt: u64,
    pub ltt: u64,
}

impl ChannelSeeds {
    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Hadhad => self.hadhad,
            Channel::Slt => self.slt,
            Channel::Ltt => self.ltt,
        }
    }
}

/// Distinct, fixed seeds per command keep every artifact reproducible and
/// the random streams of different channels independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedConfig {
    pub generate: ChannelSeeds,
    pub gamma_globs: ChannelSeeds,
    pub alpha_globs: u64,
    pub control_region: u64,
    pub compare_large_sample: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            generate: ChannelSeeds { hadhad: 1234679123, slt: 2384761236, ltt: 9523609123 },
            gamma_globs: ChannelSeeds { hadhad: 9312347923, slt: 3234761236, ltt: 6923601232 },
            alpha_globs: 64782119739,
            control_region: 45402781074,
            compare_large_sample: 96667258605,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingSettings {
    pub n_chunks: usize,
    pub chunk_size: usize,
    pub eigen_floor: f64,
    pub negative_eigen_tolerance: f64,
    pub psd_policy: PsdPolicy,
    pub min_gaussian_rate: f64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            n_chunks: 50,
            chunk_size: 10_000,
            eigen_floor: DEFAULT_EIGEN_FLOOR,
            negative_eigen_tolerance: DEFAULT_NEGATIVE_TOLERANCE,
            psd_policy: PsdPolicy::Reject,
            min_gaussian_rate: DEFAULT_MIN_GAUSSIAN_RATE,
        }
    }
}

impl SamplingSettings {
    pub fn spectral(&self) -> SpectralConfig {
        SpectralConfig {
            eigen_floor: self.eigen_floor,
            negative_tolerance: self.negative_eigen_tolerance,
            policy: self.psd_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobSettings {
    pub n_toys: usize,
    pub tau_tolerance: f64,
    pub toy_mean_tolerance: f64,
    pub alpha_prefix: String,
    pub truncation: f64,
}

impl Default for GlobSettings {
    fn default() -> Self {
        Self {
            n_toys: 20_000,
            tau_tolerance: DEFAULT_TAU_TOLERANCE,
            toy_mean_tolerance: DEFAULT_TOY_MEAN_TOLERANCE,
            alpha_prefix: DEFAULT_ALPHA_PREFIX.into(),
            truncation: DEFAULT_TRUNCATION,
        }
    }
}

impl GlobSettings {
    pub fn tau_bootstrap(&self) -> TauBootstrapConfig {
        TauBootstrapConfig {
            tau_tolerance: self.tau_tolerance,
            toy_mean_tolerance: self.toy_mean_tolerance,
        }
    }
}

/// Load the configuration; `None` gives the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: AnalysisConfig = if ext == "json" {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid JSON config {}", path.display()))?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes)
            .with_context(|| format!("invalid YAML config {}", path.display()))?
    };
    cfg.validate()?;
    tracing::debug!(path = %path.display(), "loaded analysis config");
    Ok(cfg)
}
