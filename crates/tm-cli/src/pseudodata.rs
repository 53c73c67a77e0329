//! Correlated pseudo-data: `generate`, `compare-large-sample` and `validate`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tm_core::{Channel, ExpectedYields};
use tm_inference::{
    CorrelatedSampler, CorrelationMatrix, SamplerConfig, SamplingMode, ToyBatch, decompose,
    scale_to_gaussian_regime, validate_toys,
};
use tm_translate::{CorrelationArtifact, YieldsArtifact, read_pseudodata, write_pseudodata};

use crate::config::AnalysisConfig;
use crate::write_json;

/// Target correlation and the channel's expected rates in its bin order.
fn load_target(corr: &Path, yields: &Path, channel: Channel) -> Result<(CorrelationMatrix, Vec<f64>)> {
    let artifact = CorrelationArtifact::read(corr)
        .with_context(|| format!("failed to read correlation artifact {}", corr.display()))?;
    let target = artifact.correlation_matrix()?;
    let yields = YieldsArtifact::read(yields)
        .with_context(|| format!("failed to read expected yields {}", yields.display()))?;
    let rates = yields.rates_for(target.bin_keys(), &|m| channel.observed_hist_name(m))?;
    Ok((target, rates))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_generate(
    cfg: &AnalysisConfig,
    corr: &Path,
    yields: &Path,
    channel: Channel,
    outfile: Option<&PathBuf>,
    mode: SamplingMode,
    n_chunks: Option<usize>,
    chunk_size: Option<usize>,
    report: Option<&PathBuf>,
) -> Result<()> {
    let n_chunks = n_chunks.unwrap_or(cfg.sampling.n_chunks);
    let chunk_size = chunk_size.unwrap_or(cfg.sampling.chunk_size);
    let n_toys = n_chunks * chunk_size;
    if n_toys < 2 {
        anyhow::bail!(
            "validation needs at least 2 toys, got {n_chunks} chunk(s) of {chunk_size}"
        );
    }

    let (target, rates) = load_target(corr, yields, channel)?;
    let (basis, spectral) = decompose(&target, &cfg.sampling.spectral())?;
    let sampler = CorrelatedSampler::new(
        &basis,
        &rates,
        &SamplerConfig { mode, min_gaussian_rate: cfg.sampling.min_gaussian_rate },
    )?;

    let seed = cfg.seeds.generate.get(channel);
    let mut rng = StdRng::seed_from_u64(seed);
    tracing::info!(%channel, %mode, n_bins = target.dim(), n_toys, seed, "generating pseudo-data");
    let toys = sampler.sample(n_toys, chunk_size, &mut rng)?;

    let validation = validate_toys(&toys, &rates, &target)?;
    tracing::info!(
        mean_rel_dev_max = validation.mean_rel_dev_max,
        corr_abs_dev_max_pp = validation.corr_abs_dev_max_pp,
        "validation"
    );

    if let Some(path) = outfile {
        write_pseudodata(path, target.bin_keys(), &toys)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    write_json(
        report,
        serde_json::json!({
            "channel": channel.label(),
            "seed": seed,
            "n_chunks": n_chunks,
            "chunk_size": chunk_size,
            "spectral": spectral,
            "validation": validation,
        }),
    )
}

pub(crate) fn cmd_compare_large_sample(
    cfg: &AnalysisConfig,
    corr: &Path,
    yields: &Path,
    channel: Channel,
    outfile: Option<&PathBuf>,
) -> Result<()> {
    let (target, rates) = load_target(corr, yields, channel)?;
    let (scaled, factor) = scale_to_gaussian_regime(&rates, cfg.sampling.min_gaussian_rate)?;
    tracing::info!(factor, "scaled rates into the large-count regime");

    let (basis, spectral) = decompose(&target, &cfg.sampling.spectral())?;
    let min_gaussian_rate = cfg.sampling.min_gaussian_rate;
    let gaussian = CorrelatedSampler::new(
        &basis,
        &scaled,
        &SamplerConfig { mode: SamplingMode::Gaussian, min_gaussian_rate },
    )?;
    let copula = CorrelatedSampler::new(
        &basis,
        &scaled,
        &SamplerConfig { mode: SamplingMode::Copula, min_gaussian_rate },
    )?;

    let seed = cfg.seeds.compare_large_sample;
    let mut rng = StdRng::seed_from_u64(seed);
    let n_toys = cfg.sampling.n_chunks * cfg.sampling.chunk_size;
    let mut gaussian_toys = ToyBatch::new(target.dim(), SamplingMode::Gaussian)?;
    let mut copula_toys = ToyBatch::new(target.dim(), SamplingMode::Copula)?;
    for chunk in 0..cfg.sampling.n_chunks {
        // Same latent rows through both transforms.
        let latent = gaussian.latent_normals(cfg.sampling.chunk_size, &mut rng);
        gaussian_toys.extend(gaussian.transform(&latent)?)?;
        copula_toys.extend(copula.transform(&latent)?)?;
        tracing::debug!(chunk, n_chunks = cfg.sampling.n_chunks, "compared chunk");
    }

    let gaussian_report = validate_toys(&gaussian_toys, &scaled, &target)?;
    let copula_report = validate_toys(&copula_toys, &scaled, &target)?;
    tracing::info!(
        gaussian_corr_max_pp = gaussian_report.corr_abs_dev_max_pp,
        copula_corr_max_pp = copula_report.corr_abs_dev_max_pp,
        "large-sample comparison"
    );

    write_json(
        outfile,
        serde_json::json!({
            "channel": channel.label(),
            "seed": seed,
            "n_toys": n_toys,
            "scale_factor": factor,
            "spectral": spectral,
            "gaussian": gaussian_report,
            "copula": copula_report,
        }),
    )
}

pub(crate) fn cmd_validate(
    pseudodata: &Path,
    corr: &Path,
    yields: &Path,
    channel: Channel,
    n_toys: Option<usize>,
    outfile: Option<&PathBuf>,
) -> Result<()> {
    let (target, rates) = load_target(corr, yields, channel)?;
    let pd = read_pseudodata(pseudodata, n_toys)
        .with_context(|| format!("failed to read pseudo-data {}", pseudodata.display()))?;
    if pd.bin_keys != target.bin_keys() {
        anyhow::bail!(
            "pseudo-data has {} bins that do not match the {} bins of the correlation artifact",
            pd.bin_keys.len(),
            target.dim()
        );
    }

    let report = validate_toys(&pd.toys, &rates, &target)?;
    write_json(
        outfile,
        serde_json::json!({
            "channel": channel.label(),
            "validation": report,
        }),
    )
}
