//! Global-observable toys: `gamma-globs`, `alpha-globs` and `zcr-toys`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use tm_core::Channel;
use tm_inference::{
    TauBootstrap, TauBootstrapReport, alpha_toys, collect_alpha_names, control_region_toys,
};
use tm_translate::globs::GLOBS_COLUMN;
use tm_translate::{YieldsArtifact, read_event_table, write_alpha_toys, write_vector_toys};

use crate::config::AnalysisConfig;
use crate::write_json;

/// Column of the control-region pseudo-data artifact.
const PSEUDODATA_COLUMN: &str = "pseudodata";

/// The part of a fitted-model summary listing its global observables.
#[derive(Debug, Deserialize)]
struct ModelSummary {
    global_observables: Vec<String>,
}

pub(crate) fn cmd_gamma_globs(
    cfg: &AnalysisConfig,
    table: &Path,
    yields: &Path,
    channel: Channel,
    outdir: &Path,
    n_toys: Option<usize>,
) -> Result<()> {
    let n_toys = n_toys.unwrap_or(cfg.globs.n_toys);
    let events = read_event_table(table, &cfg.columns(), &cfg.mass_points)
        .with_context(|| format!("failed to read event table {}", table.display()))?;
    let yields = YieldsArtifact::read(yields)
        .with_context(|| format!("failed to read expected yields {}", yields.display()))?;

    let (bootstrap, tau_checks) = TauBootstrap::new(
        &events,
        &cfg.mass_points,
        &yields,
        channel,
        cfg.globs.tau_bootstrap(),
    )?;

    let seed = cfg.seeds.gamma_globs.get(channel);
    let mut rng = StdRng::seed_from_u64(seed);
    tracing::info!(%channel, n_toys, seed, "bootstrapping tau global observables");
    let (toys, toy_mean_checks) = bootstrap.generate(n_toys, &mut rng)?;

    std::fs::create_dir_all(outdir)
        .with_context(|| format!("failed to create {}", outdir.display()))?;
    for (mass, toys) in bootstrap.masses().into_iter().zip(&toys) {
        let path =
            outdir.join(format!("toy_globs_{}_{mass}.parquet", bootstrap.channel().label()));
        write_vector_toys(&path, GLOBS_COLUMN, toys)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote gamma globs");
    }

    let report = TauBootstrapReport { tau_checks, toy_mean_checks };
    write_json(None, serde_json::to_value(&report)?)
}

pub(crate) fn cmd_alpha_globs(
    cfg: &AnalysisConfig,
    models: &[PathBuf],
    outfile: &Path,
    n_toys: Option<usize>,
) -> Result<()> {
    let n_toys = n_toys.unwrap_or(cfg.globs.n_toys);
    let mut all = Vec::new();
    for path in models {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let summary: ModelSummary = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse model summary {}", path.display()))?;
        all.extend(summary.global_observables);
    }

    let names = collect_alpha_names(&all, &cfg.globs.alpha_prefix);
    if names.is_empty() {
        anyhow::bail!("no global observables with prefix '{}' found", cfg.globs.alpha_prefix);
    }
    tracing::info!(n_names = names.len(), n_toys, "generating alpha global observables");

    let mut rng = StdRng::seed_from_u64(cfg.seeds.alpha_globs);
    let toys = alpha_toys(&names, n_toys, cfg.globs.truncation, &mut rng)?;
    write_alpha_toys(outfile, &toys)
        .with_context(|| format!("failed to write {}", outfile.display()))?;
    tracing::info!(path = %outfile.display(), "wrote alpha globs");
    Ok(())
}

pub(crate) fn cmd_zcr_toys(
    cfg: &AnalysisConfig,
    yields: &Path,
    outdir: &Path,
    n_toys: Option<usize>,
) -> Result<()> {
    let n_toys = n_toys.unwrap_or(cfg.globs.n_toys);
    let yields = YieldsArtifact::read(yields)
        .with_context(|| format!("failed to read expected yields {}", yields.display()))?;

    let mut rng = StdRng::seed_from_u64(cfg.seeds.control_region);
    let toys = control_region_toys(&yields, &cfg.mass_points, n_toys, &mut rng)?;

    std::fs::create_dir_all(outdir)
        .with_context(|| format!("failed to create {}", outdir.display()))?;
    let pd_path = outdir.join("pseudodata_ZCR.parquet");
    write_vector_toys(&pd_path, PSEUDODATA_COLUMN, &toys.pseudodata)
        .with_context(|| format!("failed to write {}", pd_path.display()))?;
    let globs_path = outdir.join("toy_globs_ZCR.parquet");
    write_vector_toys(&globs_path, GLOBS_COLUMN, &toys.globs)
        .with_context(|| format!("failed to write {}", globs_path.display()))?;
    tracing::info!(outdir = %outdir.display(), n_toys, "wrote control-region toys");
    Ok(())
}
