//! `make-corr`: overlap correlations from the event table.

use std::path::Path;

use anyhow::{Context, Result};
use tm_inference::{NegativeOverlapPolicy, estimate_correlation};
use tm_translate::{CorrelationArtifact, read_event_table};

use crate::config::AnalysisConfig;

pub(crate) fn cmd_make_corr(
    cfg: &AnalysisConfig,
    table: &Path,
    outfile: &Path,
    veto_negative_rates: bool,
) -> Result<()> {
    let events = read_event_table(table, &cfg.columns(), &cfg.mass_points)
        .with_context(|| format!("failed to read event table {}", table.display()))?;

    for (sample, n, integral) in events.sample_summary() {
        tracing::info!(sample = %sample, entries = n, integral, "sample");
    }

    let events = events.without_data().with_scaled_weights(&cfg.scale_factors);
    let bin_keys = events.bin_keys(&cfg.mass_points)?;
    tracing::info!(n_events = events.n_events(), n_bins = bin_keys.len(), "estimating overlaps");

    let policy = if veto_negative_rates {
        NegativeOverlapPolicy::Clamp
    } else {
        NegativeOverlapPolicy::Propagate
    };
    let estimate = estimate_correlation(&events, &bin_keys, policy)?;

    let report = &estimate.report;
    if report.negative_l1 + report.negative_l2 + report.negative_l3 > 0 {
        tracing::warn!(
            negative_l1 = report.negative_l1,
            negative_l2 = report.negative_l2,
            negative_l3 = report.negative_l3,
            clamped = report.clamped,
            "negative overlap sums"
        );
    }
    if !report.undefined.is_empty() {
        tracing::warn!(n = report.undefined.len(), "undefined correlation entries written as null");
    }
    if !report.out_of_range.is_empty() {
        tracing::warn!(n = report.out_of_range.len(), "correlation entries outside [-1, 1]");
    }

    CorrelationArtifact::from_estimate(&estimate)
        .write(outfile)
        .with_context(|| format!("failed to write {}", outfile.display()))?;
    tracing::info!(path = %outfile.display(), n_bins = bin_keys.len(), "wrote correlation artifact");
    Ok(())
}
