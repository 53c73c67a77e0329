//! toymaker CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tm_core::Channel;
use tm_inference::SamplingMode;

mod config;
mod corr;
mod globs;
mod pseudodata;

#[derive(Parser)]
#[command(name = "toymaker")]
#[command(about = "Correlated pseudo-experiments from bin-overlap correlations")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Analysis configuration (YAML, or JSON by extension). Defaults apply without it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the bin correlation matrix from an event table
    MakeCorr {
        /// Event table (Parquet)
        table: PathBuf,

        /// Output correlation artifact (JSON)
        #[arg(short, long)]
        outfile: PathBuf,

        /// Clamp negative overlap sums to zero instead of propagating them
        #[arg(long)]
        veto_negative_rates: bool,
    },

    /// Generate correlated pseudo-data
    Generate {
        /// Correlation artifact (JSON)
        corr: PathBuf,

        /// Expected yields (JSON)
        yields: PathBuf,

        /// Analysis channel (hadhad, slt, ltt)
        #[arg(short, long)]
        channel: Channel,

        /// Output pseudo-data (Parquet). Without it only the report is produced.
        #[arg(short, long)]
        outfile: Option<PathBuf>,

        /// Marginal transform (copula, gaussian)
        #[arg(long, default_value = "copula")]
        mode: SamplingMode,

        /// Number of chunks (default from config)
        #[arg(long)]
        n_chunks: Option<usize>,

        /// Toys per chunk (default from config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Validation report (pretty JSON). Defaults to stdout.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Compare Gaussian and copula toys on rates scaled into the large-count regime
    CompareLargeSample {
        /// Correlation artifact (JSON)
        corr: PathBuf,

        /// Expected yields (JSON)
        yields: PathBuf,

        /// Analysis channel (hadhad, slt, ltt)
        #[arg(short, long)]
        channel: Channel,

        /// Output report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        outfile: Option<PathBuf>,
    },

    /// Check moments and correlations of existing pseudo-data
    Validate {
        /// Pseudo-data (Parquet)
        pseudodata: PathBuf,

        /// Correlation artifact (JSON)
        corr: PathBuf,

        /// Expected yields (JSON)
        yields: PathBuf,

        /// Analysis channel (hadhad, slt, ltt)
        #[arg(short, long)]
        channel: Channel,

        /// Only use the first N toys
        #[arg(long)]
        n_toys: Option<usize>,

        /// Output report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        outfile: Option<PathBuf>,
    },

    /// Bootstrap toys of the Barlow-Beeston tau global observables
    GammaGlobs {
        /// Event table (Parquet)
        table: PathBuf,

        /// Expected yields with tau histograms (JSON)
        yields: PathBuf,

        /// Analysis channel (hadhad, slt, ltt)
        #[arg(short, long)]
        channel: Channel,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Number of toys (default from config)
        #[arg(long)]
        n_toys: Option<usize>,
    },

    /// Truncated-normal toys of the systematic global observables
    AlphaGlobs {
        /// Model summaries (JSON with a `global_observables` list)
        #[arg(required = true)]
        models: Vec<PathBuf>,

        /// Output file (Parquet)
        #[arg(short, long, default_value = "alphas.parquet")]
        outfile: PathBuf,

        /// Number of toys (default from config)
        #[arg(long)]
        n_toys: Option<usize>,
    },

    /// Independent Poisson toys of the Z control region
    ZcrToys {
        /// Expected yields with `obs_zcr_m*` and `tau_zcr_m*` (JSON)
        yields: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Number of toys (default from config)
        #[arg(long)]
        n_toys: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Reports go to stdout; keep logs off it.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::MakeCorr { table, outfile, veto_negative_rates } => {
            corr::cmd_make_corr(&cfg, &table, &outfile, veto_negative_rates)
        }
        Commands::Generate {
            corr,
            yields,
            channel,
            outfile,
            mode,
            n_chunks,
            chunk_size,
            report,
        } => pseudodata::cmd_generate(
            &cfg,
            &corr,
            &yields,
            channel,
            outfile.as_ref(),
            mode,
            n_chunks,
            chunk_size,
            report.as_ref(),
        ),
        Commands::CompareLargeSample { corr, yields, channel, outfile } => {
            pseudodata::cmd_compare_large_sample(&cfg, &corr, &yields, channel, outfile.as_ref())
        }
        Commands::Validate { pseudodata, corr, yields, channel, n_toys, outfile } => {
            pseudodata::cmd_validate(
                &pseudodata,
                &corr,
                &yields,
                channel,
                n_toys,
                outfile.as_ref(),
            )
        }
        Commands::GammaGlobs { table, yields, channel, outdir, n_toys } => {
            globs::cmd_gamma_globs(&cfg, &table, &yields, channel, &outdir, n_toys)
        }
        Commands::AlphaGlobs { models, outfile, n_toys } => {
            globs::cmd_alpha_globs(&cfg, &models, &outfile, n_toys)
        }
        Commands::ZcrToys { yields, outdir, n_toys } => {
            globs::cmd_zcr_toys(&cfg, &yields, &outdir, n_toys)
        }
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
