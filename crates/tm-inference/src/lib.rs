//! # tm-inference
//!
//! Correlated pseudo-experiments for toymaker.
//!
//! This crate provides:
//! - Overlap correlations between analysis bins from a weighted event table
//! - Spectral decomposition with noise-floor clipping
//! - Gaussian-copula and Gaussian-approximation correlated toys
//! - Moment and correlation diagnostics for generated toys
//! - Global-observable toys (truncated normal, Poisson bootstrap of τ)
//!
//! ## Architecture
//!
//! Expected yields come in through the `ExpectedYields` trait from tm-core;
//! nothing here reads or writes files.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Bin-overlap correlation estimator.
pub mod correlation;
/// Toy moments and deviation reports.
pub mod diagnostics;
/// Alpha and τ global-observable toys.
pub mod globs;
/// Correlated toy sampler.
pub mod sampler;
/// Eigendecomposition of correlation matrices.
pub mod spectral;
/// Weighted event table.
pub mod table;
/// Independent Poisson toys and the control region.
pub mod toys;

pub use correlation::{
    CorrelationEstimate, CorrelationMatrix, NegativeOverlapPolicy, OverlapMatrices, OverlapReport,
    estimate_correlation,
};
pub use diagnostics::{ToyMoments, ToyValidationReport, toy_moments, validate_toys};
pub use globs::{
    AlphaToys, DeviationCheck, TauBootstrap, TauBootstrapConfig, TauBootstrapReport, alpha_toys,
    collect_alpha_names,
};
pub use sampler::{
    CorrelatedSampler, SamplerConfig, SamplingMode, ToyBatch, scale_to_gaussian_regime,
};
pub use spectral::{PsdPolicy, SpectralBasis, SpectralConfig, SpectralReport, decompose};
pub use table::{BinSums, WeightedEventTable};
pub use toys::{ControlRegionToys, VectorToys, control_region_toys, poisson_toys};
