//! Probability building blocks for toymaker.
//!
//! This crate hosts the distribution primitives the toy generators need:
//! - standard-normal CDF and truncated standard-normal sampling
//! - Poisson log-pmf and tabulated quantile functions (Gaussian-copula target marginals)

pub mod normal;
pub mod poisson;
