//! # tm-core
//!
//! Core types and traits shared by all toymaker crates.
//!
//! Pipeline stages (correlation estimation, sampling, auxiliary toys) live in
//! `tm-inference` and depend only on what is defined here; file formats live
//! in `tm-translate`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::ExpectedYields;
pub use types::{BinKey, Channel, MASS_POINTS, SampleGroup, check_bin_keys};
