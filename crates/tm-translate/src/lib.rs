//! # tm-translate
//!
//! Artifact readers and writers for toymaker.
//!
//! | Artifact         | Format                         | Module            |
//! |------------------|--------------------------------|-------------------|
//! | Event table      | Parquet                        | [`events`]        |
//! | Bin correlation  | JSON (`toymaker_bin_corr_v1`)  | [`correlation`]   |
//! | Expected yields  | JSON histograms                | [`yields`]        |
//! | Pseudo-data      | Parquet, one column per bin    | [`pseudodata`]    |
//! | Global obs. toys | Parquet, list or named columns | [`globs`]         |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlation;
pub mod events;
pub mod globs;
mod parquet_io;
pub mod pseudodata;
pub mod yields;

#[cfg(test)]
mod test_support;

pub use correlation::CorrelationArtifact;
pub use events::{EventTableColumns, read_event_table, write_event_table};
pub use globs::{read_alpha_toys, read_vector_toys, write_alpha_toys, write_vector_toys};
pub use pseudodata::{PseudoData, read_pseudodata, write_pseudodata};
pub use yields::{Histogram, YieldsArtifact};
