//! Core traits for toymaker
//!
//! The toy generators in `tm-inference` need expected yields from a fitted
//! statistical model but must not depend on where those yields are stored.
//! Artifact readers in `tm-translate` implement [`ExpectedYields`].

use crate::{BinKey, Result};

/// Source of per-bin expected yields, keyed by histogram name.
///
/// Histograms exclude under- and overflow bins, so a [`BinKey`] with index
/// `b` reads entry `b - 1`.
pub trait ExpectedYields {
    /// Bin contents of the named histogram.
    fn histogram(&self, name: &str) -> Result<&[f64]>;

    /// Gather one expected count per bin key, in key order.
    ///
    /// `name_for_mass` maps a mass hypothesis to its histogram name.
    fn rates_for(
        &self,
        bin_keys: &[BinKey],
        name_for_mass: &dyn Fn(u32) -> String,
    ) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(bin_keys.len());
        for key in bin_keys {
            let name = name_for_mass(key.mass);
            let contents = self.histogram(&name)?;
            let idx = key.hist_index().ok_or_else(|| {
                crate::Error::Validation(format!("bin label {key} is the underflow bin"))
            })?;
            let value = contents.get(idx).copied().ok_or_else(|| {
                crate::Error::Validation(format!(
                    "bin label {key} out of range for histogram '{name}' with {} bins",
                    contents.len()
                ))
            })?;
            out.push(value);
        }
        Ok(out)
    }
}
