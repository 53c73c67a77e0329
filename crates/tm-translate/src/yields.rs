//! JSON expected-yield artifact.
//!
//! `{"histograms": {"obs_hh_m300": {"contents": [...], "edges": [...]}}}`.
//! Histograms exclude under- and overflow, so `edges` has one entry more
//! than `contents`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tm_core::{Error, ExpectedYields, Result};

/// One flow-less 1-D histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Expected count per bin.
    pub contents: Vec<f64>,
    /// Bin edges, strictly increasing, `contents.len() + 1` entries.
    pub edges: Vec<f64>,
}

impl Histogram {
    /// Histogram with unit-width bins starting at 0.
    pub fn with_unit_bins(contents: Vec<f64>) -> Self {
        let edges = (0..=contents.len()).map(|i| i as f64).collect();
        Self { contents, edges }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.edges.len() != self.contents.len() + 1 {
            return Err(Error::Validation(format!(
                "histogram '{name}': {} edges for {} bins",
                self.edges.len(),
                self.contents.len()
            )));
        }
        if self.edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::Validation(format!("histogram '{name}': edges not strictly increasing")));
        }
        Ok(())
    }
}

/// Named histograms of expected yields and Barlow-Beeston τ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YieldsArtifact {
    /// Histograms by name (`obs_{channel}_m{mass}`, `tau_{channel}_m{mass}`, ...).
    pub histograms: BTreeMap<String, Histogram>,
}

impl YieldsArtifact {
    /// Add or replace a histogram.
    pub fn insert(&mut self, name: impl Into<String>, hist: Histogram) -> Result<()> {
        let name = name.into();
        hist.validate(&name)?;
        self.histograms.insert(name, hist);
        Ok(())
    }

    /// Read and validate every histogram.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("failed to read {}: {e}", path.display())))?;
        let art: Self = serde_json::from_str(&text)?;
        for (name, h) in &art.histograms {
            h.validate(name)?;
        }
        tracing::debug!(path = %path.display(), n = art.histograms.len(), "read expected yields");
        Ok(art)
    }

    /// Write as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl ExpectedYields for YieldsArtifact {
    fn histogram(&self, name: &str) -> Result<&[f64]> {
        self.histograms
            .get(name)
            .map(|h| h.contents.as_slice())
            .ok_or_else(|| Error::Validation(format!("expected-yield histogram '{name}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tmp_path;
    use tm_core::{BinKey, Channel};

    #[test]
    fn test_rates_by_bin_label() {
        let mut y = YieldsArtifact::default();
        y.insert(Channel::Slt.observed_hist_name(300), Histogram::with_unit_bins(vec![5.0, 6.0]))
            .unwrap();
        y.insert(Channel::Slt.observed_hist_name(400), Histogram::with_unit_bins(vec![7.0]))
            .unwrap();
        let keys = [
            BinKey { mass: 300, bin: 2 },
            BinKey { mass: 400, bin: 1 },
            BinKey { mass: 300, bin: 1 },
        ];
        let rates = y.rates_for(&keys, &|m| Channel::Slt.observed_hist_name(m)).unwrap();
        assert_eq!(rates, vec![6.0, 7.0, 5.0]);

        let missing = [BinKey { mass: 500, bin: 1 }];
        assert!(y.rates_for(&missing, &|m| Channel::Slt.observed_hist_name(m)).is_err());
    }

    #[test]
    fn test_edges_must_match_contents() {
        let mut y = YieldsArtifact::default();
        let bad = Histogram { contents: vec![1.0, 2.0], edges: vec![0.0, 1.0] };
        assert!(y.insert("h", bad).is_err());
        let unordered = Histogram { contents: vec![1.0], edges: vec![1.0, 1.0] };
        assert!(y.insert("h", unordered).is_err());

        let path = tmp_path("yields_bad.json");
        std::fs::write(&path, r#"{"histograms":{"h":{"contents":[1.0],"edges":[0.0]}}}"#).unwrap();
        assert!(YieldsArtifact::read(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_roundtrip() {
        let mut y = YieldsArtifact::default();
        y.insert("tau_hh_m251", Histogram::with_unit_bins(vec![100.0, 50.0])).unwrap();
        let path = tmp_path("yields.json");
        y.write(&path).unwrap();
        let back = YieldsArtifact::read(&path).unwrap();
        assert_eq!(back.histogram("tau_hh_m251").unwrap(), &[100.0, 50.0]);
        let _ = std::fs::remove_file(&path);
    }
}
