//! Weighted event table.
//!
//! A column store of simulated events: one weight per event, an optional
//! sample label, and for every mass hypothesis the 1-based discriminant bin
//! the event falls into (`0` = underflow, i.e. in no bin). Built once by a
//! reader and only read afterwards.

use std::collections::{BTreeMap, BTreeSet};

use tm_core::{BinKey, Error, Result, SampleGroup};

/// Per-bin weight sums for one mass hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSums {
    /// Bin indices present in the table, ascending.
    pub bins: Vec<u32>,
    /// Σw per bin.
    pub sumw: Vec<f64>,
    /// Σw² per bin.
    pub sumw2: Vec<f64>,
}

/// Immutable weighted event table.
#[derive(Debug, Clone)]
pub struct WeightedEventTable {
    n_events: usize,
    weights: Vec<f64>,
    samples: Option<Vec<String>>,
    bin_columns: BTreeMap<u32, Vec<u32>>,
}

impl WeightedEventTable {
    /// Create a table from already materialized columns.
    ///
    /// `bin_columns` maps a mass hypothesis to the bin assignment of every
    /// event. Weights may be negative (MC reweighting) but must be finite.
    pub fn from_columns(
        weights: Vec<f64>,
        samples: Option<Vec<String>>,
        bin_columns: impl IntoIterator<Item = (u32, Vec<u32>)>,
    ) -> Result<Self> {
        let n_events = weights.len();
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Validation("event weights must be finite".into()));
        }
        if let Some(s) = &samples
            && s.len() != n_events
        {
            return Err(Error::Validation(format!(
                "sample column length mismatch: expected {n_events}, got {}",
                s.len()
            )));
        }

        let mut cols = BTreeMap::new();
        for (mass, col) in bin_columns {
            if col.len() != n_events {
                return Err(Error::Validation(format!(
                    "bin column for mass {mass} has length {}, expected {n_events}",
                    col.len()
                )));
            }
            if cols.insert(mass, col).is_some() {
                return Err(Error::Validation(format!("duplicate bin column for mass {mass}")));
            }
        }
        if cols.is_empty() {
            return Err(Error::Validation("event table has no bin-assignment columns".into()));
        }

        Ok(Self { n_events, weights, samples, bin_columns: cols })
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Event weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Sample labels, if the table carries them.
    pub fn samples(&self) -> Option<&[String]> {
        self.samples.as_deref()
    }

    /// Mass hypotheses with a bin-assignment column, ascending.
    pub fn masses(&self) -> Vec<u32> {
        self.bin_columns.keys().copied().collect()
    }

    /// Bin assignment column for `mass`.
    pub fn bin_column(&self, mass: u32) -> Result<&[u32]> {
        self.bin_columns.get(&mass).map(|c| c.as_slice()).ok_or_else(|| {
            Error::Validation(format!("event table has no bin column for mass {mass}"))
        })
    }

    /// Canonical bin-key order: masses ascending, then the distinct
    /// non-underflow bin indices present for each mass, ascending.
    pub fn bin_keys(&self, masses: &[u32]) -> Result<Vec<BinKey>> {
        let sorted: BTreeSet<u32> = masses.iter().copied().collect();
        let mut keys = Vec::new();
        for mass in sorted {
            let col = self.bin_column(mass)?;
            let unique: BTreeSet<u32> = col.iter().copied().filter(|&b| b > 0).collect();
            keys.extend(unique.into_iter().map(|bin| BinKey { mass, bin }));
        }
        Ok(keys)
    }

    /// Σw and Σw² for every non-underflow bin of `mass`.
    pub fn bin_sums(&self, mass: u32) -> Result<BinSums> {
        let col = self.bin_column(mass)?;
        let mut acc: BTreeMap<u32, (f64, f64)> = BTreeMap::new();
        for (&bin, &w) in col.iter().zip(&self.weights) {
            if bin == 0 {
                continue;
            }
            let e = acc.entry(bin).or_insert((0.0, 0.0));
            e.0 += w;
            e.1 += w * w;
        }
        let mut out = BinSums {
            bins: Vec::with_capacity(acc.len()),
            sumw: Vec::with_capacity(acc.len()),
            sumw2: Vec::with_capacity(acc.len()),
        };
        for (bin, (sw, sw2)) in acc {
            out.bins.push(bin);
            out.sumw.push(sw);
            out.sumw2.push(sw2);
        }
        Ok(out)
    }

    /// Copy of the table without collision-data rows.
    pub fn without_data(&self) -> Self {
        let Some(samples) = &self.samples else {
            return self.clone();
        };
        let keep: Vec<bool> =
            samples.iter().map(|s| SampleGroup::classify(s) != SampleGroup::Data).collect();
        self.filter(&keep)
    }

    /// Copy of the table with weights multiplied per sample group.
    ///
    /// Groups missing from `factors` keep their weights. Tables without
    /// sample labels are returned unchanged.
    pub fn with_scaled_weights(&self, factors: &BTreeMap<SampleGroup, f64>) -> Self {
        let mut out = self.clone();
        if let Some(samples) = &self.samples {
            for (w, s) in out.weights.iter_mut().zip(samples) {
                if let Some(f) = factors.get(&SampleGroup::classify(s)) {
                    *w *= f;
                }
            }
        }
        out
    }

    /// Entry count and Σw per sample label, sorted by label.
    pub fn sample_summary(&self) -> Vec<(String, usize, f64)> {
        let Some(samples) = &self.samples else {
            return vec![("all".to_string(), self.n_events, self.weights.iter().sum())];
        };
        let mut acc: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        for (s, &w) in samples.iter().zip(&self.weights) {
            let e = acc.entry(s.as_str()).or_insert((0, 0.0));
            e.0 += 1;
            e.1 += w;
        }
        acc.into_iter().map(|(s, (n, sw))| (s.to_string(), n, sw)).collect()
    }

    fn filter(&self, keep: &[bool]) -> Self {
        let pick_f64 = |v: &[f64]| -> Vec<f64> {
            v.iter().zip(keep).filter(|(_, k)| **k).map(|(x, _)| *x).collect()
        };
        let weights = pick_f64(&self.weights);
        let samples = self.samples.as_ref().map(|s| {
            s.iter().zip(keep).filter(|(_, k)| **k).map(|(x, _)| x.clone()).collect::<Vec<_>>()
        });
        let bin_columns = self
            .bin_columns
            .iter()
            .map(|(&m, col)| {
                (m, col.iter().zip(keep).filter(|(_, k)| **k).map(|(b, _)| *b).collect())
            })
            .collect();
        Self { n_events: weights.len(), weights, samples, bin_columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WeightedEventTable {
        WeightedEventTable::from_columns(
            vec![1.0, 2.0, 0.5, 4.0, -0.5],
            Some(vec![
                "ttbar".into(),
                "Zbb".into(),
                "data".into(),
                "Zttl".into(),
                "ttbar".into(),
            ]),
            vec![(300, vec![1, 2, 1, 0, 2]), (251, vec![2, 2, 1, 1, 3])],
        )
        .unwrap()
    }

    #[test]
    fn test_bin_keys_sorted_and_skip_underflow() {
        let t = table();
        let keys = t.bin_keys(&[300, 251]).unwrap();
        let pairs: Vec<(u32, u32)> = keys.iter().map(|k| (k.mass, k.bin)).collect();
        assert_eq!(pairs, vec![(251, 1), (251, 2), (251, 3), (300, 1), (300, 2)]);
        assert!(t.bin_keys(&[999]).is_err());
    }

    #[test]
    fn test_bin_sums() {
        let s = table().bin_sums(300).unwrap();
        assert_eq!(s.bins, vec![1, 2]);
        assert_eq!(s.sumw, vec![1.5, 1.5]);
        assert_eq!(s.sumw2, vec![1.25, 4.25]);
    }

    #[test]
    fn test_without_data_and_scaling() {
        let t = table().without_data();
        assert_eq!(t.n_events(), 4);
        assert!(t.samples().unwrap().iter().all(|s| s != "data"));

        let factors = BTreeMap::from([(SampleGroup::Ttbar, 0.5), (SampleGroup::ZHeavyFlavour, 2.0)]);
        let scaled = t.with_scaled_weights(&factors);
        assert_eq!(scaled.weights(), &[0.5, 4.0, 4.0, -0.25]);
        // Original untouched.
        assert_eq!(t.weights(), &[1.0, 2.0, 4.0, -0.5]);
    }

    #[test]
    fn test_from_columns_validation() {
        assert!(WeightedEventTable::from_columns(vec![1.0], None, vec![(1, vec![1, 2])]).is_err());
        assert!(WeightedEventTable::from_columns(vec![f64::NAN], None, vec![(1, vec![1])]).is_err());
        assert!(WeightedEventTable::from_columns(vec![1.0], None, Vec::new()).is_err());
        assert!(
            WeightedEventTable::from_columns(vec![1.0], Some(vec![]), vec![(1, vec![1])]).is_err()
        );
    }

    #[test]
    fn test_sample_summary() {
        let summary = table().sample_summary();
        assert_eq!(summary[0], ("Zbb".to_string(), 1, 2.0));
        let ttbar = summary.iter().find(|(s, _, _)| s == "ttbar").unwrap();
        assert_eq!(ttbar.1, 2);
        assert_eq!(ttbar.2, 0.5);
    }
}
