//! Common data types for toymaker

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mass hypotheses (GeV) for which the discriminant is evaluated.
pub const MASS_POINTS: [u32; 20] = [
    251, 260, 280, 300, 325, 350, 375, 400, 450, 500, 550, 600, 700, 800, 900, 1000, 1100, 1200,
    1400, 1600,
];

/// One analysis bin: a (mass hypothesis, bin index) pair.
///
/// Bin indices are 1-based; index 0 is the underflow bin and never forms a
/// key. Lists of keys fix the row/column order of every matrix and vector in
/// the pipeline, so they are compared and stored positionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct BinKey {
    /// Mass hypothesis.
    pub mass: u32,
    /// 1-based bin index.
    pub bin: u32,
}

impl BinKey {
    /// Position of this bin in a flow-less histogram (`bin - 1`), `None`
    /// for the underflow bin.
    pub fn hist_index(&self) -> Option<usize> {
        self.bin.checked_sub(1).map(|i| i as usize)
    }
}

impl From<(u32, u32)> for BinKey {
    fn from((mass, bin): (u32, u32)) -> Self {
        Self { mass, bin }
    }
}

impl From<BinKey> for (u32, u32) {
    fn from(k: BinKey) -> Self {
        (k.mass, k.bin)
    }
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}_b{}", self.mass, self.bin)
    }
}

/// Check that a bin-label list is non-empty, free of underflow bins and duplicates.
pub fn check_bin_keys(keys: &[BinKey]) -> Result<()> {
    if keys.is_empty() {
        return Err(Error::Validation("bin-label list is empty".into()));
    }
    let mut seen = HashSet::with_capacity(keys.len());
    for (i, k) in keys.iter().enumerate() {
        if k.bin == 0 {
            return Err(Error::Validation(format!("bin label {i} ({k}) is the underflow bin")));
        }
        if !seen.insert(*k) {
            return Err(Error::Validation(format!("duplicate bin label {k} at position {i}")));
        }
    }
    Ok(())
}

/// Analysis channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Fully hadronic di-tau channel.
    Hadhad,
    /// Lepton-hadron channel, single-lepton trigger.
    Slt,
    /// Lepton-hadron channel, lepton-plus-tau trigger.
    Ltt,
}

impl Channel {
    /// All channels.
    /// Short key used in expected-yield histogram names (`obs_{key}_m{mass}`).
    pub fn key(&self) -> &'static str {
        match self {
            Channel::Hadhad => "hh",
            Channel::Slt => "lh_slt",
            Channel::Ltt => "lh_ltt",
        }
    }

    /// Lowercase label used in output file and tree names.
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Hadhad => "hadhad",
            Channel::Slt => "slt",
            Channel::Ltt => "ltt",
        }
    }

    /// Name of the expected-yield histogram for `mass`.
    pub fn observed_hist_name(&self, mass: u32) -> String {
        format!("obs_{}_m{mass}", self.key())
    }

    /// Name of the Barlow-Beeston tau histogram for `mass`.
    pub fn tau_hist_name(&self, mass: u32) -> String {
        format!("tau_{}_m{mass}", self.key())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Hadhad => "Hadhad",
            Channel::Slt => "SLT",
            Channel::Ltt => "LTT",
        };
        f.write_str(s)
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hadhad" | "hh" => Ok(Channel::Hadhad),
            "slt" | "lh_slt" => Ok(Channel::Slt),
            "ltt" | "lh_ltt" => Ok(Channel::Ltt),
            _ => Err(Error::Validation(format!(
                "unknown channel '{s}' (expected one of: Hadhad, SLT, LTT)"
            ))),
        }
    }
}

/// Classification of simulated sample names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleGroup {
    /// Collision data, never part of an MC-derived quantity.
    Data,
    /// Z+jets with heavy-flavour (b/c) jets.
    ZHeavyFlavour,
    /// Top-quark pair production, including MC fakes.
    Ttbar,
    /// Everything else.
    Other,
}

impl SampleGroup {
    /// Classify a sample name.
    pub fn classify(sample: &str) -> Self {
        match sample {
            "data" => SampleGroup::Data,
            "Zttbb" | "Zttbc" | "Zttcc" | "Zbb" | "Zbc" | "Zcc" => SampleGroup::ZHeavyFlavour,
            "ttbar" | "ttbarFakesMC" => SampleGroup::Ttbar,
            _ => SampleGroup::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_key_hist_index_skips_underflow() {
        assert_eq!(BinKey { mass: 300, bin: 0 }.hist_index(), None);
        let k = BinKey { mass: 300, bin: 4 };
        assert_eq!(k.hist_index(), Some(3));
        assert_eq!(k.to_string(), "m300_b4");
    }

    #[test]
    fn test_bin_key_serializes_as_pair() {
        let k = BinKey { mass: 251, bin: 7 };
        let s = serde_json::to_string(&k).unwrap();
        assert_eq!(s, "[251,7]");
        let back: BinKey = serde_json::from_str(&s).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn test_check_bin_keys() {
        let a = BinKey { mass: 251, bin: 1 };
        let b = BinKey { mass: 251, bin: 2 };
        assert!(check_bin_keys(&[a, b]).is_ok());
        assert!(check_bin_keys(&[a, b, a]).is_err());
        assert!(check_bin_keys(&[]).is_err());
        assert!(check_bin_keys(&[BinKey { mass: 251, bin: 0 }]).is_err());
    }

    #[test]
    fn test_channel_parse_and_names() {
        assert_eq!("Hadhad".parse::<Channel>().unwrap(), Channel::Hadhad);
        assert_eq!("SLT".parse::<Channel>().unwrap(), Channel::Slt);
        assert_eq!("ltt".parse::<Channel>().unwrap(), Channel::Ltt);
        assert!("zcr".parse::<Channel>().is_err());
        assert_eq!(Channel::Slt.observed_hist_name(500), "obs_lh_slt_m500");
        assert_eq!(Channel::Hadhad.tau_hist_name(251), "tau_hh_m251");
    }

    #[test]
    fn test_sample_classification() {
        assert_eq!(SampleGroup::classify("data"), SampleGroup::Data);
        assert_eq!(SampleGroup::classify("Zttbc"), SampleGroup::ZHeavyFlavour);
        assert_eq!(SampleGroup::classify("ttbarFakesMC"), SampleGroup::Ttbar);
        assert_eq!(SampleGroup::classify("Zttl"), SampleGroup::Other);
    }
}
