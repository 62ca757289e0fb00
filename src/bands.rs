//! Band name resolution.
//!
//! Band indices are 1-based everywhere outside this module, matching GDAL's
//! band numbering. [`resolve`] is the single place they become 0-based
//! buffer offsets.

use crate::error::{CompositeError, Result};
use log::debug;
use std::collections::BTreeMap;

/// The six optical bands every run knows about, in wavelength order.
pub const DEFAULT_BANDS: [(&str, usize); 6] = [
    ("blue", 1),
    ("green", 2),
    ("red", 3),
    ("nir", 4),
    ("swir1", 5),
    ("swir2", 6),
];

/// Band name to 1-based band index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandMap {
    bands: BTreeMap<String, usize>,
}

impl Default for BandMap {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS
                .iter()
                .map(|&(name, idx)| (name.to_string(), idx))
                .collect(),
        }
    }
}

impl BandMap {
    /// Build a map from explicit pairs, rejecting index 0.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut bands = BTreeMap::new();
        for (name, idx) in pairs {
            let name = name.into();
            if idx == 0 {
                return Err(CompositeError::InvalidBandIndex {
                    name,
                    value: idx.to_string(),
                });
            }
            bands.insert(name, idx);
        }
        Ok(Self { bands })
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.bands.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.bands.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// Parse one `NAME=INDEX` pair.
pub fn parse_band_spec(spec: &str) -> Result<(String, usize)> {
    let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| CompositeError::InvalidBandSpec(spec.to_string()))?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        return Err(CompositeError::InvalidBandSpec(spec.to_string()));
    }

    match value.parse::<usize>() {
        Ok(idx) if idx >= 1 => Ok((name.to_string(), idx)),
        _ => Err(CompositeError::InvalidBandIndex {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Apply user `NAME=INDEX` overrides on top of `base`. Later pairs win.
pub fn merge_user_bands<S: AsRef<str>>(base: &BandMap, overrides: &[S]) -> Result<BandMap> {
    let mut merged = base.clone();
    for spec in overrides {
        let (name, idx) = parse_band_spec(spec.as_ref())?;
        debug!("Band '{}' -> {}", name, idx);
        merged.bands.insert(name, idx);
    }
    Ok(merged)
}

/// Bands the criterion actually reads, as 0-based buffer offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBands {
    offsets: BTreeMap<String, usize>,
}

impl ActiveBands {
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.offsets.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn offset(&self, name: &str) -> Option<usize> {
        self.offsets.get(name).copied()
    }

    /// Fail if any active band lies past the inputs' band count.
    pub fn check_band_count(&self, band_count: usize) -> Result<()> {
        for (name, &offset) in &self.offsets {
            if offset >= band_count {
                return Err(CompositeError::BandOutOfRange {
                    name: name.clone(),
                    index: offset + 1,
                    count: band_count,
                });
            }
        }
        Ok(())
    }
}

/// Narrow `bands` down to the identifiers the expression uses.
pub fn resolve<S: AsRef<str>>(bands: &BandMap, identifiers: &[S]) -> Result<ActiveBands> {
    let mut offsets = BTreeMap::new();
    for ident in identifiers {
        let name = ident.as_ref();
        let idx = bands
            .get(name)
            .ok_or_else(|| CompositeError::UnknownBand(name.to_string()))?;
        offsets.insert(name.to_string(), idx - 1);
    }
    Ok(ActiveBands { offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_bands() {
        let bands = BandMap::default();
        assert_eq!(bands.iter().count(), 6);
        assert_eq!(bands.get("blue"), Some(1));
        assert_eq!(bands.get("swir2"), Some(6));
    }

    #[test]
    fn test_from_pairs_rejects_zero() {
        let err = BandMap::from_pairs([("red", 0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_merge_overrides_and_extends() {
        let merged =
            merge_user_bands(&BandMap::default(), &["nir=8", "thermal=10"]).unwrap();
        assert_eq!(merged.get("nir"), Some(8));
        assert_eq!(merged.get("thermal"), Some(10));
        assert_eq!(merged.get("red"), Some(3));
        assert_eq!(merged.iter().count(), 7);
    }

    #[test]
    fn test_merge_rejects_bad_index() {
        for spec in ["nir=abc", "nir=0", "nir=-2", "nir=1.5"] {
            let err = merge_user_bands(&BandMap::default(), &[spec]).unwrap_err();
            assert!(matches!(err, CompositeError::InvalidBandIndex { .. }), "{spec}");
        }
        let err = merge_user_bands(&BandMap::default(), &["nir"]).unwrap_err();
        assert!(matches!(err, CompositeError::InvalidBandSpec(_)));
    }

    #[test]
    fn test_resolve_converts_to_offsets() {
        let active = resolve(&BandMap::default(), &["nir", "red"]).unwrap();
        assert_eq!(active.iter().count(), 2);
        assert_eq!(active.offset("red"), Some(2));
        assert_eq!(active.offset("nir"), Some(3));
        assert_eq!(active.offset("blue"), None);
    }

    #[test]
    fn test_resolve_unknown_band() {
        let err = resolve(&BandMap::default(), &["nir", "redge"]).unwrap_err();
        assert!(matches!(err, CompositeError::UnknownBand(ref n) if n == "redge"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_band_count_check() {
        let active = resolve(&BandMap::default(), &["swir2"]).unwrap();
        assert!(active.check_band_count(6).is_ok());
        assert!(matches!(
            active.check_band_count(4),
            Err(CompositeError::BandOutOfRange { index: 6, count: 4, .. })
        ));
    }
}
