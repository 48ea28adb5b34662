use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five upstream DEM datasets this pipeline understands.
///
/// Dataset choice is made by the resolution planner; this type only
/// knows the facts that are properties of the dataset itself — its
/// native resolution and its canonical filename tag — not how it gets
/// selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// 10m USA-only coverage.
    Dem10mUsa,
    /// 30m global coverage (outside the polar bands).
    Dem30mGlobal,
    /// 30m coverage for latitudes beyond the polar threshold.
    Dem30mPolar,
    /// 90m global coverage (outside the polar bands).
    Dem90mGlobal,
    /// 90m coverage for latitudes beyond the polar threshold.
    Dem90mPolar,
}

impl Dataset {
    /// Native ground resolution of this dataset, in meters per pixel.
    pub fn resolution_m(self) -> u32 {
        match self {
            Dataset::Dem10mUsa => 10,
            Dataset::Dem30mGlobal | Dataset::Dem30mPolar => 30,
            Dataset::Dem90mGlobal | Dataset::Dem90mPolar => 90,
        }
    }

    /// Whether this dataset's coverage is gated to USA-only regions.
    pub fn is_usa_only(self) -> bool {
        matches!(self, Dataset::Dem10mUsa)
    }

    /// Whether this is the polar variant of its resolution tier.
    pub fn is_polar(self) -> bool {
        matches!(self, Dataset::Dem30mPolar | Dataset::Dem90mPolar)
    }

    /// The non-polar dataset at the same resolution tier, if this is polar.
    pub fn non_polar_sibling(self) -> Dataset {
        match self {
            Dataset::Dem30mPolar => Dataset::Dem30mGlobal,
            Dataset::Dem90mPolar => Dataset::Dem90mGlobal,
            other => other,
        }
    }

    /// The polar dataset at the same resolution tier, if one exists.
    ///
    /// Returns `None` for `Dem10mUsa`, which has no polar variant.
    pub fn polar_sibling(self) -> Option<Dataset> {
        match self {
            Dataset::Dem30mGlobal | Dataset::Dem30mPolar => Some(Dataset::Dem30mPolar),
            Dataset::Dem90mGlobal | Dataset::Dem90mPolar => Some(Dataset::Dem90mPolar),
            Dataset::Dem10mUsa => None,
        }
    }

    /// The `{D}` component of the canonical tile filename grammar.
    pub fn file_tag(self) -> &'static str {
        match self {
            Dataset::Dem10mUsa => "dem10m_usa",
            Dataset::Dem30mGlobal => "dem30m_global",
            Dataset::Dem30mPolar => "dem30m_polar",
            Dataset::Dem90mGlobal => "dem90m_global",
            Dataset::Dem90mPolar => "dem90m_polar",
        }
    }

    /// Parses a dataset's file tag back into a `Dataset`.
    ///
    /// Strict: an unrecognized tag is `None`, never a silent default.
    pub fn parse_file_tag(tag: &str) -> Option<Dataset> {
        match tag {
            "dem10m_usa" => Some(Dataset::Dem10mUsa),
            "dem30m_global" => Some(Dataset::Dem30mGlobal),
            "dem30m_polar" => Some(Dataset::Dem30mPolar),
            "dem90m_global" => Some(Dataset::Dem90mGlobal),
            "dem90m_polar" => Some(Dataset::Dem90mPolar),
            _ => None,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_tag_round_trips() {
        for ds in [
            Dataset::Dem10mUsa,
            Dataset::Dem30mGlobal,
            Dataset::Dem30mPolar,
            Dataset::Dem90mGlobal,
            Dataset::Dem90mPolar,
        ] {
            assert_eq!(Dataset::parse_file_tag(ds.file_tag()), Some(ds));
        }
    }

    #[test]
    fn parse_file_tag_rejects_unknown() {
        assert_eq!(Dataset::parse_file_tag("dem15m_moon"), None);
    }

    #[test]
    fn resolution_matches_tier() {
        assert_eq!(Dataset::Dem10mUsa.resolution_m(), 10);
        assert_eq!(Dataset::Dem30mPolar.resolution_m(), 30);
        assert_eq!(Dataset::Dem90mGlobal.resolution_m(), 90);
    }
}
