use crate::config::RegionType;
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use dem_core::{Bounds, Dataset};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read};

/// The four independently-incremented artifact version labels (spec §3).
///
/// A closed enum, not a free string: a typo'd version label is a
/// compile error at construction, and deserializing an unrecognized
/// string is a hard parse failure rather than a silent default (spec
/// §9: "duck-typed dict metadata → sum-typed records").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactVersion {
    /// Raw tile files; effectively immutable.
    RawV1,
    /// Masked and tightly-cropped rasters.
    ClippedV1,
    /// Uniformly downsampled rasters.
    ProcessedV2,
    /// Exported JSON artifacts.
    ExportV2,
}

impl ArtifactVersion {
    /// The wire string this version serializes to, e.g. `"export_v2"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactVersion::RawV1 => "raw_v1",
            ArtifactVersion::ClippedV1 => "clipped_v1",
            ArtifactVersion::ProcessedV2 => "processed_v2",
            ArtifactVersion::ExportV2 => "export_v2",
        }
    }
}

/// Sidecar metadata paired with every staged artifact file (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// This artifact's stage version.
    pub version: ArtifactVersion,
    /// Path to the upstream file this artifact was derived from.
    pub source_file_path: String,
    /// MD5 hash of the upstream file at the time this artifact was built.
    pub source_file_hash: String,
    /// Region this artifact belongs to.
    pub region_id: String,
    /// Region's type.
    pub region_type: RegionType,
    /// Geographic bounds of this artifact.
    pub bounds: Bounds,
    /// Ground resolution in meters per pixel.
    pub resolution_m: u32,
    /// `(min, max)` elevation in meters, if any finite pixel exists.
    pub elevation_range: Option<(f32, f32)>,
    /// When this artifact was produced.
    pub created_at: DateTime<Utc>,
    /// Source dataset.
    pub dataset: Dataset,
}

/// Computes the MD5 digest of a file's contents, hex-encoded.
pub fn md5_file(path: &Utf8Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `metadata`'s recorded upstream hash still matches the
/// current contents of `upstream_path` (spec §4.9, invariant 5).
///
/// Returns `Ok(false)` (not an error) when the upstream file is
/// missing — a missing upstream is "stale," not "unknown."
pub fn is_fresh(metadata: &Metadata, upstream_path: &Utf8Path) -> std::io::Result<bool> {
    if !upstream_path.exists() {
        return Ok(false);
    }
    let current_hash = md5_file(upstream_path)?;
    Ok(current_hash == metadata.source_file_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn version_wire_strings_match_spec() {
        assert_eq!(ArtifactVersion::RawV1.as_str(), "raw_v1");
        assert_eq!(ArtifactVersion::ClippedV1.as_str(), "clipped_v1");
        assert_eq!(ArtifactVersion::ProcessedV2.as_str(), "processed_v2");
        assert_eq!(ArtifactVersion::ExportV2.as_str(), "export_v2");
    }

    #[test]
    fn version_serializes_to_wire_string() {
        let json = serde_json::to_string(&ArtifactVersion::ExportV2).unwrap();
        assert_eq!(json, "\"export_v2\"");
    }

    #[test]
    fn md5_hash_changes_when_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("tile.bin");
        std::fs::write(&path, b"abc").unwrap();
        let first = md5_file(&path).unwrap();
        let mut f = File::options().append(true).open(&path).unwrap();
        f.write_all(b"def").unwrap();
        drop(f);
        let second = md5_file(&path).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn freshness_fails_when_upstream_missing() {
        let metadata = Metadata {
            version: ArtifactVersion::ClippedV1,
            source_file_path: "gone.tif".into(),
            source_file_hash: "deadbeef".into(),
            region_id: "tennessee".into(),
            region_type: RegionType::UsaState,
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap(),
            resolution_m: 30,
            elevation_range: None,
            created_at: Utc::now(),
            dataset: Dataset::Dem30mGlobal,
        };
        let missing = Utf8Path::new("/nonexistent/gone.tif");
        assert!(!is_fresh(&metadata, missing).unwrap());
    }
}
