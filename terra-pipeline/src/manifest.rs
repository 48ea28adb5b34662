use crate::{
    config::{PipelineContext, RegionConfig, RegionType},
    error::{PipelineError, PipelineResult},
};
use chrono::Utc;
use dem_core::Bounds;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io::Read, time::SystemTime};
use walkdir::WalkDir;

/// Top-level manifest document (spec §6): `{"version": "manifest_v1",
/// "generated": ISO8601, "regions": {region_id: {...}}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    /// Always `"manifest_v1"`.
    pub version: String,
    /// When this manifest was generated.
    pub generated: chrono::DateTime<Utc>,
    /// Region entries, keyed by `region_id`.
    pub regions: BTreeMap<String, ManifestEntry>,
}

/// Per-region manifest record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Export filename selected for this region.
    pub file: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Region kind.
    pub region_type: RegionType,
    /// Grid width in pixels.
    pub width: usize,
    /// Grid height in pixels.
    pub height: usize,
    /// Geographic bounds.
    pub bounds: Bounds,
    /// Summary statistics.
    pub stats: ManifestStats,
    /// Size in bytes of the selected export file.
    pub file_size: u64,
}

/// Manifest-entry statistics, mirroring the export artifact's `stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestStats {
    /// Minimum elevation.
    pub min: f32,
    /// Maximum elevation.
    pub max: f32,
    /// Mean elevation.
    pub mean: f32,
    /// Count of non-null pixels.
    pub non_null_count: usize,
}

/// A candidate export file's parsed essentials, kept just long enough
/// to pick the winner per region (spec §4.10).
struct Candidate {
    path: std::path::PathBuf,
    mtime: SystemTime,
    region_id: String,
    display_name: String,
    region_type: RegionType,
    width: usize,
    height: usize,
    bounds: Bounds,
    stats: ManifestStats,
    file_size: u64,
}

/// Scans `ctx.exports_dir()`, strictly validates each candidate export,
/// and builds a fresh manifest containing only regions with at least
/// one valid `export_v2` file (spec §4.10). Never falls back to an
/// invalid or stale file — a region with zero valid candidates is
/// skipped and warned about, not silently carried over from a prior
/// manifest.
pub fn build_manifest(
    ctx: &PipelineContext,
    registry_lookup: impl Fn(&str) -> Option<RegionConfig>,
) -> PipelineResult<Manifest> {
    let exports_dir = ctx.exports_dir();
    let mut by_region: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();

    if exports_dir.exists() {
        for entry in WalkDir::new(exports_dir.as_std_path())
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == "manifest.json" || name.ends_with(".meta.json") || name.contains("_borders")
            {
                continue;
            }
            if !(name.ends_with(".json") || name.ends_with(".json.gz")) {
                continue;
            }

            match load_candidate(path, &registry_lookup) {
                Ok(Some(candidate)) => {
                    by_region
                        .entry(candidate.region_id.clone())
                        .or_default()
                        .push(candidate);
                }
                Ok(None) => {
                    log::warn!("skipping {}: not a valid export_v2 artifact", path.display());
                }
                Err(e) => {
                    log::warn!("skipping {}: {e}", path.display());
                }
            }
        }
    }

    let mut regions = BTreeMap::new();
    for (region_id, mut candidates) in by_region {
        if candidates.is_empty() {
            continue;
        }
        if candidates.len() > 1 {
            log::warn!(
                "region {region_id:?} has {} candidate export files; selecting newest by mtime",
                candidates.len()
            );
        }
        candidates.sort_by_key(|c| c.mtime);
        let winner = candidates.pop().expect("checked non-empty above");

        regions.insert(
            region_id,
            ManifestEntry {
                file: winner
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                display_name: winner.display_name,
                region_type: winner.region_type,
                width: winner.width,
                height: winner.height,
                bounds: winner.bounds,
                stats: winner.stats,
                file_size: winner.file_size,
            },
        );
    }

    Ok(Manifest {
        version: "manifest_v1".to_string(),
        generated: Utc::now(),
        regions,
    })
}

/// Returns `Ok(None)` when the file is well-formed-but-not-`export_v2`
/// (skip, warn), and `Err` only for I/O failures reading it.
fn load_candidate(
    path: &std::path::Path,
    registry_lookup: &impl Fn(&str) -> Option<RegionConfig>,
) -> PipelineResult<Option<Candidate>> {
    let io_err = |source: std::io::Error| PipelineError::Io {
        region_id: String::new(),
        stage: "manifest",
        path: camino::Utf8PathBuf::from_path_buf(path.to_path_buf())
            .unwrap_or_else(|_| camino::Utf8PathBuf::from("<non-utf8>")),
        source,
    };

    let bytes = fs::read(path).map_err(io_err)?;
    let json_text = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        if decoder.read_to_string(&mut out).is_err() {
            return Ok(None);
        }
        out
    } else {
        match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => return Ok(None),
        }
    };

    let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_text) else {
        return Ok(None);
    };
    if value.get("version").and_then(|v| v.as_str()) != Some("export_v2") {
        return Ok(None);
    }

    let Some(artifact) = value.as_object() else {
        return Ok(None);
    };
    let region_id = artifact
        .get("region_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let width = artifact.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let height = artifact.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let bounds_value = artifact.get("bounds");
    let bounds = match bounds_value.and_then(|b| serde_json::from_value::<BoundsWire>(b.clone()).ok())
    {
        Some(wire) => Bounds::new(wire.west, wire.south, wire.east, wire.north)?,
        None => return Ok(None),
    };
    let stats = match artifact
        .get("stats")
        .and_then(|s| serde_json::from_value::<ManifestStats>(s.clone()).ok())
    {
        Some(stats) => stats,
        None => return Ok(None),
    };

    let region_config = registry_lookup(&region_id);
    let (display_name, region_type) = match region_config {
        Some(cfg) => (cfg.display_name, cfg.region_type),
        None => (region_id.clone(), RegionType::Area),
    };

    let metadata = fs::metadata(path).map_err(io_err)?;
    let mtime = metadata.modified().map_err(io_err)?;

    Ok(Some(Candidate {
        path: path.to_path_buf(),
        mtime,
        region_id,
        display_name,
        region_type,
        width,
        height,
        bounds,
        stats,
        file_size: metadata.len(),
    }))
}

#[derive(Deserialize)]
struct BoundsWire {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}
