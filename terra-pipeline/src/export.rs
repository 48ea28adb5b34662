use crate::{
    config::{PipelineContext, RegionType},
    error::{PipelineError, PipelineResult},
    version::{md5_file, ArtifactVersion, Metadata},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use dem_core::{Dataset, Raster};
use flate2::{write::GzEncoder, Compression};
use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::{fs, io::Write};

/// The canonical inter-process JSON artifact (spec §3).
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedArtifact {
    /// Mandatory; strict check at read — always `"export_v2"`.
    pub version: String,
    /// Region this export belongs to.
    pub region_id: String,
    /// Dataset this export was produced from.
    pub source: String,
    /// Ground resolution in meters per pixel.
    pub resolution_m: u32,
    /// Geographic bounds.
    pub bounds: ExportBounds,
    /// Grid width in pixels.
    pub width: usize,
    /// Grid height in pixels.
    pub height: usize,
    /// Row-major elevation grid; `null` marks a masked-out pixel.
    pub elevation: Vec<Vec<Option<f32>>>,
    /// Summary statistics over non-null pixels.
    pub stats: ExportStats,
}

/// Wire form of [`dem_core::Bounds`] — mirrors the exact field names
/// spec §3 lists.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportBounds {
    /// Western edge.
    pub west: f64,
    /// Southern edge.
    pub south: f64,
    /// Eastern edge.
    pub east: f64,
    /// Northern edge.
    pub north: f64,
}

/// Summary statistics over an export's non-null pixels.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportStats {
    /// Minimum elevation.
    pub min: f32,
    /// Maximum elevation.
    pub max: f32,
    /// Mean elevation.
    pub mean: f32,
    /// Count of non-null pixels.
    pub non_null_count: usize,
}

/// A single named boundary feature's flattened ring segments.
#[derive(Debug, Serialize, Deserialize)]
pub struct BorderFeature {
    /// Feature name (region display name).
    pub name: String,
    /// Closed rings, each a parallel `(lon[], lat[])` pair.
    pub segments: Vec<BorderSegment>,
}

/// One closed ring as parallel longitude/latitude arrays.
#[derive(Debug, Serialize, Deserialize)]
pub struct BorderSegment {
    /// Longitudes, in ring order.
    pub lon: Vec<f64>,
    /// Latitudes, in ring order.
    pub lat: Vec<f64>,
}

/// Converts `processed` into the canonical JSON artifact, gzips it, and
/// writes both the export and border files plus a sidecar metadata
/// record (spec §4.8).
#[allow(clippy::too_many_arguments)]
pub fn export(
    ctx: &PipelineContext,
    region_id: &str,
    display_name: &str,
    region_type: RegionType,
    dataset: Dataset,
    processed: &Raster,
    processed_path: &Utf8PathBuf,
    polygon: &Polygon<f64>,
    target_pixels: u32,
) -> PipelineResult<(Utf8PathBuf, Utf8PathBuf)> {
    let artifact = to_artifact(region_id, dataset, processed);

    let exports_dir = ctx.exports_dir();
    fs::create_dir_all(&exports_dir).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "export",
        path: exports_dir.clone(),
        source,
    })?;

    let base_name = format!(
        "{region_id}_{}_{target_pixels}px_v2",
        dataset.file_tag()
    );
    let export_path = exports_dir.join(format!("{base_name}.json.gz"));
    let border_path = exports_dir.join(format!("{base_name}_borders.json.gz"));

    write_json_gz(&export_path, &artifact, region_id, "export")?;

    let border = to_border_file(display_name, region_type, polygon, processed.bounds());
    write_json_gz(&border_path, &border, region_id, "export")?;

    let source_hash = md5_file(processed_path).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "export",
        path: processed_path.clone(),
        source,
    })?;
    let metadata = Metadata {
        version: ArtifactVersion::ExportV2,
        source_file_path: processed_path.to_string(),
        source_file_hash: source_hash,
        region_id: region_id.to_string(),
        region_type,
        bounds: processed.bounds(),
        resolution_m: dataset.resolution_m(),
        elevation_range: processed.stats().map(|(min, max, _)| (min, max)),
        created_at: Utc::now(),
        dataset,
    };
    let sidecar_path = exports_dir.join(format!("{base_name}.meta.json"));
    let json = serde_json::to_string_pretty(&metadata).expect("Metadata always serializes");
    fs::write(&sidecar_path, json).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "export",
        path: sidecar_path,
        source,
    })?;

    Ok((export_path, border_path))
}

/// One pass: row-major nested `Option<f32>` conversion plus stats over
/// finite pixels (spec §4.8 steps 1-2). A single `iter_pixels` sweep
/// does both — no second scan of the grid.
fn to_artifact(region_id: &str, dataset: Dataset, raster: &Raster) -> ExportedArtifact {
    let width = raster.width();
    let height = raster.height();
    let mut elevation = vec![vec![None; width]; height];

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut non_null_count = 0usize;

    for (x, y, value) in raster.iter_pixels() {
        if value.is_nan() {
            continue;
        }
        elevation[y][x] = Some(value);
        min = min.min(value);
        max = max.max(value);
        sum += f64::from(value);
        non_null_count += 1;
    }

    let (min, max, mean) = if non_null_count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        (min, max, (sum / non_null_count as f64) as f32)
    };

    let bounds = raster.bounds();
    ExportedArtifact {
        version: ArtifactVersion::ExportV2.as_str().to_string(),
        region_id: region_id.to_string(),
        source: dataset.file_tag().to_string(),
        resolution_m: dataset.resolution_m(),
        bounds: ExportBounds {
            west: bounds.west,
            south: bounds.south,
            east: bounds.east,
            north: bounds.north,
        },
        width,
        height,
        elevation,
        stats: ExportStats {
            min,
            max,
            mean,
            non_null_count,
        },
    }
}

/// Flattens `polygon` (and its holes) to the border file's segment list
/// (spec §4.8 step 4).
fn to_border_file(
    display_name: &str,
    region_type: RegionType,
    polygon: &Polygon<f64>,
    bounds: dem_core::Bounds,
) -> serde_json::Value {
    let mut rings = vec![ring_to_segment(polygon.exterior())];
    for interior in polygon.interiors() {
        rings.push(ring_to_segment(interior));
    }

    let feature = BorderFeature {
        name: display_name.to_string(),
        segments: rings,
    };

    serde_json::json!({
        format!("{}s", singular_type_key(region_type)): [feature],
        "bounds": {
            "west": bounds.west,
            "south": bounds.south,
            "east": bounds.east,
            "north": bounds.north,
        },
    })
}

fn singular_type_key(region_type: RegionType) -> &'static str {
    match region_type {
        RegionType::Country => "country",
        RegionType::UsaState => "state",
        RegionType::Area => "area",
    }
}

fn ring_to_segment(ring: &LineString<f64>) -> BorderSegment {
    let mut lon = Vec::with_capacity(ring.0.len());
    let mut lat = Vec::with_capacity(ring.0.len());
    for coord in &ring.0 {
        lon.push(coord.x);
        lat.push(coord.y);
    }
    BorderSegment { lon, lat }
}

fn write_json_gz<T: Serialize>(
    path: &Utf8PathBuf,
    value: &T,
    region_id: &str,
    stage: &'static str,
) -> PipelineResult<()> {
    let json = serde_json::to_vec(value).expect("export artifacts always serialize");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage,
            path: path.clone(),
            source,
        })?;
    let gz_bytes = encoder.finish().map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage,
        path: path.clone(),
        source,
    })?;
    fs::write(path, gz_bytes).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage,
        path: path.clone(),
        source,
    })
}
