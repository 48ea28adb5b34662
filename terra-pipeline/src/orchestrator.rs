use crate::{
    config::{PipelineContext, RegionType},
    downloader::Downloader,
    error::{PipelineError, PipelineResult},
    resolution::ResolutionPlan,
    tile_cache::TileCache,
    version::{md5_file, ArtifactVersion, Metadata},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use dem_core::{Bounds, Dataset, Raster, TileId};
use std::fs;

/// Fetches every tile a [`ResolutionPlan`] requires and merges them into
/// one contiguous raster covering `bounds` (spec §4.5).
///
/// Tiles are fetched in the orchestrator's own `BTreeSet<TileId>`
/// iteration order — `(lat_sw, lon_sw)` sorted — one at a time (spec
/// §5: sequential, not parallel, in v1).
pub fn merge_tiles(
    ctx: &PipelineContext,
    plan: &ResolutionPlan,
    bounds: Bounds,
    downloader: &dyn Downloader,
    region_id: &str,
    region_type: RegionType,
) -> PipelineResult<(Raster, Utf8PathBuf)> {
    let cache = TileCache::new(ctx);
    let mut tile_paths = Vec::with_capacity(plan.source_tiles.len());

    for tile in &plan.source_tiles {
        if ctx.cancellation.is_cancelled() {
            return Err(PipelineError::TileDownloadFailed {
                tile: tile.filename(plan.dataset),
                cause: "cancelled".to_string(),
            });
        }
        if !ctx.rate_limit.min_interval.is_zero() {
            std::thread::sleep(ctx.rate_limit.min_interval);
        }
        let path = cache.ensure_tile(*tile, plan.dataset, downloader, region_id, region_type)?;
        let path = ensure_tile_readable(&cache, *tile, plan.dataset, downloader, region_id, region_type, path)?;
        tile_paths.push((*tile, path));
    }

    let merged = merge_into_raster(bounds, plan, &tile_paths)?;

    let merged_dir = ctx.merged_dir(plan.dataset.file_tag());
    fs::create_dir_all(&merged_dir).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "orchestrator",
        path: merged_dir.clone(),
        source,
    })?;
    let merged_path = merged_dir.join(format!("{region_id}.bin"));
    write_raster(&merged_path, &merged).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "orchestrator",
        path: merged_path.clone(),
        source,
    })?;

    let hash = md5_file(&merged_path).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "orchestrator",
        path: merged_path.clone(),
        source,
    })?;
    let metadata = Metadata {
        version: ArtifactVersion::RawV1,
        source_file_path: tile_paths
            .iter()
            .map(|(_, p)| p.as_str())
            .collect::<Vec<_>>()
            .join(","),
        source_file_hash: hash,
        region_id: region_id.to_string(),
        region_type,
        bounds,
        resolution_m: plan.expected_merged_resolution_m,
        elevation_range: merged.stats().map(|(min, max, _)| (min, max)),
        created_at: Utc::now(),
        dataset: plan.dataset,
    };
    let sidecar_path = merged_dir.join(format!("{region_id}.json"));
    let json = serde_json::to_string_pretty(&metadata).expect("Metadata always serializes");
    fs::write(&sidecar_path, json).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "orchestrator",
        path: sidecar_path,
        source,
    })?;

    Ok((merged, merged_path))
}

/// Confirms `path` is a well-formed raster file, recovering from a
/// corrupt-on-disk tile that still passed [`TileCache::contains`]'s hash
/// check (a stale or malformed file can share a hash with its sidecar
/// while still failing [`read_raster`]'s own length check). Deletes the
/// tile and re-downloads it exactly once; a second failure is fatal
/// (spec §7: delete-and-re-download-once-then-fatal).
#[allow(clippy::too_many_arguments)]
fn ensure_tile_readable(
    cache: &TileCache<'_>,
    tile: TileId,
    dataset: Dataset,
    downloader: &dyn Downloader,
    region_id: &str,
    region_type: RegionType,
    path: Utf8PathBuf,
) -> PipelineResult<Utf8PathBuf> {
    if read_raster(&path).is_ok() {
        return Ok(path);
    }

    log::warn!(
        "tile {} at {path} failed validation; deleting and re-downloading once",
        tile.filename(dataset)
    );
    cache.invalidate(tile, dataset);
    let path = cache.ensure_tile(tile, dataset, downloader, region_id, region_type)?;

    if read_raster(&path).is_ok() {
        return Ok(path);
    }

    Err(PipelineError::TileCorrupt {
        tile: tile.filename(dataset),
        path,
    })
}

/// Reads each contributing tile and copies its pixels into a raster
/// covering exactly `bounds` (not the tile union). Pixels outside any
/// tile are left `NaN`; a tile file that fails to read despite having
/// just passed [`ensure_tile_readable`] is a fatal `TileCorrupt` rather
/// than a silent gap in coverage (spec §4.5: no partial-coverage output).
fn merge_into_raster(
    bounds: Bounds,
    plan: &ResolutionPlan,
    tile_paths: &[(TileId, Utf8PathBuf)],
) -> PipelineResult<Raster> {
    let resolution_m = f64::from(plan.expected_merged_resolution_m);
    let deg_per_pixel = resolution_m / 111_320.0;

    let width = ((bounds.width_deg() / deg_per_pixel).ceil() as usize).max(1);
    let height = ((bounds.height_deg() / deg_per_pixel).ceil() as usize).max(1);
    let mut merged = Raster::empty(width, height, bounds);

    for (tile, path) in tile_paths {
        let tile_bounds = tile.bounds();
        if !tile_bounds.intersects(&bounds) {
            continue;
        }
        let tile_raster = read_raster(path).map_err(|_| PipelineError::TileCorrupt {
            tile: tile.filename(plan.dataset),
            path: path.clone(),
        })?;
        copy_overlap(&tile_raster, &mut merged);
    }

    Ok(merged)
}

/// Copies every pixel of `src` whose center falls within `dst`'s bounds
/// into `dst` at the corresponding pixel coordinate.
fn copy_overlap(src: &Raster, dst: &mut Raster) {
    let dst_bounds = dst.bounds();
    let dst_px_w = dst_bounds.width_deg() / dst.width() as f64;
    let dst_px_h = dst_bounds.height_deg() / dst.height() as f64;

    for (x, y, value) in src.iter_pixels() {
        if value.is_nan() {
            continue;
        }
        let center = src.pixel_center(x, y);
        if center.x < dst_bounds.west
            || center.x >= dst_bounds.east
            || center.y <= dst_bounds.south
            || center.y > dst_bounds.north
        {
            continue;
        }
        let dst_x = ((center.x - dst_bounds.west) / dst_px_w) as usize;
        let dst_y = ((dst_bounds.north - center.y) / dst_px_h) as usize;
        if dst_x < dst.width() && dst_y < dst.height() {
            dst.set(dst_x, dst_y, value);
        }
    }
}

/// Raw tile/raster files are stored as a flat little-endian dump:
/// `width:u32, height:u32, west:f64, south:f64, east:f64, north:f64`,
/// followed by `width * height` `f32` samples. There is no GeoTIFF codec
/// in this workspace (the upstream "downloader" contract is external
/// per spec §6) — every raster this pipeline itself reads and writes
/// uses this minimal self-describing format, and it is the format a
/// [`crate::downloader::Downloader`] implementation must write to
/// `destination_path`.
pub fn write_raster(path: &Utf8PathBuf, raster: &Raster) -> std::io::Result<()> {
    let bounds = raster.bounds();
    let mut buf = Vec::with_capacity(40 + raster.samples().len() * 4);
    buf.extend_from_slice(&(raster.width() as u32).to_le_bytes());
    buf.extend_from_slice(&(raster.height() as u32).to_le_bytes());
    buf.extend_from_slice(&bounds.west.to_le_bytes());
    buf.extend_from_slice(&bounds.south.to_le_bytes());
    buf.extend_from_slice(&bounds.east.to_le_bytes());
    buf.extend_from_slice(&bounds.north.to_le_bytes());
    for &v in raster.samples() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(path, buf)
}

pub fn read_raster(path: &Utf8PathBuf) -> std::io::Result<Raster> {
    let bytes = fs::read(path)?;
    const HEADER_LEN: usize = 8 + 32;
    if bytes.len() < HEADER_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "raster file too short for header",
        ));
    }
    let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let west = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let south = f64::from_le_bytes(bytes[16..24].try_into().unwrap());
    let east = f64::from_le_bytes(bytes[24..32].try_into().unwrap());
    let north = f64::from_le_bytes(bytes[32..40].try_into().unwrap());

    let expected_len = HEADER_LEN + width * height * 4;
    if bytes.len() != expected_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "raster file has {} bytes, expected {expected_len} for {width}x{height}",
                bytes.len()
            ),
        ));
    }
    let mut samples = Vec::with_capacity(width * height);
    for chunk in bytes[HEADER_LEN..].chunks_exact(4) {
        samples.push(f32::from_le_bytes(chunk.try_into().unwrap()));
    }
    let bounds = Bounds::new(west, south, east, north).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })?;
    Ok(Raster::new(width, height, bounds, samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RegionRegistry, downloader::FetchError};
    use dem_core::{Dataset, TileId};

    struct FixtureDownloader;

    impl Downloader for FixtureDownloader {
        fn fetch(
            &self,
            _dataset: Dataset,
            bounds: Bounds,
            destination_path: &camino::Utf8Path,
        ) -> Result<(), FetchError> {
            let width = 4usize;
            let height = 4usize;
            let raster = Raster::new(width, height, bounds, vec![100.0; width * height]);
            write_raster(&destination_path.to_owned(), &raster).map_err(|e| FetchError {
                retryable: false,
                cause: e.to_string(),
            })
        }
    }

    fn ctx(dir: &tempfile::TempDir) -> PipelineContext {
        PipelineContext::new(
            camino::Utf8Path::from_path(dir.path()).unwrap(),
            RegionRegistry::default(),
        )
    }

    #[test]
    fn merges_single_tile_plan_into_raster_covering_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(-90.0, 35.0, -89.0, 36.0).unwrap();
        let plan = ResolutionPlan {
            dataset: Dataset::Dem30mGlobal,
            source_tiles: std::collections::BTreeSet::from([TileId::new(35, -90)]),
            expected_merged_resolution_m: 30,
        };
        let downloader = FixtureDownloader;

        let (merged, path) = merge_tiles(
            &context,
            &plan,
            bounds,
            &downloader,
            "tennessee",
            RegionType::UsaState,
        )
        .unwrap();
        assert!(path.exists());
        assert_eq!(merged.bounds(), bounds);
        assert!(merged.width() > 0 && merged.height() > 0);
    }

    /// A downloader that writes a truncated, unreadable file on its first
    /// call for a given destination and a valid tile on every call after.
    struct CorruptThenFixedDownloader {
        fetch_count: std::sync::atomic::AtomicUsize,
    }

    impl Downloader for CorruptThenFixedDownloader {
        fn fetch(
            &self,
            _dataset: Dataset,
            bounds: Bounds,
            destination_path: &camino::Utf8Path,
        ) -> Result<(), FetchError> {
            let n = self
                .fetch_count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                fs::write(destination_path, b"not a raster").unwrap();
                return Ok(());
            }
            let raster = Raster::new(4, 4, bounds, vec![100.0; 16]);
            write_raster(&destination_path.to_owned(), &raster).map_err(|e| FetchError {
                retryable: false,
                cause: e.to_string(),
            })
        }
    }

    /// A downloader that always writes an unreadable file.
    struct AlwaysCorruptDownloader;

    impl Downloader for AlwaysCorruptDownloader {
        fn fetch(
            &self,
            _dataset: Dataset,
            _bounds: Bounds,
            destination_path: &camino::Utf8Path,
        ) -> Result<(), FetchError> {
            fs::write(destination_path, b"not a raster").unwrap();
            Ok(())
        }
    }

    #[test]
    fn corrupt_tile_is_deleted_and_redownloaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(-90.0, 35.0, -89.0, 36.0).unwrap();
        let plan = ResolutionPlan {
            dataset: Dataset::Dem30mGlobal,
            source_tiles: std::collections::BTreeSet::from([TileId::new(35, -90)]),
            expected_merged_resolution_m: 30,
        };
        let downloader = CorruptThenFixedDownloader {
            fetch_count: std::sync::atomic::AtomicUsize::new(0),
        };

        let (merged, _) = merge_tiles(
            &context,
            &plan,
            bounds,
            &downloader,
            "tennessee",
            RegionType::UsaState,
        )
        .unwrap();
        assert_eq!(merged.bounds(), bounds);
        assert_eq!(
            downloader.fetch_count.load(std::sync::atomic::Ordering::SeqCst),
            2,
            "expected exactly one re-download after the corrupt first fetch"
        );
    }

    #[test]
    fn permanently_corrupt_tile_is_a_fatal_error_not_a_silent_gap() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(-90.0, 35.0, -89.0, 36.0).unwrap();
        let plan = ResolutionPlan {
            dataset: Dataset::Dem30mGlobal,
            source_tiles: std::collections::BTreeSet::from([TileId::new(35, -90)]),
            expected_merged_resolution_m: 30,
        };
        let downloader = AlwaysCorruptDownloader;

        let err = merge_tiles(
            &context,
            &plan,
            bounds,
            &downloader,
            "tennessee",
            RegionType::UsaState,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::TileCorrupt { .. }));
    }
}
