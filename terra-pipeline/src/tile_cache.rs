use crate::{
    config::{PipelineContext, RegionType},
    downloader::Downloader,
    error::{PipelineError, PipelineResult},
    version::{md5_file, ArtifactVersion, Metadata},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use dem_core::{Bounds, Dataset, TileId};
use fs4::FileExt;
use std::fs::{self, File};

/// Filesystem-backed, content-addressed store for raw tile files (spec
/// §4.2). Shared across every region's pipeline run — no per-region
/// subdirectories.
pub struct TileCache<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> TileCache<'a> {
    /// Builds a cache rooted at `ctx.raw_tiles_dir(dataset.file_tag())`.
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    fn tiles_dir(&self, dataset: Dataset) -> Utf8PathBuf {
        self.ctx.raw_tiles_dir(dataset.file_tag())
    }

    fn tile_path(&self, tile: TileId, dataset: Dataset) -> Utf8PathBuf {
        self.tiles_dir(dataset).join(tile.filename(dataset))
    }

    fn sidecar_path(&self, tile: TileId, dataset: Dataset) -> Utf8PathBuf {
        self.tiles_dir(dataset)
            .join(format!("{}.json", tile.filename(dataset)))
    }

    fn lock_path(&self, tile: TileId, dataset: Dataset) -> Utf8PathBuf {
        self.tiles_dir(dataset)
            .join(format!("{}.lock", tile.filename(dataset)))
    }

    fn tmp_path(&self, tile: TileId, dataset: Dataset) -> Utf8PathBuf {
        self.tiles_dir(dataset)
            .join(format!("{}.tmp", tile.filename(dataset)))
    }

    /// Whether `tile` is present and passes its hash check (spec §4.2:
    /// file exists, sidecar is `raw_v1`, and its recorded hash matches).
    pub fn contains(&self, tile: TileId, dataset: Dataset) -> PipelineResult<bool> {
        let path = self.tile_path(tile, dataset);
        if !path.exists() {
            return Ok(false);
        }
        let sidecar_path = self.sidecar_path(tile, dataset);
        let Ok(raw) = fs::read_to_string(&sidecar_path) else {
            return Ok(false);
        };
        let Ok(metadata) = serde_json::from_str::<Metadata>(&raw) else {
            return Ok(false);
        };
        if metadata.version != ArtifactVersion::RawV1 {
            return Ok(false);
        }
        let current_hash = md5_file(&path).map_err(|source| PipelineError::Io {
            region_id: String::new(),
            stage: "tile_cache",
            path: path.clone(),
            source,
        })?;
        Ok(current_hash == metadata.source_file_hash)
    }

    /// Removes `tile`'s cached file and sidecar, if present, so the next
    /// [`TileCache::ensure_tile`] call re-downloads it from scratch.
    pub fn invalidate(&self, tile: TileId, dataset: Dataset) {
        let _ = fs::remove_file(self.tile_path(tile, dataset));
        let _ = fs::remove_file(self.sidecar_path(tile, dataset));
    }

    /// Ensures `tile` is present, downloading it via `downloader` if
    /// absent or failing its hash check. Cross-process-safe: the
    /// download is guarded by an exclusive advisory lock on the tile's
    /// `.lock` file, data is staged to `.tmp`, and renamed atomically on
    /// success (spec §4.2, §5).
    pub fn ensure_tile(
        &self,
        tile: TileId,
        dataset: Dataset,
        downloader: &dyn Downloader,
        region_id: &str,
        region_type: RegionType,
    ) -> PipelineResult<Utf8PathBuf> {
        let path = self.tile_path(tile, dataset);

        if self.contains(tile, dataset)? {
            log::debug!("tile cache hit for {}", tile.filename(dataset));
            return Ok(path);
        }
        log::debug!("tile cache miss for {}", tile.filename(dataset));

        let dir = self.tiles_dir(dataset);
        fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage: "tile_cache",
            path: dir.clone(),
            source,
        })?;

        let lock_path = self.lock_path(tile, dataset);
        let lock_file = File::create(&lock_path).map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage: "tile_cache",
            path: lock_path.clone(),
            source,
        })?;
        lock_file
            .lock_exclusive()
            .map_err(|source| PipelineError::Io {
                region_id: region_id.to_string(),
                stage: "tile_cache",
                path: lock_path.clone(),
                source,
            })?;

        let result =
            self.ensure_tile_locked(tile, dataset, downloader, region_id, region_type, &path);

        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn ensure_tile_locked(
        &self,
        tile: TileId,
        dataset: Dataset,
        downloader: &dyn Downloader,
        region_id: &str,
        region_type: RegionType,
        path: &Utf8PathBuf,
    ) -> PipelineResult<Utf8PathBuf> {
        // Another writer may have finished while we waited for the lock.
        if self.contains(tile, dataset)? {
            log::debug!("tile {} became available while waiting on lock", tile.filename(dataset));
            return Ok(path.clone());
        }

        let tmp_path = self.tmp_path(tile, dataset);
        if tmp_path.exists() {
            log::warn!("removing partial download at {tmp_path}");
            let _ = fs::remove_file(&tmp_path);
        }

        let bounds = tile.bounds();
        self.download_with_retry(downloader, dataset, bounds, &tmp_path, tile, region_id)?;

        fs::rename(&tmp_path, path).map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage: "tile_cache",
            path: path.clone(),
            source,
        })?;

        let hash = md5_file(path).map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage: "tile_cache",
            path: path.clone(),
            source,
        })?;
        let metadata = Metadata {
            version: ArtifactVersion::RawV1,
            source_file_path: String::new(),
            source_file_hash: hash,
            region_id: region_id.to_string(),
            region_type,
            bounds,
            resolution_m: dataset.resolution_m(),
            elevation_range: None,
            created_at: Utc::now(),
            dataset,
        };
        let sidecar_path = self.sidecar_path(tile, dataset);
        let sidecar_json = serde_json::to_string_pretty(&metadata).expect("Metadata always serializes");
        fs::write(&sidecar_path, sidecar_json).map_err(|source| PipelineError::Io {
            region_id: region_id.to_string(),
            stage: "tile_cache",
            path: sidecar_path,
            source,
        })?;

        Ok(path.clone())
    }

    fn download_with_retry(
        &self,
        downloader: &dyn Downloader,
        dataset: Dataset,
        bounds: Bounds,
        tmp_path: &Utf8PathBuf,
        tile: TileId,
        _region_id: &str,
    ) -> PipelineResult<()> {
        let policy = self.ctx.retry_policy;
        let mut last_cause = String::new();

        for attempt in 1..=policy.max_attempts {
            if self.ctx.cancellation.is_cancelled() {
                let _ = fs::remove_file(tmp_path);
                return Err(PipelineError::TileDownloadFailed {
                    tile: tile.filename(dataset),
                    cause: "cancelled".to_string(),
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match downloader.fetch(dataset, bounds, tmp_path) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_cause = e.cause.clone();
                    if !e.retryable {
                        break;
                    }
                    log::warn!(
                        "tile download attempt {attempt}/{} failed for {}: {}",
                        policy.max_attempts,
                        tile.filename(dataset),
                        e.cause
                    );
                }
            }
        }

        let _ = fs::remove_file(tmp_path);
        Err(PipelineError::TileDownloadFailed {
            tile: tile.filename(dataset),
            cause: last_cause,
        })
    }
}
