use crate::{
    boundary::BoundaryService,
    boundary_catalog::ResolutionTier,
    clip,
    config::{PipelineContext, RegionType},
    downloader::Downloader,
    error::{PipelineError, PipelineResult},
    export, manifest, orchestrator, process,
    resolution,
    version::is_fresh,
};
use camino::Utf8PathBuf;
use dem_core::{Bounds, Raster};
use geo::Polygon;

/// Default longer-side output size when a caller doesn't specify one.
pub const DEFAULT_TARGET_PIXELS: u32 = 1024;

/// Outcome of a single `ensure_region` run.
#[derive(Debug)]
pub struct EnsureRegionOutcome {
    /// The resolution plan used for this run.
    pub dataset: dem_core::Dataset,
    /// Path to the gzipped export JSON.
    pub export_path: Utf8PathBuf,
    /// Path to the gzipped border JSON.
    pub border_path: Utf8PathBuf,
}

/// Runs every stage for `region_id` (spec §4.11), skipping any stage
/// whose output already exists, has a matching version, and has a
/// fresh upstream hash — unless `force_reprocess` is set, which
/// unconditionally re-runs every stage.
pub fn ensure_region(
    ctx: &PipelineContext,
    region_id: &str,
    target_pixels: u32,
    force_reprocess: bool,
    downloader: &dyn Downloader,
    boundary: &BoundaryService,
) -> PipelineResult<EnsureRegionOutcome> {
    let region = ctx
        .regions
        .get(region_id)
        .cloned()
        .ok_or_else(|| PipelineError::UnknownRegion {
            region_id: region_id.to_string(),
        })?;

    let polygon = resolve_polygon(boundary, &region)?;
    let plan = resolution::plan_resolution(region.bounds, target_pixels, region.region_type)?;

    let merged_dir = ctx.merged_dir(plan.dataset.file_tag());
    let merged_path = merged_dir.join(format!("{region_id}.bin"));
    let merged_sidecar = merged_dir.join(format!("{region_id}.json"));

    let (merged, merged_path) = if !force_reprocess
        && stage_is_fresh(&merged_sidecar, &merged_path, None)
    {
        log::debug!("merged raster for {region_id} is fresh, skipping orchestrator");
        (
            orchestrator::read_raster(&merged_path).map_err(|source| PipelineError::Io {
                region_id: region_id.to_string(),
                stage: "orchestrator",
                path: merged_path.clone(),
                source,
            })?,
            merged_path,
        )
    } else {
        orchestrator::merge_tiles(
            ctx,
            &plan,
            region.bounds,
            downloader,
            region_id,
            region.region_type,
        )?
    };

    let clipped_dir = ctx.clipped_dir(plan.dataset.file_tag());
    let clipped_path = clipped_dir.join(format!("{region_id}.bin"));
    let clipped_sidecar = clipped_dir.join(format!("{region_id}.json"));

    let (clipped, clipped_path) = if !force_reprocess
        && stage_is_fresh(&clipped_sidecar, &clipped_path, Some(&merged_path))
    {
        log::debug!("clipped raster for {region_id} is fresh, skipping clip stage");
        (
            orchestrator::read_raster(&clipped_path).map_err(|source| PipelineError::Io {
                region_id: region_id.to_string(),
                stage: "clip",
                path: clipped_path.clone(),
                source,
            })?,
            clipped_path,
        )
    } else {
        clip::clip(
            ctx,
            region_id,
            region.region_type,
            plan.dataset,
            &merged,
            &merged_path,
            &polygon,
        )?
    };

    let processed_dir = ctx.processed_dir(plan.dataset.file_tag());
    let processed_path = processed_dir.join(format!("{region_id}.bin"));
    let processed_sidecar = processed_dir.join(format!("{region_id}.json"));

    let (processed, processed_path) = if !force_reprocess
        && stage_is_fresh(&processed_sidecar, &processed_path, Some(&clipped_path))
    {
        log::debug!("processed raster for {region_id} is fresh, skipping process stage");
        (
            orchestrator::read_raster(&processed_path).map_err(|source| PipelineError::Io {
                region_id: region_id.to_string(),
                stage: "process",
                path: processed_path.clone(),
                source,
            })?,
            processed_path,
        )
    } else {
        process::process(
            ctx,
            region_id,
            region.region_type,
            plan.dataset,
            &clipped,
            &clipped_path,
            target_pixels,
        )?
    };

    let base_name = format!("{region_id}_{}_{target_pixels}px_v2", plan.dataset.file_tag());
    let export_path = ctx.exports_dir().join(format!("{base_name}.json.gz"));
    let border_path = ctx.exports_dir().join(format!("{base_name}_borders.json.gz"));
    let export_sidecar = ctx.exports_dir().join(format!("{base_name}.meta.json"));

    let (export_path, border_path) = if !force_reprocess
        && stage_is_fresh(&export_sidecar, &export_path, Some(&processed_path))
        && border_path.exists()
    {
        log::debug!("export for {region_id} is fresh, skipping export stage");
        (export_path, border_path)
    } else {
        export::export(
            ctx,
            region_id,
            &region.display_name,
            region.region_type,
            plan.dataset,
            &processed,
            &processed_path,
            &polygon,
            target_pixels,
        )?
    };

    Ok(EnsureRegionOutcome {
        dataset: plan.dataset,
        export_path,
        border_path,
    })
}

/// Per-stage idempotent-skip check (spec §4.11 step 8, §4.9): the
/// output file and its sidecar must both exist, and — when an upstream
/// path is given — the sidecar's recorded hash must still match the
/// current upstream file.
fn stage_is_fresh(sidecar_path: &Utf8PathBuf, output_path: &Utf8PathBuf, upstream: Option<&Utf8PathBuf>) -> bool {
    if !output_path.exists() || !sidecar_path.exists() {
        return false;
    }
    let Ok(raw) = std::fs::read_to_string(sidecar_path) else {
        return false;
    };
    let Ok(metadata) = serde_json::from_str::<crate::version::Metadata>(&raw) else {
        return false;
    };
    match upstream {
        Some(upstream_path) => is_fresh(&metadata, upstream_path).unwrap_or(false),
        None => true,
    }
}

fn resolve_polygon(
    boundary: &BoundaryService,
    region: &crate::config::RegionConfig,
) -> PipelineResult<Polygon<f64>> {
    match region.region_type {
        RegionType::Country => boundary.country_polygon(&region.display_name, ResolutionTier::Medium50m),
        RegionType::UsaState => {
            boundary.state_polygon("USA", &region.display_name, ResolutionTier::Medium50m)
        }
        RegionType::Area => rectangle_polygon(region.bounds),
    }
}

/// An `Area` region has no boundary-catalog entry (spec §4.11 step 2:
/// "`Area` uses a region-specific polygon from config"); lacking a
/// dedicated polygon field on `RegionConfig` beyond its bounding box,
/// this treats the region's own bounds rectangle as its polygon.
fn rectangle_polygon(bounds: Bounds) -> PipelineResult<Polygon<f64>> {
    use geo::{Coord, LineString};
    let ring = LineString(vec![
        Coord { x: bounds.west, y: bounds.south },
        Coord { x: bounds.east, y: bounds.south },
        Coord { x: bounds.east, y: bounds.north },
        Coord { x: bounds.west, y: bounds.north },
        Coord { x: bounds.west, y: bounds.south },
    ]);
    Ok(Polygon::new(ring, vec![]))
}

/// Rebuilds the manifest from current exports (spec §4.10, CLI
/// `regenerate-manifest`).
pub fn regenerate_manifest(ctx: &PipelineContext) -> PipelineResult<manifest::Manifest> {
    let built = manifest::build_manifest(ctx, |region_id| ctx.regions.get(region_id).cloned())?;

    let manifest_path = ctx.exports_dir().join("manifest.json");
    std::fs::create_dir_all(ctx.exports_dir()).map_err(|source| PipelineError::Io {
        region_id: String::new(),
        stage: "manifest",
        path: ctx.exports_dir(),
        source,
    })?;
    let json = serde_json::to_string_pretty(&built).expect("Manifest always serializes");
    std::fs::write(&manifest_path, json).map_err(|source| PipelineError::Io {
        region_id: String::new(),
        stage: "manifest",
        path: manifest_path,
        source,
    })?;

    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boundary_catalog::{BoundaryCatalog, CatalogFetchError},
        config::{RegionConfig, RegionRegistry},
        downloader::FetchError,
    };
    use dem_core::Dataset;
    use geo::polygon;
    use std::sync::Arc;

    struct FixtureDownloader;

    impl Downloader for FixtureDownloader {
        fn fetch(
            &self,
            _dataset: Dataset,
            bounds: Bounds,
            destination_path: &camino::Utf8Path,
        ) -> Result<(), FetchError> {
            let raster = Raster::new(4, 4, bounds, vec![250.0; 16]);
            orchestrator::write_raster(&destination_path.to_owned(), &raster).map_err(|e| {
                FetchError {
                    retryable: false,
                    cause: e.to_string(),
                }
            })
        }
    }

    struct FixtureCatalog;

    impl BoundaryCatalog for FixtureCatalog {
        fn fetch_archive(&self, _tier: ResolutionTier) -> Result<Vec<u8>, CatalogFetchError> {
            Ok(b"fixture".to_vec())
        }

        fn parse_archive(
            &self,
            _archive: &[u8],
        ) -> Result<Vec<(String, Option<String>, Polygon<f64>)>, CatalogFetchError> {
            Ok(vec![(
                "USA".to_string(),
                Some("Tennessee".to_string()),
                polygon![(x: -90.3, y: 34.98), (x: -81.6, y: 34.98), (x: -81.6, y: 36.68), (x: -90.3, y: 36.68), (x: -90.3, y: 34.98)],
            )])
        }
    }

    #[test]
    fn ensure_region_runs_full_pipeline_for_known_region() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RegionRegistry::new([RegionConfig {
            region_id: "tennessee".into(),
            display_name: "Tennessee".into(),
            bounds: Bounds::new(-90.3, 34.98, -81.6, 36.68).unwrap(),
            region_type: RegionType::UsaState,
            parent_region_id: None,
            contained_region_ids: None,
        }]);
        let ctx = PipelineContext::new(camino::Utf8Path::from_path(dir.path()).unwrap(), registry);
        let downloader = FixtureDownloader;
        let boundary = BoundaryService::new(&ctx, Arc::new(FixtureCatalog));

        let outcome = ensure_region(&ctx, "tennessee", 64, false, &downloader, &boundary).unwrap();
        assert!(outcome.export_path.exists());
        assert!(outcome.border_path.exists());
    }

    #[test]
    fn ensure_region_rejects_unknown_region() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(
            camino::Utf8Path::from_path(dir.path()).unwrap(),
            RegionRegistry::default(),
        );
        let downloader = FixtureDownloader;
        let boundary = BoundaryService::new(&ctx, Arc::new(FixtureCatalog));

        let err = ensure_region(&ctx, "atlantis", 64, false, &downloader, &boundary).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRegion { .. }));
    }

    #[test]
    fn second_run_skips_already_fresh_stages() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RegionRegistry::new([RegionConfig {
            region_id: "tennessee".into(),
            display_name: "Tennessee".into(),
            bounds: Bounds::new(-90.3, 34.98, -81.6, 36.68).unwrap(),
            region_type: RegionType::UsaState,
            parent_region_id: None,
            contained_region_ids: None,
        }]);
        let ctx = PipelineContext::new(camino::Utf8Path::from_path(dir.path()).unwrap(), registry);
        let downloader = FixtureDownloader;
        let boundary = BoundaryService::new(&ctx, Arc::new(FixtureCatalog));

        ensure_region(&ctx, "tennessee", 64, false, &downloader, &boundary).unwrap();
        let second = ensure_region(&ctx, "tennessee", 64, false, &downloader, &boundary).unwrap();
        assert!(second.export_path.exists());
    }
}
