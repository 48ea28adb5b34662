use crate::{
    config::{PipelineContext, RegionType},
    error::{PipelineError, PipelineResult},
    orchestrator::write_raster,
    version::{md5_file, ArtifactVersion, Metadata},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use dem_core::{Dataset, Raster};
use std::fs;

/// Maximum aspect-ratio drift tolerated between source and processed
/// rasters before the self-check in spec §4.7 fires.
const ASPECT_RATIO_TOLERANCE: f64 = 0.01;

/// Uniformly downsamples `clipped` to at most `target_pixels` along its
/// longer side, using the same stride on both axes so the aspect ratio
/// is preserved exactly (spec §4.7).
pub fn process(
    ctx: &PipelineContext,
    region_id: &str,
    region_type: RegionType,
    dataset: Dataset,
    clipped: &Raster,
    clipped_path: &Utf8PathBuf,
    target_pixels: u32,
) -> PipelineResult<(Raster, Utf8PathBuf)> {
    let downsampled = downsample(clipped, target_pixels);

    let source_ratio = clipped.width() as f64 / clipped.height() as f64;
    let processed_ratio = downsampled.width() as f64 / downsampled.height() as f64;
    if (source_ratio - processed_ratio).abs() > ASPECT_RATIO_TOLERANCE {
        return Err(PipelineError::AspectRatioDrift {
            region_id: region_id.to_string(),
            source_ratio,
            processed_ratio,
        });
    }

    let processed_dir = ctx.processed_dir(dataset.file_tag());
    fs::create_dir_all(&processed_dir).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "process",
        path: processed_dir.clone(),
        source,
    })?;
    let processed_path = processed_dir.join(format!("{region_id}.bin"));
    write_raster(&processed_path, &downsampled).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "process",
        path: processed_path.clone(),
        source,
    })?;

    let source_hash = md5_file(clipped_path).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "process",
        path: clipped_path.clone(),
        source,
    })?;
    let metadata = Metadata {
        version: ArtifactVersion::ProcessedV2,
        source_file_path: clipped_path.to_string(),
        source_file_hash: source_hash,
        region_id: region_id.to_string(),
        region_type,
        bounds: downsampled.bounds(),
        resolution_m: dataset.resolution_m(),
        elevation_range: downsampled.stats().map(|(min, max, _)| (min, max)),
        created_at: Utc::now(),
        dataset,
    };
    let sidecar_path = processed_dir.join(format!("{region_id}.json"));
    let json = serde_json::to_string_pretty(&metadata).expect("Metadata always serializes");
    fs::write(&sidecar_path, json).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "process",
        path: sidecar_path,
        source,
    })?;

    Ok((downsampled, processed_path))
}

/// Stride downsample per spec §4.7: `step = max(1, ceil(max(W, H) / T))`
/// applied identically to both axes, dimensions read from the resulting
/// array rather than recomputed.
fn downsample(raster: &Raster, target_pixels: u32) -> Raster {
    let (width, height) = (raster.width(), raster.height());
    let longer = width.max(height) as f64;
    let step = (1usize).max((longer / f64::from(target_pixels)).ceil() as usize);

    let xs: Vec<usize> = (0..width).step_by(step).collect();
    let ys: Vec<usize> = (0..height).step_by(step).collect();

    let new_width = xs.len();
    let new_height = ys.len();

    let mut samples = Vec::with_capacity(new_width * new_height);
    for &y in &ys {
        for &x in &xs {
            samples.push(raster.get(x, y));
        }
    }

    Raster::new(new_width, new_height, raster.bounds(), samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionRegistry;
    use dem_core::Bounds;

    fn ctx(dir: &tempfile::TempDir) -> PipelineContext {
        PipelineContext::new(
            camino::Utf8Path::from_path(dir.path()).unwrap(),
            RegionRegistry::default(),
        )
    }

    #[test]
    fn downsample_preserves_aspect_ratio_exactly() {
        let bounds = Bounds::new(0.0, 0.0, 8.0, 1.0).unwrap();
        let raster = Raster::new(800, 100, bounds, vec![1.0; 800 * 100]);
        let result = downsample(&raster, 200);
        let source_ratio = 800.0 / 100.0;
        let result_ratio = result.width() as f64 / result.height() as f64;
        approx::assert_abs_diff_eq!(source_ratio, result_ratio, epsilon = ASPECT_RATIO_TOLERANCE);
    }

    #[test]
    fn downsample_is_a_no_op_when_already_within_target() {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let raster = Raster::new(50, 50, bounds, vec![1.0; 2500]);
        let result = downsample(&raster, 200);
        assert_eq!(result.width(), 50);
        assert_eq!(result.height(), 50);
    }

    #[test]
    fn process_end_to_end_writes_artifact_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(0.0, 0.0, 8.0, 1.0).unwrap();
        let clipped = Raster::new(800, 100, bounds, vec![42.0; 800 * 100]);
        let clipped_path = camino::Utf8Path::from_path(dir.path())
            .unwrap()
            .join("clipped.bin");
        write_raster(&clipped_path, &clipped).unwrap();

        let (processed, path) = process(
            &context,
            "tennessee",
            RegionType::UsaState,
            Dataset::Dem30mGlobal,
            &clipped,
            &clipped_path,
            200,
        )
        .unwrap();

        assert!(path.exists());
        assert!(processed.width() <= 200 || processed.height() <= 200);
    }
}
