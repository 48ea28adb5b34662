use crate::{
    config::RegionType,
    error::{PipelineError, PipelineResult},
};
use dem_core::{tiles_for_bounds, Bounds, Dataset, TileId};
use std::collections::BTreeSet;

/// Mean meters of ground distance subtended by one degree of latitude.
///
/// Treated as constant (spec §4.4 does not model ellipsoidal variation);
/// good enough at the oversampling margins this planner enforces.
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Latitude beyond which a dataset's polar variant is selected (spec §4.4).
const POLAR_THRESHOLD_DEG: f64 = 60.0;

/// Output of the resolution planner (spec §4.4): which dataset to use,
/// the exact tile set it implies, and the resolution actually delivered.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    /// Chosen dataset.
    pub dataset: Dataset,
    /// Every tile this dataset must supply to cover `bounds`.
    pub source_tiles: BTreeSet<TileId>,
    /// `dataset.resolution_m()`, restated for convenience at call sites.
    pub expected_merged_resolution_m: u32,
}

/// Chooses the coarsest dataset that satisfies the Nyquist rule for
/// `bounds` rendered at `target_pixels` along its longer side, for a
/// region of `region_type`.
///
/// Pure; performs no I/O. `target_pixels` is the longer of the two
/// output dimensions (spec §4.4).
pub fn plan_resolution(
    bounds: Bounds,
    target_pixels: u32,
    region_type: RegionType,
) -> PipelineResult<ResolutionPlan> {
    if target_pixels == 0 {
        return Err(PipelineError::ResolutionUnavailable {
            visible_m_per_pixel: f64::INFINITY,
            region_type: format!("{region_type:?}"),
        });
    }

    let visible_m_per_pixel = visible_meters_per_pixel(bounds, target_pixels);
    let resolution_m = select_resolution_tier(visible_m_per_pixel, region_type)?;
    let dataset = select_dataset(resolution_m, bounds, region_type);
    let source_tiles = tiles_for_bounds(bounds);

    Ok(ResolutionPlan {
        dataset,
        source_tiles,
        expected_merged_resolution_m: dataset.resolution_m(),
    })
}

/// `geographic_extent_m / output_pixels_along_that_axis`, taking the
/// longer of the two axes and scaling east-west extent by
/// `cos(center_latitude)` (spec §4.4 step 1).
fn visible_meters_per_pixel(bounds: Bounds, target_pixels: u32) -> f64 {
    let height_m = bounds.height_deg() * METERS_PER_DEGREE_LAT;
    let width_m =
        bounds.width_deg() * METERS_PER_DEGREE_LAT * bounds.center_lat().to_radians().cos();
    let longer_extent_m = height_m.max(width_m);
    longer_extent_m / f64::from(target_pixels)
}

/// Maps `visible_m_per_pixel` to a native resolution tier in meters,
/// per the fixed thresholds in spec §4.4 step 2.
fn select_resolution_tier(visible_m_per_pixel: f64, region_type: RegionType) -> PipelineResult<u32> {
    let unavailable = || PipelineError::ResolutionUnavailable {
        visible_m_per_pixel,
        region_type: format!("{region_type:?}"),
    };

    if visible_m_per_pixel >= 180.0 {
        Ok(90)
    } else if visible_m_per_pixel >= 60.0 {
        Ok(30)
    } else if visible_m_per_pixel >= 20.0 {
        if region_type == RegionType::UsaState {
            Ok(10)
        } else {
            Err(unavailable())
        }
    } else {
        Err(unavailable())
    }
}

/// Within a resolution tier, chooses polar vs. non-polar by latitude
/// (spec §4.4 step 3): beyond ±60° latitude uses the polar variant;
/// USA-Alaska at 10m has no polar sibling, so it falls through to the
/// 30m polar dataset instead.
fn select_dataset(resolution_m: u32, bounds: Bounds, region_type: RegionType) -> Dataset {
    let is_polar_latitude = bounds.center_lat().abs() >= POLAR_THRESHOLD_DEG;

    if resolution_m == 10 {
        debug_assert_eq!(region_type, RegionType::UsaState);
        return if is_polar_latitude {
            Dataset::Dem30mPolar
        } else {
            Dataset::Dem10mUsa
        };
    }

    let base = if resolution_m == 30 {
        Dataset::Dem30mGlobal
    } else {
        Dataset::Dem90mGlobal
    };

    if is_polar_latitude {
        base.polar_sibling().unwrap_or(base)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_region_selects_90m_dataset() {
        // Scenario S3: 20x35 degree region, target 2048px.
        let bounds = Bounds::new(20.0, 35.0, 40.0, 70.0).unwrap();
        let plan = plan_resolution(bounds, 2048, RegionType::Country).unwrap();
        assert_eq!(plan.dataset, Dataset::Dem90mGlobal);
        assert_eq!(plan.expected_merged_resolution_m, 90);
    }

    #[test]
    fn tiny_region_at_huge_target_pixels_is_unavailable() {
        // Scenario S4: 1x1 degree region, 100000 target pixels, Country.
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let err = plan_resolution(bounds, 100_000, RegionType::Country).unwrap_err();
        assert!(matches!(err, PipelineError::ResolutionUnavailable { .. }));
    }

    #[test]
    fn usa_state_unlocks_10m_tier_others_do_not() {
        // visible_m_per_pixel in [20, 60): 10m for UsaState, fail otherwise.
        let bounds = Bounds::new(0.0, 0.0, 0.5, 0.5).unwrap();
        let target = (0.5 * METERS_PER_DEGREE_LAT / 30.0) as u32; // ~30 m/px

        let usa = plan_resolution(bounds, target, RegionType::UsaState).unwrap();
        assert_eq!(usa.dataset, Dataset::Dem10mUsa);

        let country = plan_resolution(bounds, target, RegionType::Country).unwrap_err();
        assert!(matches!(country, PipelineError::ResolutionUnavailable { .. }));
    }

    #[test]
    fn polar_latitude_selects_polar_sibling() {
        let bounds = Bounds::new(20.0, 65.0, 40.0, 75.0).unwrap();
        let plan = plan_resolution(bounds, 512, RegionType::Country).unwrap();
        assert!(plan.dataset.is_polar());
    }

    #[test]
    fn zero_target_pixels_is_rejected() {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let err = plan_resolution(bounds, 0, RegionType::Country).unwrap_err();
        assert!(matches!(err, PipelineError::ResolutionUnavailable { .. }));
    }

    #[test]
    fn source_tiles_matches_tile_grid_enumeration() {
        let bounds = Bounds::new(-91.0, 35.0, -89.0, 37.0).unwrap();
        let plan = plan_resolution(bounds, 2048, RegionType::Country).unwrap();
        assert_eq!(plan.source_tiles, tiles_for_bounds(bounds));
    }
}
