use crate::{
    config::PipelineContext,
    error::{PipelineError, PipelineResult},
    orchestrator::write_raster,
    version::{md5_file, ArtifactVersion, Metadata},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use dem_core::{Bounds, Raster};
use geo::{
    BoundingRect, Contains, Coord, LineString, Polygon, Rect,
};
use rstar::{RTree, AABB};
use std::fs;

/// A polygon ring indexed by its bounding envelope, so the per-pixel
/// mask pass can skip full point-in-ring testing for rings whose
/// envelope cannot possibly contain a given pixel (spec §4.6; same
/// bbox-prefilter-before-exact-geometry-test idiom as a boundary
/// lookup accelerated by a spatial index).
struct IndexedRing {
    ring: LineString<f64>,
    envelope: AABB<[f64; 2]>,
}

impl rstar::RTreeObject for IndexedRing {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Masks `merged` to `polygon`, tightly crops the result, and writes
/// both the clipped raster and its sidecar metadata (spec §4.6).
pub fn clip(
    ctx: &PipelineContext,
    region_id: &str,
    region_type: crate::config::RegionType,
    dataset: dem_core::Dataset,
    merged: &Raster,
    merged_path: &Utf8PathBuf,
    polygon: &Polygon<f64>,
) -> PipelineResult<(Raster, Utf8PathBuf)> {
    let polygon_bounds = polygon_bounds(polygon);
    if !polygon_bounds.is_contained_in(&merged.bounds()) {
        return Err(PipelineError::ClippingMisaligned {
            region_id: region_id.to_string(),
        });
    }

    let masked = mask_to_polygon(merged, polygon);
    let cropped = tight_crop(&masked).ok_or_else(|| PipelineError::ClippingEmpty {
        region_id: region_id.to_string(),
    })?;

    let clipped_dir = ctx.clipped_dir(dataset.file_tag());
    fs::create_dir_all(&clipped_dir).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "clip",
        path: clipped_dir.clone(),
        source,
    })?;
    let clipped_path = clipped_dir.join(format!("{region_id}.bin"));
    write_raster(&clipped_path, &cropped).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "clip",
        path: clipped_path.clone(),
        source,
    })?;

    let source_hash = md5_file(merged_path).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "clip",
        path: merged_path.clone(),
        source,
    })?;
    let metadata = Metadata {
        version: ArtifactVersion::ClippedV1,
        source_file_path: merged_path.to_string(),
        source_file_hash: source_hash,
        region_id: region_id.to_string(),
        region_type,
        bounds: cropped.bounds(),
        resolution_m: dataset.resolution_m(),
        elevation_range: cropped.stats().map(|(min, max, _)| (min, max)),
        created_at: Utc::now(),
        dataset,
    };
    let sidecar_path = clipped_dir.join(format!("{region_id}.json"));
    let json = serde_json::to_string_pretty(&metadata).expect("Metadata always serializes");
    fs::write(&sidecar_path, json).map_err(|source| PipelineError::Io {
        region_id: region_id.to_string(),
        stage: "clip",
        path: sidecar_path,
        source,
    })?;

    Ok((cropped, clipped_path))
}

fn polygon_bounds(polygon: &Polygon<f64>) -> Bounds {
    let rect: Rect<f64> = polygon
        .bounding_rect()
        .expect("a polygon with at least one coordinate always has a bounding rect");
    Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
        .expect("polygon coordinates are always valid lat/lon")
}

fn build_ring_index(polygon: &Polygon<f64>) -> RTree<IndexedRing> {
    let mut rings = Vec::with_capacity(1 + polygon.interiors().len());
    rings.push(polygon.exterior().clone());
    for interior in polygon.interiors() {
        rings.push(interior.clone());
    }
    RTree::bulk_load(
        rings
            .into_iter()
            .map(|ring| {
                let rect = ring
                    .bounding_rect()
                    .expect("a ring always has a bounding rect");
                IndexedRing {
                    ring,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                }
            })
            .collect(),
    )
}

/// Marks every pixel whose center lies outside `polygon` as `NaN`
/// (spec §4.6 step 1). Even-odd membership is delegated to `geo`'s
/// `Contains` implementation, which already handles holes correctly; a
/// point exactly on the boundary is treated as inside ("lower-left
/// inclusive" — resolved open question, see DESIGN.md), matching the
/// Tile Grid's own half-open edge convention.
fn mask_to_polygon(raster: &Raster, polygon: &Polygon<f64>) -> Raster {
    let ring_index = build_ring_index(polygon);
    let mut out = raster.clone();
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            let value = raster.get(x, y);
            if value.is_nan() {
                continue;
            }
            let center = raster.pixel_center(x, y);
            if !point_is_inside(&ring_index, polygon, center) {
                out.set(x, y, f32::NAN);
            }
        }
    }
    out
}

fn point_is_inside(ring_index: &RTree<IndexedRing>, polygon: &Polygon<f64>, point: Coord<f64>) -> bool {
    let candidates: Vec<_> = ring_index
        .locate_in_envelope_intersecting(&AABB::from_point([point.x, point.y]))
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let geo_point = geo::Point::from(point);
    polygon.contains(&geo_point) || touches_boundary_lower_left(polygon, point)
}

/// Tie-break for a pixel center exactly on the polygon boundary: inside
/// iff it is the lower-left-most point of its touching edge, i.e. it
/// sits on the boundary but not strictly above/right of it. `geo`'s
/// `Contains` already excludes boundary points, so this recovers just
/// the lower-left corner of that set.
fn touches_boundary_lower_left(polygon: &Polygon<f64>, point: Coord<f64>) -> bool {
    ring_touches_lower_left(polygon.exterior(), point)
        && polygon
            .interiors()
            .iter()
            .all(|ring| !ring_touches_lower_left(ring, point))
}

fn ring_touches_lower_left(ring: &LineString<f64>, point: Coord<f64>) -> bool {
    let coords = ring.0.as_slice();
    for window in coords.windows(2) {
        let (a, b) = (window[0], window[1]);
        if point_on_segment(a, b, point) {
            return point.x <= a.x.min(b.x) + f64::EPSILON || point.y <= a.y.min(b.y) + f64::EPSILON;
        }
    }
    false
}

fn point_on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > 1e-9 {
        return false;
    }
    let within_x = p.x >= a.x.min(b.x) - 1e-9 && p.x <= a.x.max(b.x) + 1e-9;
    let within_y = p.y >= a.y.min(b.y) - 1e-9 && p.y <= a.y.max(b.y) + 1e-9;
    within_x && within_y
}

/// Removes leading/trailing all-`NaN` rows and columns (spec §4.6
/// step 2). Returns `None` if every pixel is `NaN`.
fn tight_crop(raster: &Raster) -> Option<Raster> {
    let (w, h) = (raster.width(), raster.height());

    let row_has_data = |y: usize| (0..w).any(|x| !raster.get(x, y).is_nan());
    let col_has_data = |x: usize| (0..h).any(|y| !raster.get(x, y).is_nan());

    let top = (0..h).find(|&y| row_has_data(y))?;
    let bottom = (0..h).rev().find(|&y| row_has_data(y))?;
    let left = (0..w).find(|&x| col_has_data(x))?;
    let right = (0..w).rev().find(|&x| col_has_data(x))?;

    if top > bottom || left > right {
        return None;
    }

    let new_width = right - left + 1;
    let new_height = bottom - top + 1;

    let bounds = raster.bounds();
    let px_w = bounds.width_deg() / w as f64;
    let px_h = bounds.height_deg() / h as f64;
    let new_bounds = Bounds::new(
        bounds.west + left as f64 * px_w,
        bounds.north - (bottom + 1) as f64 * px_h,
        bounds.west + (right + 1) as f64 * px_w,
        bounds.north - top as f64 * px_h,
    )
    .expect("a crop of a valid raster's bounds is always valid");

    let mut samples = Vec::with_capacity(new_width * new_height);
    for y in top..=bottom {
        for x in left..=right {
            samples.push(raster.get(x, y));
        }
    }

    Some(Raster::new(new_width, new_height, new_bounds, samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegionRegistry, RegionType};
    use dem_core::Dataset;
    use geo::polygon;

    fn ctx(dir: &tempfile::TempDir) -> PipelineContext {
        PipelineContext::new(
            camino::Utf8Path::from_path(dir.path()).unwrap(),
            RegionRegistry::default(),
        )
    }

    /// Scenario S1: 10x3 source, 8x1 rectangle polygon, aspect 8:1.
    #[test]
    fn tight_crop_preserves_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(-91.0, 34.0, -81.0, 37.0).unwrap();
        let raster = Raster::new(100, 30, bounds, vec![500.0; 100 * 30]);
        let merged_path = camino::Utf8Path::from_path(dir.path())
            .unwrap()
            .join("merged.bin");
        write_raster(&merged_path, &raster).unwrap();

        let rect = polygon![(x: -90.0, y: 35.0), (x: -82.0, y: 35.0), (x: -82.0, y: 36.0), (x: -90.0, y: 36.0), (x: -90.0, y: 35.0)];

        let (clipped, _) = clip(
            &context,
            "tennessee",
            RegionType::UsaState,
            Dataset::Dem30mGlobal,
            &raster,
            &merged_path,
            &rect,
        )
        .unwrap();

        let aspect = clipped.width() as f64 / clipped.height() as f64;
        approx::assert_abs_diff_eq!(aspect, 8.0, epsilon = 0.2);
    }

    #[test]
    fn clip_fails_when_polygon_outside_raster_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let raster = Raster::new(10, 10, bounds, vec![1.0; 100]);
        let merged_path = camino::Utf8Path::from_path(dir.path())
            .unwrap()
            .join("merged.bin");
        write_raster(&merged_path, &raster).unwrap();

        let far_away = polygon![(x: 50.0, y: 50.0), (x: 51.0, y: 50.0), (x: 51.0, y: 51.0), (x: 50.0, y: 51.0), (x: 50.0, y: 50.0)];

        let err = clip(
            &context,
            "nowhere",
            RegionType::Area,
            Dataset::Dem30mGlobal,
            &raster,
            &merged_path,
            &far_away,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ClippingMisaligned { .. }));
    }

    #[test]
    fn no_all_nan_edge_rows_or_columns_after_crop() {
        let dir = tempfile::tempdir().unwrap();
        let context = ctx(&dir);
        let bounds = Bounds::new(0.0, 0.0, 2.0, 2.0).unwrap();
        let raster = Raster::new(4, 4, bounds, vec![10.0; 16]);
        let merged_path = camino::Utf8Path::from_path(dir.path())
            .unwrap()
            .join("merged.bin");
        write_raster(&merged_path, &raster).unwrap();

        let small = polygon![(x: 0.5, y: 0.5), (x: 1.5, y: 0.5), (x: 1.5, y: 1.5), (x: 0.5, y: 1.5), (x: 0.5, y: 0.5)];

        let (clipped, _) = clip(
            &context,
            "small",
            RegionType::Area,
            Dataset::Dem30mGlobal,
            &raster,
            &merged_path,
            &small,
        )
        .unwrap();

        for y in 0..clipped.height() {
            assert!((0..clipped.width()).any(|x| !clipped.get(x, y).is_nan()));
        }
        for x in 0..clipped.width() {
            assert!((0..clipped.height()).any(|y| !clipped.get(x, y).is_nan()));
        }
    }
}
