use crate::{error::DemCoreError, C};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in degrees: `(west, south, east, north)`.
///
/// Always validated on construction: no non-finite edges, latitudes
/// within `[-90, 90]`, longitudes within `[-180, 180]`, and `west <
/// east` (antimeridian-crossing bounds are rejected — spec §8, S6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Western edge, in degrees longitude.
    pub west: C,
    /// Southern edge, in degrees latitude.
    pub south: C,
    /// Eastern edge, in degrees longitude.
    pub east: C,
    /// Northern edge, in degrees latitude.
    pub north: C,
}

impl Bounds {
    /// Constructs a new `Bounds`, validating every edge.
    pub fn new(west: C, south: C, east: C, north: C) -> Result<Self, DemCoreError> {
        validate_lon(west)?;
        validate_lon(east)?;
        validate_lat(south)?;
        validate_lat(north)?;
        if west >= east {
            return Err(DemCoreError::InvalidBounds { west, east });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// East-west extent in degrees.
    pub fn width_deg(&self) -> C {
        self.east - self.west
    }

    /// North-south extent in degrees.
    pub fn height_deg(&self) -> C {
        self.north - self.south
    }

    /// Latitude of the bounding box's center, used by the resolution
    /// planner's cosine-of-latitude east-west scaling.
    pub fn center_lat(&self) -> C {
        (self.north + self.south) / 2.0
    }

    /// Whether `self` is entirely contained within `other`.
    pub fn is_contained_in(&self, other: &Bounds) -> bool {
        self.west >= other.west
            && self.east <= other.east
            && self.south >= other.south
            && self.north <= other.north
    }

    /// Whether `self` and `other` overlap (share interior area).
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.west < other.east
            && self.east > other.west
            && self.south < other.north
            && self.north > other.south
    }
}

fn validate_lat(value: C) -> Result<(), DemCoreError> {
    if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
        return Err(DemCoreError::InvalidCoordinate {
            value,
            axis: "latitude",
        });
    }
    Ok(())
}

fn validate_lon(value: C) -> Result<(), DemCoreError> {
    if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
        return Err(DemCoreError::InvalidCoordinate {
            value,
            axis: "longitude",
        });
    }
    Ok(())
}

/// A 2D grid of 32-bit-float elevation samples with `NaN` as the
/// "no data" sentinel.
///
/// Pixels are square in degree-space; the grid is always tagged
/// `EPSG:4326` (geographic WGS84) per spec §3 — this pipeline does not
/// reproject.
#[derive(Debug, Clone)]
pub struct Raster {
    width: usize,
    height: usize,
    bounds: Bounds,
    /// Row-major, north-to-south, west-to-east, length `width * height`.
    samples: Vec<f32>,
}

/// Fixed CRS tag carried by every raster this pipeline produces.
pub const CRS_TAG: &str = "EPSG:4326";

impl Raster {
    /// Builds a raster from row-major samples.
    ///
    /// # Panics
    ///
    /// Panics if `samples.len() != width * height`. Every caller in
    /// this codebase constructs `samples` from `width`/`height` so this
    /// is an implementation-bug guard, not a user-input check.
    pub fn new(width: usize, height: usize, bounds: Bounds, samples: Vec<f32>) -> Self {
        assert_eq!(
            samples.len(),
            width * height,
            "raster sample count must equal width * height"
        );
        Self {
            width,
            height,
            bounds,
            samples,
        }
    }

    /// Builds an all-`NaN` raster of the given dimensions and bounds.
    pub fn empty(width: usize, height: usize, bounds: Bounds) -> Self {
        Self::new(width, height, bounds, vec![f32::NAN; width * height])
    }

    /// Raster width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Raster height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raster's geographic bounds.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Row-major sample slice.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable row-major sample slice.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Reads the sample at raster coordinates `(x, y)`, `(0, 0)` being
    /// the northwest corner.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.samples[y * self.width + x]
    }

    /// Sets the sample at raster coordinates `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`.
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.samples[y * self.width + x] = value;
    }

    /// Geographic center of pixel `(x, y)`.
    pub fn pixel_center(&self, x: usize, y: usize) -> geo::Coord<C> {
        let px_w = self.bounds.width_deg() / self.width as C;
        let px_h = self.bounds.height_deg() / self.height as C;
        geo::Coord {
            x: self.bounds.west + (x as C + 0.5) * px_w,
            y: self.bounds.north - (y as C + 0.5) * px_h,
        }
    }

    /// Iterates `(x, y, value)` for every pixel, row-major.
    pub fn iter_pixels(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let width = self.width;
        self.samples
            .iter()
            .enumerate()
            .map(move |(idx, &v)| (idx % width, idx / width, v))
    }

    /// Count of non-`NaN` pixels.
    pub fn non_null_count(&self) -> usize {
        self.samples.iter().filter(|v| !v.is_nan()).count()
    }

    /// `(min, max, mean)` over finite pixels, or `None` if every pixel
    /// is `NaN`.
    pub fn stats(&self) -> Option<(f32, f32, f32)> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for &v in &self.samples {
            if v.is_nan() {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
            sum += f64::from(v);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        Some((min, max, (sum / count as f64) as f32))
    }
}
