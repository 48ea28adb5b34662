#![deny(missing_docs)]
#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]

pub use crate::{
    dataset::Dataset,
    error::DemCoreError,
    raster::{Bounds, Raster, CRS_TAG},
    tile_id::{parse_filename, tiles_for_bounds, TileId},
};
pub use geo;

mod dataset;
mod error;
mod raster;
mod tile_id;

/// Base floating point type used for all coordinates and calculations.
///
/// Note: this _could_ be a generic parameter, but doing so makes the
/// library more complicated, and benchmarking the teacher library this
/// is descended from showed no measurable benefit from narrowing to
/// `f32` for coordinate math.
pub type C = f64;

/// Elevation sample type. `NaN` is the sentinel for "no data."
pub type Elev = f32;
