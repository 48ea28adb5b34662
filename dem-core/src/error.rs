use std::{error::Error as StdError, fmt};

/// Errors raised by tile-grid and raster arithmetic.
#[derive(Debug)]
#[allow(missing_docs, clippy::module_name_repetitions)]
pub enum DemCoreError {
    /// A latitude or longitude fell outside `[-90, 90]` / `[-180, 180]`,
    /// or was non-finite.
    InvalidCoordinate { value: f64, axis: &'static str },
    /// Bounds whose west edge is east of its east edge (antimeridian
    /// crossing), which this pipeline does not support (spec §8).
    InvalidBounds { west: f64, east: f64 },
}

impl fmt::Display for DemCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemCoreError::InvalidCoordinate { value, axis } => {
                write!(f, "invalid {axis} coordinate: {value}")
            }
            DemCoreError::InvalidBounds { west, east } => {
                write!(
                    f,
                    "invalid bounds: west ({west}) is east of east ({east}); \
                     antimeridian-crossing bounds are not supported"
                )
            }
        }
    }
}

impl StdError for DemCoreError {}
