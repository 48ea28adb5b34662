use camino::Utf8PathBuf;
use thiserror::Error;

/// The closed error taxonomy for every pipeline stage (spec §7).
///
/// Every variant carries enough context — region, stage, upstream
/// path, cause — that a human reading the error can fix the problem
/// without re-running with extra logging. No stage swallows an
/// upstream error or emits a successful output when its upstream
/// failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `region_id` is not present in the region registry.
    #[error("unknown region {region_id:?}")]
    UnknownRegion {
        /// The region id that was looked up.
        region_id: String,
    },

    /// A `(country, subdivision)` tuple has no match in the boundary
    /// catalog. No fuzzy fallback.
    #[error("boundary not found for country={country:?} subdivision={subdivision:?}")]
    BoundaryNotFound {
        /// Country name queried.
        country: String,
        /// Subdivision name queried, if any.
        subdivision: Option<String>,
    },

    /// The boundary catalog fetch failed and no on-disk cache exists.
    #[error("boundary catalog unavailable for tier {tier:?}: {cause}")]
    BoundaryCatalogUnavailable {
        /// Resolution tier that was being loaded.
        tier: String,
        /// Underlying cause.
        cause: String,
    },

    /// No dataset satisfies the Nyquist rule at the requested output
    /// size.
    #[error(
        "no dataset available at {visible_m_per_pixel:.1} m/px for region type {region_type:?}"
    )]
    ResolutionUnavailable {
        /// Computed visible meters-per-pixel at the requested output size.
        visible_m_per_pixel: f64,
        /// Region type that was being planned for.
        region_type: String,
    },

    /// A tile's bounds cross the antimeridian, which this pipeline
    /// does not support (spec §8).
    #[error("bounds cross the antimeridian: west={west} east={east}")]
    InvalidBounds {
        /// Western edge.
        west: f64,
        /// Eastern edge.
        east: f64,
    },

    /// Tile download retries were exhausted.
    #[error("download failed for tile {tile:?} after retries: {cause}")]
    TileDownloadFailed {
        /// The tile that could not be downloaded.
        tile: String,
        /// Underlying cause from the last attempt.
        cause: String,
    },

    /// An existing tile file failed its sidecar hash check.
    #[error("tile {tile:?} at {path} failed its hash check")]
    TileCorrupt {
        /// The tile whose file is corrupt.
        tile: String,
        /// Path to the corrupt tile file.
        path: Utf8PathBuf,
    },

    /// The clip stage's polygon and raster do not overlap.
    #[error("clipping region {region_id:?} produced an empty raster")]
    ClippingEmpty {
        /// Region being clipped.
        region_id: String,
    },

    /// The clip stage's polygon bounding box is not contained in the
    /// source raster's bounds.
    #[error("polygon for region {region_id:?} is not contained in the source raster's bounds")]
    ClippingMisaligned {
        /// Region being clipped.
        region_id: String,
    },

    /// Process-stage self-check: downsampled aspect ratio drifted from
    /// the source's. Indicates an implementation bug, not bad input.
    #[error(
        "aspect ratio drift for region {region_id:?}: source {source_ratio:.4} vs. \
         processed {processed_ratio:.4}"
    )]
    AspectRatioDrift {
        /// Region being processed.
        region_id: String,
        /// Source raster's width/height ratio.
        source_ratio: f64,
        /// Processed raster's width/height ratio.
        processed_ratio: f64,
    },

    /// A downstream artifact's recorded upstream hash no longer
    /// matches the current upstream file.
    #[error("stage {stage:?} output for region {region_id:?} is stale: upstream hash changed")]
    VersionMismatch {
        /// Region whose artifact is stale.
        region_id: String,
        /// Stage whose output is stale.
        stage: &'static str,
    },

    /// An exported file's `version` field is not `export_v2`. Never a
    /// fallback — the manifest builder skips and warns.
    #[error("export at {path} lacks version export_v2")]
    InvalidExport {
        /// Path to the offending export file.
        path: Utf8PathBuf,
    },

    /// Wraps an I/O failure with enough stage context to act on.
    #[error("I/O error during {stage} for region {region_id:?} at {path}: {source}")]
    Io {
        /// Region being processed when the I/O error occurred.
        region_id: String,
        /// Stage that was running.
        stage: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A bounds or coordinate failed `dem-core`'s validation.
    #[error(transparent)]
    DemCore(#[from] dem_core::DemCoreError),
}

/// Convenience alias used throughout this crate.
pub type PipelineResult<T> = Result<T, PipelineError>;
