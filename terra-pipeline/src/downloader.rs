use camino::Utf8Path;
use dem_core::{Bounds, Dataset};
use std::fmt;

/// Failure from a downloader's `fetch` call (spec §6).
#[derive(Debug, Clone)]
pub struct FetchError {
    /// Whether retrying this exact request might succeed.
    pub retryable: bool,
    /// Human-readable cause, surfaced in [`crate::PipelineError::TileDownloadFailed`].
    pub cause: String,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for FetchError {}

/// External byte-fetcher for a single dataset, keyed by bounding box
/// (spec §6, out of scope for this repo beyond this interface).
///
/// Implementations write a valid GeoTIFF-equivalent raster at
/// `EPSG:4326` covering exactly `bounds` to `destination_path`. The
/// tile orchestrator always calls this with `bounds` equal to a
/// tile's exact 1-degree cell — never a partial or larger box.
pub trait Downloader: Send + Sync {
    /// Fetches `dataset`'s coverage of `bounds` and writes it to
    /// `destination_path`.
    fn fetch(
        &self,
        dataset: Dataset,
        bounds: Bounds,
        destination_path: &Utf8Path,
    ) -> Result<(), FetchError>;
}
