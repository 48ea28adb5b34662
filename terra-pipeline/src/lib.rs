//! Clips, downsamples, and exports per-region DEM elevation artifacts.
//!
//! Every stage is a free function that takes an explicit
//! [`config::PipelineContext`] rather than reaching for global state;
//! [`controller::ensure_region`] sequences them for a single region and
//! [`controller::regenerate_manifest`] rebuilds the catalog of every
//! region's current export.

pub mod boundary;
pub mod boundary_catalog;
pub mod clip;
pub mod config;
pub mod controller;
pub mod downloader;
pub mod error;
pub mod export;
pub mod manifest;
pub mod orchestrator;
pub mod process;
pub mod resolution;
pub mod tile_cache;
pub mod version;

pub use boundary::BoundaryService;
pub use boundary_catalog::{BoundaryCatalog, CatalogFetchError, ResolutionTier};
pub use config::{
    CancellationToken, PipelineContext, RateLimit, RegionConfig, RegionRegistry, RegionType,
    RetryPolicy,
};
pub use controller::{ensure_region, regenerate_manifest, EnsureRegionOutcome, DEFAULT_TARGET_PIXELS};
pub use downloader::{Downloader, FetchError};
pub use error::{PipelineError, PipelineResult};
pub use manifest::{Manifest, ManifestEntry, ManifestStats};
pub use orchestrator::{read_raster, write_raster};
pub use resolution::{plan_resolution, ResolutionPlan};
pub use version::{md5_file, is_fresh, ArtifactVersion, Metadata};
