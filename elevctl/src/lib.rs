//! Library half of the `elevctl` CLI: local-fixture implementations of
//! the [`terra_pipeline::Downloader`] and [`terra_pipeline::BoundaryCatalog`]
//! traits, and region registry loading.
//!
//! Real tile and boundary-shapefile acquisition are external
//! collaborators (spec non-goal); these adapters read pre-staged files
//! from a local directory rather than speaking HTTP, so the binary
//! builds without pulling in a networking stack the teacher's
//! dependency set doesn't carry.

pub mod local_boundary;
pub mod local_downloader;
pub mod registry;

pub use local_boundary::LocalBoundaryCatalog;
pub use local_downloader::LocalDownloader;
pub use registry::load_region_registry;
