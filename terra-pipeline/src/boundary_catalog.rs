use geo::Polygon;
use std::fmt;

/// Cartographic resolution tier for boundary polygons (spec §4.3).
///
/// Decorative suffixes on the cartographic data; unrelated to DEM
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionTier {
    /// 1:110m scale.
    Coarse110m,
    /// 1:50m scale.
    Medium50m,
    /// 1:10m scale.
    Fine10m,
}

impl ResolutionTier {
    /// Stable tag used in on-disk cache filenames.
    pub fn tag(self) -> &'static str {
        match self {
            ResolutionTier::Coarse110m => "coarse_110m",
            ResolutionTier::Medium50m => "medium_50m",
            ResolutionTier::Fine10m => "fine_10m",
        }
    }
}

/// Failure fetching the upstream shapefile archive for a tier, with
/// no usable on-disk cache to fall back to.
#[derive(Debug, Clone)]
pub struct CatalogFetchError {
    /// Human-readable cause.
    pub cause: String,
}

impl fmt::Display for CatalogFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for CatalogFetchError {}

/// External cartographic catalog (spec §6), out of scope beyond this
/// interface: "give me the polygon for (country, subdivision)".
pub trait BoundaryCatalog: Send + Sync {
    /// Fetches the raw shapefile-archive bytes for `tier`, to be
    /// parsed into a polygon collection by [`crate::boundary::BoundaryService`].
    fn fetch_archive(&self, tier: ResolutionTier) -> Result<Vec<u8>, CatalogFetchError>;

    /// Parses `archive` into `(country, subdivision, polygon)` triples.
    ///
    /// `subdivision` is `None` for country-level polygons.
    fn parse_archive(
        &self,
        archive: &[u8],
    ) -> Result<Vec<(String, Option<String>, Polygon<f64>)>, CatalogFetchError>;
}
