use crate::{
    boundary_catalog::{BoundaryCatalog, ResolutionTier},
    config::PipelineContext,
    error::{PipelineError, PipelineResult},
};
use dashmap::DashMap;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use geo::Polygon;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{Read, Write},
    sync::Arc,
};

/// Resolves `(country, subdivision)` to boundary polygons, caching a
/// parsed catalog per resolution tier for the lifetime of the process
/// (spec §4.3, §9: "single lazy initialization per resolution tier").
pub struct BoundaryService {
    catalog: Arc<dyn BoundaryCatalog>,
    cache_dir: camino::Utf8PathBuf,
    /// Lazily-built, process-local, read-only-after-load per tier.
    loaded: DashMap<ResolutionTier, Arc<PolygonCatalog>>,
}

/// A loaded, queryable collection of named boundary polygons.
struct PolygonCatalog {
    by_name: BTreeMap<(String, Option<String>), Polygon<f64>>,
}

impl PolygonCatalog {
    fn lookup(&self, country: &str, subdivision: Option<&str>) -> Option<&Polygon<f64>> {
        self.by_name
            .get(&(country.to_string(), subdivision.map(str::to_string)))
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedEntry {
    country: String,
    subdivision: Option<String>,
    polygon_wkt_like: Vec<Vec<(f64, f64)>>,
}

impl BoundaryService {
    /// Builds a service backed by `catalog`, persisting parsed
    /// catalogs under `ctx.boundary_cache_dir()`.
    pub fn new(ctx: &PipelineContext, catalog: Arc<dyn BoundaryCatalog>) -> Self {
        Self {
            catalog,
            cache_dir: ctx.boundary_cache_dir(),
            loaded: DashMap::new(),
        }
    }

    /// Resolves a country's polygon.
    pub fn country_polygon(&self, country: &str, tier: ResolutionTier) -> PipelineResult<Polygon<f64>> {
        self.polygon_for(country, None, tier)
    }

    /// Resolves a U.S. state (or any country subdivision)'s polygon.
    pub fn state_polygon(
        &self,
        country: &str,
        state: &str,
        tier: ResolutionTier,
    ) -> PipelineResult<Polygon<f64>> {
        self.polygon_for(country, Some(state), tier)
    }

    fn polygon_for(
        &self,
        country: &str,
        subdivision: Option<&str>,
        tier: ResolutionTier,
    ) -> PipelineResult<Polygon<f64>> {
        let catalog = self.catalog_for_tier(tier)?;
        catalog
            .lookup(country, subdivision)
            .cloned()
            .ok_or_else(|| PipelineError::BoundaryNotFound {
                country: country.to_string(),
                subdivision: subdivision.map(str::to_string),
            })
    }

    fn catalog_for_tier(&self, tier: ResolutionTier) -> PipelineResult<Arc<PolygonCatalog>> {
        if let Some(existing) = self.loaded.get(&tier) {
            return Ok(existing.clone());
        }

        let loaded = self.load_or_fetch_tier(tier)?;
        let loaded = Arc::new(loaded);
        self.loaded.insert(tier, loaded.clone());
        Ok(loaded)
    }

    fn load_or_fetch_tier(&self, tier: ResolutionTier) -> PipelineResult<PolygonCatalog> {
        match self.catalog.fetch_archive(tier) {
            Ok(archive) => {
                let hash = hex_md5(&archive);
                if let Some(cached) = self.read_cache(tier, &hash) {
                    log::debug!("boundary catalog cache hit for tier {:?}", tier);
                    return Ok(cached);
                }
                let entries = self
                    .catalog
                    .parse_archive(&archive)
                    .map_err(|e| PipelineError::BoundaryCatalogUnavailable {
                        tier: tier.tag().to_string(),
                        cause: e.to_string(),
                    })?;
                let parsed = PolygonCatalog {
                    by_name: entries
                        .into_iter()
                        .map(|(c, s, p)| ((c, s), p))
                        .collect(),
                };
                self.write_cache(tier, &hash, &parsed);
                Ok(parsed)
            }
            Err(fetch_err) => {
                if let Some(cached) = self.read_any_cache(tier) {
                    log::warn!(
                        "boundary catalog fetch failed for tier {:?}, using stale cache: {}",
                        tier,
                        fetch_err
                    );
                    return Ok(cached);
                }
                Err(PipelineError::BoundaryCatalogUnavailable {
                    tier: tier.tag().to_string(),
                    cause: fetch_err.to_string(),
                })
            }
        }
    }

    fn cache_path(&self, tier: ResolutionTier, hash: &str) -> camino::Utf8PathBuf {
        self.cache_dir
            .join(format!("{}_{}.json.gz", tier.tag(), hash))
    }

    fn read_cache(&self, tier: ResolutionTier, hash: &str) -> Option<PolygonCatalog> {
        let path = self.cache_path(tier, hash);
        let bytes = std::fs::read(&path).ok()?;
        decode_catalog(&bytes)
    }

    /// Falls back to *any* cached file for this tier, regardless of
    /// hash, when the upstream fetch itself failed.
    fn read_any_cache(&self, tier: ResolutionTier) -> Option<PolygonCatalog> {
        let entries = std::fs::read_dir(&self.cache_dir).ok()?;
        let prefix = format!("{}_", tier.tag());
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) {
                if let Ok(bytes) = std::fs::read(entry.path()) {
                    if let Some(catalog) = decode_catalog(&bytes) {
                        return Some(catalog);
                    }
                }
            }
        }
        None
    }

    fn write_cache(&self, tier: ResolutionTier, hash: &str, catalog: &PolygonCatalog) {
        let _ = std::fs::create_dir_all(&self.cache_dir);
        let path = self.cache_path(tier, hash);
        let Some(bytes) = encode_catalog(catalog) else {
            log::warn!("failed to serialize boundary catalog for tier {:?}", tier);
            return;
        };
        if let Err(e) = std::fs::write(&path, bytes) {
            log::warn!("failed to persist boundary catalog cache at {path}: {e}");
        }
    }
}

fn hex_md5(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn encode_catalog(catalog: &PolygonCatalog) -> Option<Vec<u8>> {
    use geo::Coord;
    let entries: Vec<SerializedEntry> = catalog
        .by_name
        .iter()
        .map(|((country, subdivision), polygon)| {
            let mut rings: Vec<Vec<(f64, f64)>> = vec![polygon
                .exterior()
                .coords()
                .map(|Coord { x, y }| (*x, *y))
                .collect()];
            for interior in polygon.interiors() {
                rings.push(interior.coords().map(|Coord { x, y }| (*x, *y)).collect());
            }
            SerializedEntry {
                country: country.clone(),
                subdivision: subdivision.clone(),
                polygon_wkt_like: rings,
            }
        })
        .collect();
    let json = serde_json::to_vec(&entries).ok()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).ok()?;
    encoder.finish().ok()
}

fn decode_catalog(gz_bytes: &[u8]) -> Option<PolygonCatalog> {
    let mut decoder = GzDecoder::new(gz_bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).ok()?;
    let entries: Vec<SerializedEntry> = serde_json::from_slice(&json).ok()?;
    let by_name = entries
        .into_iter()
        .map(|e| {
            let mut rings = e.polygon_wkt_like.into_iter();
            let exterior: geo::LineString<f64> = rings.next().unwrap_or_default().into();
            let interiors: Vec<geo::LineString<f64>> = rings.map(Into::into).collect();
            (
                (e.country, e.subdivision),
                Polygon::new(exterior, interiors),
            )
        })
        .collect();
    Some(PolygonCatalog { by_name })
}
