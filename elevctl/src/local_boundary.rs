use camino::Utf8PathBuf;
use geo::{Coord, LineString, Polygon};
use serde::Deserialize;
use terra_pipeline::boundary_catalog::{BoundaryCatalog, CatalogFetchError, ResolutionTier};

/// A [`BoundaryCatalog`] backed by pre-staged `{tier}.json` archive
/// files, used in place of a real shapefile-acquisition service (out
/// of scope; spec non-goal).
pub struct LocalBoundaryCatalog {
    archive_dir: Utf8PathBuf,
}

impl LocalBoundaryCatalog {
    /// Builds a catalog that reads tier archives from `archive_dir`.
    pub fn new(archive_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }
}

#[derive(Deserialize)]
struct ArchiveEntry {
    country: String,
    subdivision: Option<String>,
    /// The exterior ring, followed by zero or more interior (hole) rings.
    rings: Vec<Vec<(f64, f64)>>,
}

impl BoundaryCatalog for LocalBoundaryCatalog {
    fn fetch_archive(&self, tier: ResolutionTier) -> Result<Vec<u8>, CatalogFetchError> {
        let path = self.archive_dir.join(format!("{}.json", tier.tag()));
        std::fs::read(&path).map_err(|e| CatalogFetchError {
            cause: format!("no staged boundary archive at {path}: {e}"),
        })
    }

    fn parse_archive(
        &self,
        archive: &[u8],
    ) -> Result<Vec<(String, Option<String>, Polygon<f64>)>, CatalogFetchError> {
        let entries: Vec<ArchiveEntry> =
            serde_json::from_slice(archive).map_err(|e| CatalogFetchError {
                cause: format!("malformed boundary archive: {e}"),
            })?;

        entries
            .into_iter()
            .map(|entry| {
                let mut rings = entry.rings.into_iter();
                let exterior: LineString<f64> = rings
                    .next()
                    .ok_or_else(|| CatalogFetchError {
                        cause: format!(
                            "boundary entry for {:?}/{:?} has no exterior ring",
                            entry.country, entry.subdivision
                        ),
                    })?
                    .into_iter()
                    .map(|(x, y)| Coord { x, y })
                    .collect();
                let interiors: Vec<LineString<f64>> = rings
                    .map(|ring| ring.into_iter().map(|(x, y)| Coord { x, y }).collect())
                    .collect();
                Ok((entry.country, entry.subdivision, Polygon::new(exterior, interiors)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetches_and_parses_a_staged_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive_dir = camino::Utf8Path::from_path(dir.path()).unwrap().to_owned();
        std::fs::write(
            archive_dir.join("medium_50m.json"),
            r#"[{"country": "France", "subdivision": null, "rings": [[[-5.0, 41.0], [9.0, 41.0], [9.0, 51.0], [-5.0, 51.0], [-5.0, 41.0]]]}]"#,
        )
        .unwrap();

        let catalog = LocalBoundaryCatalog::new(archive_dir);
        let archive = catalog.fetch_archive(ResolutionTier::Medium50m).unwrap();
        let parsed = catalog.parse_archive(&archive).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "France");
        assert!(parsed[0].1.is_none());
    }

    #[test]
    fn missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = LocalBoundaryCatalog::new(camino::Utf8Path::from_path(dir.path()).unwrap().to_owned());
        assert!(catalog.fetch_archive(ResolutionTier::Coarse110m).is_err());
    }
}
