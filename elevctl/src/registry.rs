use camino::Utf8Path;
use terra_pipeline::{RegionConfig, RegionRegistry};

/// Loads a region registry from a JSON file holding an array of
/// [`RegionConfig`] records.
pub fn load_region_registry(path: &Utf8Path) -> anyhow::Result<RegionRegistry> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading region registry at {path}: {e}"))?;
    let regions: Vec<RegionConfig> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing region registry at {path}: {e}"))?;
    Ok(RegionRegistry::new(regions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_registry_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8Path::from_path(dir.path())
            .unwrap()
            .join("regions.json");
        std::fs::write(
            &path,
            r#"[{
                "region_id": "tennessee",
                "display_name": "Tennessee",
                "bounds": {"west": -90.3, "south": 34.98, "east": -81.6, "north": 36.68},
                "region_type": "usa_state",
                "parent_region_id": null,
                "contained_region_ids": null
            }]"#,
        )
        .unwrap();

        let registry = load_region_registry(&path).unwrap();
        assert!(registry.get("tennessee").is_some());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = camino::Utf8Path::new("/nonexistent/regions.json");
        assert!(load_region_registry(path).is_err());
    }
}
