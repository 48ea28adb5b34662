use camino::{Utf8Path, Utf8PathBuf};
use dem_core::{Bounds, Dataset, TileId};
use terra_pipeline::downloader::{Downloader, FetchError};

/// A [`Downloader`] backed by a directory of pre-staged tile rasters,
/// used in place of a real HTTP tile provider (out of scope; spec
/// non-goal). Tiles are expected at
/// `{source_dir}/{dataset}/{tile_filename}.bin`, in the same minimal
/// raster format [`terra_pipeline::write_raster`] produces.
pub struct LocalDownloader {
    source_dir: Utf8PathBuf,
}

impl LocalDownloader {
    /// Builds a downloader that reads pre-staged tiles from `source_dir`.
    pub fn new(source_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    fn staged_path(&self, dataset: Dataset, tile: TileId) -> Utf8PathBuf {
        let name = tile.filename(dataset).replace(".tif", ".bin");
        self.source_dir.join(dataset.file_tag()).join(name)
    }
}

impl Downloader for LocalDownloader {
    fn fetch(
        &self,
        dataset: Dataset,
        bounds: Bounds,
        destination_path: &Utf8Path,
    ) -> Result<(), FetchError> {
        let tile = TileId::containing(bounds.south, bounds.west);
        let staged = self.staged_path(dataset, tile);

        let raster = terra_pipeline::read_raster(&staged.clone()).map_err(|e| FetchError {
            retryable: false,
            cause: format!("no staged tile at {staged}: {e}"),
        })?;

        terra_pipeline::write_raster(&destination_path.to_owned(), &raster).map_err(|e| {
            FetchError {
                retryable: false,
                cause: e.to_string(),
            }
        })
    }
}
