use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use elevctl::{load_region_registry, LocalBoundaryCatalog, LocalDownloader};
use std::process::ExitCode;
use std::sync::Arc;
use terra_pipeline::{
    controller, BoundaryService, PipelineContext, PipelineError, RegionType,
    DEFAULT_TARGET_PIXELS,
};

/// Builds and maintains per-region DEM elevation exports.
#[derive(Clone, Parser)]
struct Cli {
    /// Root directory for `data/` and `exports/`.
    #[clap(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    /// JSON file listing every known region.
    #[clap(long, global = true, default_value = "regions.json")]
    regions_file: Utf8PathBuf,

    /// Directory of pre-staged tile rasters, keyed by dataset and tile id.
    #[clap(long, global = true, default_value = "data/tile_source")]
    tile_source_dir: Utf8PathBuf,

    /// Directory of pre-staged boundary archive files, one per resolution tier.
    #[clap(long, global = true, default_value = "data/boundary_source")]
    boundary_source_dir: Utf8PathBuf,

    #[command(subcommand)]
    command: SubCmd,
}

#[derive(Clone, Subcommand)]
enum SubCmd {
    /// Run every stage for a region, skipping stages whose output is
    /// already fresh.
    EnsureRegion(EnsureRegionArgs),
    /// Rebuild `exports/regions/manifest.json` from current exports.
    RegenerateManifest,
    /// List known regions, optionally filtered by type.
    ListRegions(ListRegionsArgs),
}

#[derive(Clone, Args)]
struct EnsureRegionArgs {
    /// Region id to process, as listed in the region registry.
    region_id: String,

    /// Output size, in pixels, along the longer side of the export.
    #[clap(long, default_value_t = DEFAULT_TARGET_PIXELS)]
    target_pixels: u32,

    /// Re-run every stage even if its output already looks fresh.
    #[clap(long)]
    force_reprocess: bool,
}

#[derive(Clone, Args)]
struct ListRegionsArgs {
    /// Restrict the listing to one region type.
    #[clap(long)]
    r#type: Option<RegionTypeArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RegionTypeArg {
    Country,
    UsaState,
    Area,
}

impl From<RegionTypeArg> for RegionType {
    fn from(value: RegionTypeArg) -> Self {
        match value {
            RegionTypeArg::Country => RegionType::Country,
            RegionTypeArg::UsaState => RegionType::UsaState,
            RegionTypeArg::Area => RegionType::Area,
        }
    }
}

fn ensure_region(cli: &Cli, args: EnsureRegionArgs) -> Result<(), PipelineError> {
    let registry = load_region_registry(&cli.regions_file)
        .map_err(|e| to_unknown_region(&args.region_id, e))?;
    let ctx = PipelineContext::new(cli.root.clone(), registry);
    let downloader = LocalDownloader::new(cli.tile_source_dir.clone());
    let boundary = BoundaryService::new(
        &ctx,
        Arc::new(LocalBoundaryCatalog::new(cli.boundary_source_dir.clone())),
    );

    let outcome = controller::ensure_region(
        &ctx,
        &args.region_id,
        args.target_pixels,
        args.force_reprocess,
        &downloader,
        &boundary,
    )?;
    log::info!(
        "region {:?} exported to {} ({})",
        args.region_id,
        outcome.export_path,
        outcome.dataset.file_tag()
    );
    Ok(())
}

fn regenerate_manifest(cli: &Cli) -> anyhow::Result<()> {
    let registry = load_region_registry(&cli.regions_file)?;
    let ctx = PipelineContext::new(cli.root.clone(), registry);
    let manifest = controller::regenerate_manifest(&ctx)?;
    log::info!(
        "wrote manifest for {} region(s)",
        manifest.regions.len()
    );
    Ok(())
}

fn list_regions(cli: &Cli, args: ListRegionsArgs) -> anyhow::Result<()> {
    let registry = load_region_registry(&cli.regions_file)?;
    let filter = args.r#type.map(RegionType::from);
    for region in registry.list(filter) {
        println!("{}\t{}\t{:?}", region.region_id, region.display_name, region.region_type);
    }
    Ok(())
}

/// A registry load failure surfaced while handling `ensure-region` is
/// reported as an unknown-region error — there is no region to look up
/// without a registry.
fn to_unknown_region(region_id: &str, source: anyhow::Error) -> PipelineError {
    log::error!("{source:#}");
    PipelineError::UnknownRegion {
        region_id: region_id.to_string(),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command.clone() {
        SubCmd::EnsureRegion(args) => match ensure_region(&cli, args) {
            Ok(()) => ExitCode::from(0),
            Err(e) => {
                log::error!("{e}");
                ExitCode::from(3)
            }
        },
        SubCmd::RegenerateManifest => match regenerate_manifest(&cli) {
            Ok(()) => ExitCode::from(0),
            Err(e) => {
                log::error!("{e:#}");
                ExitCode::from(4)
            }
        },
        SubCmd::ListRegions(args) => match list_regions(&cli, args) {
            Ok(()) => ExitCode::from(0),
            Err(e) => {
                log::error!("{e:#}");
                ExitCode::from(2)
            }
        },
    }
}
