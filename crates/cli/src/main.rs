//! Hydroshed CLI - watershed delineation from digital elevation models

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hydroshed_core::io::{read_grid, write_grid, RasterFormat};
use hydroshed_core::Raster;
use hydroshed_flow::direction::{convert_grid, DirScheme};
use hydroshed_flow::dinf::compress_dinf;
use hydroshed_flow::native::{
    fill_sinks, flow_accumulation, flow_direction, stream_threshold, FillSinksParams,
};
use hydroshed_pipeline::{
    delineate, AccumulationSource, DelineationConfig, DistanceMethod, NativeStageRunner,
    ProcessRunner, StageRunner,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hydroshed")]
#[command(author, version, about = "Watershed delineation from DEMs", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Run the full watershed delineation workflow
    Delineate {
        /// Input DEM file
        dem: PathBuf,
        /// Working directory for all artifacts
        #[arg(short, long)]
        workdir: PathBuf,
        /// Worker processes per external stage
        #[arg(long, default_value_t = 1)]
        np: usize,
        /// Predefined outlet point file (GeoJSON); defaults to the
        /// maximum-accumulation cell
        #[arg(long)]
        outlet: Option<PathBuf>,
        /// Explicit stream threshold; selected by drop analysis if omitted
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Accumulation grid driving stream definition
        #[arg(long, value_enum, default_value_t = AccSource::D8)]
        source: AccSource,
        /// Distance method for the distance-to-stream product
        #[arg(long, value_enum, default_value_t = DistMethod::Surface)]
        distance_method: DistMethod,
        /// Also compute the D-infinity distance-to-stream raster
        #[arg(long)]
        stream_distance: bool,
        /// Restrict accumulation to basins draining the outlets
        #[arg(long)]
        single_basin: bool,
        /// Snap radius (cells) for moving outlets onto streams
        #[arg(long, default_value_t = 50)]
        snap: usize,
        /// Run all stages in-process instead of invoking the external tools
        #[arg(long)]
        native: bool,
        /// Directory holding the external tool executables
        #[arg(long)]
        tool_dir: Option<PathBuf>,
    },
    /// Convert a D8 direction raster between integer encodings
    ConvertD8 {
        /// Input direction raster
        input: PathBuf,
        /// Output raster
        output: PathBuf,
        /// Source encoding
        #[arg(long, value_enum, default_value_t = Scheme::Taudem)]
        from: Scheme,
        /// Target encoding
        #[arg(long, value_enum, default_value_t = Scheme::Arcgis)]
        to: Scheme,
    },
    /// Quantize a D-infinity angle raster into code + weight rasters
    CompressDinf {
        /// Input angle raster
        input: PathBuf,
        /// Output direction-code raster
        codes: PathBuf,
        /// Output weight raster
        weights: PathBuf,
    },
    /// In-process hydrology stages
    Hydrology {
        #[command(subcommand)]
        algorithm: HydrologyCommands,
    },
}

#[derive(Subcommand)]
enum HydrologyCommands {
    /// Fill depressions in a DEM
    Fill {
        input: PathBuf,
        output: PathBuf,
        /// Minimum slope enforced between cells
        #[arg(long, default_value_t = 0.01)]
        min_slope: f64,
    },
    /// D8 flow direction from a filled DEM
    FlowDir {
        input: PathBuf,
        output: PathBuf,
    },
    /// Flow accumulation from D8 flow direction
    Acc {
        input: PathBuf,
        output: PathBuf,
    },
    /// Stream raster from flow accumulation
    Streams {
        input: PathBuf,
        output: PathBuf,
        /// Accumulation threshold
        #[arg(short, long)]
        threshold: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Taudem,
    Arcgis,
    Whitebox,
}

impl From<Scheme> for DirScheme {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Taudem => DirScheme::TauDem,
            Scheme::Arcgis => DirScheme::ArcGis,
            Scheme::Whitebox => DirScheme::Whitebox,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AccSource {
    D8,
    Dinf,
}

impl From<AccSource> for AccumulationSource {
    fn from(source: AccSource) -> Self {
        match source {
            AccSource::D8 => AccumulationSource::D8,
            AccSource::Dinf => AccumulationSource::Dinf,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DistMethod {
    Horizontal,
    Vertical,
    Pythagoras,
    Surface,
}

impl From<DistMethod> for DistanceMethod {
    fn from(method: DistMethod) -> Self {
        match method {
            DistMethod::Horizontal => DistanceMethod::Horizontal,
            DistMethod::Vertical => DistanceMethod::Vertical,
            DistMethod::Pythagoras => DistanceMethod::Pythagoras,
            DistMethod::Surface => DistanceMethod::Surface,
        }
    }
}

// ─── Entry point ────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Info { input } => info_command(&input),
        Commands::Delineate {
            dem,
            workdir,
            np,
            outlet,
            threshold,
            source,
            distance_method,
            stream_distance,
            single_basin,
            snap,
            native,
            tool_dir,
        } => {
            let mut config = DelineationConfig::new(dem, workdir);
            config.processes = np;
            config.outlet = outlet;
            config.threshold = threshold;
            config.accumulation_source = source.into();
            config.distance_method = distance_method.into();
            config.stream_distance = stream_distance;
            config.single_basin = single_basin;
            config.snap_distance = snap;

            delineate_command(config, native, tool_dir).await
        }
        Commands::ConvertD8 {
            input,
            output,
            from,
            to,
        } => convert_command(&input, &output, from.into(), to.into()),
        Commands::CompressDinf {
            input,
            codes,
            weights,
        } => compress_command(&input, &codes, &weights),
        Commands::Hydrology { algorithm } => hydrology_command(algorithm),
    }
}

// ─── Command implementations ────────────────────────────────────────────

fn info_command(input: &PathBuf) -> Result<()> {
    let raster: Raster<f64> = read_grid(input)
        .with_context(|| format!("cannot read {}", input.display()))?;

    let (rows, cols) = raster.shape();
    let gt = raster.transform();
    let stats = raster.statistics();

    println!("File:      {}", input.display());
    println!("Size:      {} rows x {} cols", rows, cols);
    println!("Origin:    ({}, {})", gt.origin_x, gt.origin_y);
    println!("Cell size: {} x {}", gt.cell_size_x(), gt.cell_size_y());
    println!("NoData:    {:?}", raster.nodata());
    println!(
        "Range:     {:?} .. {:?} (mean {:?}, std {:?})",
        stats.min, stats.max, stats.mean, stats.std_dev
    );
    println!("Valid:     {} cells ({} nodata)", stats.valid_count, stats.nodata_count);
    Ok(())
}

async fn delineate_command(
    config: DelineationConfig,
    native: bool,
    tool_dir: Option<PathBuf>,
) -> Result<()> {
    let runner: Box<dyn StageRunner> = if native {
        Box::new(NativeStageRunner::new())
    } else {
        let mut runner = ProcessRunner::new();
        if let Some(dir) = tool_dir {
            runner = runner.with_tool_dir(dir);
        }
        Box::new(runner)
    };

    // Ctrl-C cancels the run cooperatively; the active stage process is
    // terminated and artifacts stay on disk.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message("delineating watershed...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let start = Instant::now();
    let report = delineate(&config, runner.as_ref(), &cancel).await?;
    spinner.finish_and_clear();

    info!(elapsed = ?start.elapsed(), "delineation complete");
    println!("Threshold:        {}", report.threshold);
    println!("Stream segments:  {}", report.segment_count);
    println!("Dinf max error:   {:.2e} rad", report.dinf_quantization_error);
    println!("Stream network:   {}", report.artifacts.stream_net.display());
    println!("Subbasins:        {}", report.artifacts.subbasins.display());
    Ok(())
}

fn convert_command(
    input: &PathBuf,
    output: &PathBuf,
    from: DirScheme,
    to: DirScheme,
) -> Result<()> {
    let grid: Raster<i32> = read_grid(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let converted = convert_grid(&grid, from, to)?;
    let format = RasterFormat::from_path(output)?;
    write_grid(output, &converted, format)?;
    info!(input = %input.display(), output = %output.display(), "direction codes converted");
    Ok(())
}

fn compress_command(input: &PathBuf, codes: &PathBuf, weights: &PathBuf) -> Result<()> {
    let angles: Raster<f64> = read_grid(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let compressed = compress_dinf(&angles);
    write_grid(codes, compressed.codes(), RasterFormat::from_path(codes)?)?;
    write_grid(weights, compressed.weights(), RasterFormat::from_path(weights)?)?;
    println!(
        "Max quantization error: {:.2e} rad (bound {:.2e})",
        compressed.max_error(),
        hydroshed_flow::CompressedDinf::error_bound()
    );
    Ok(())
}

fn hydrology_command(algorithm: HydrologyCommands) -> Result<()> {
    match algorithm {
        HydrologyCommands::Fill {
            input,
            output,
            min_slope,
        } => {
            let dem: Raster<f64> = read_grid(&input)?;
            let filled = fill_sinks(&dem, FillSinksParams { min_slope })?;
            write_grid(&output, &filled, RasterFormat::from_path(&output)?)?;
        }
        HydrologyCommands::FlowDir { input, output } => {
            let dem: Raster<f64> = read_grid(&input)?;
            let fdir = flow_direction(&dem)?;
            write_grid(&output, &fdir, RasterFormat::from_path(&output)?)?;
        }
        HydrologyCommands::Acc { input, output } => {
            let fdir: Raster<i32> = read_grid(&input)?;
            let acc = flow_accumulation(&fdir)?;
            write_grid(&output, &acc, RasterFormat::from_path(&output)?)?;
        }
        HydrologyCommands::Streams {
            input,
            output,
            threshold,
        } => {
            let acc: Raster<f64> = read_grid(&input)?;
            let streams = stream_threshold(&acc, threshold)?;
            write_grid(&output, &streams, RasterFormat::from_path(&output)?)?;
        }
    }
    Ok(())
}
