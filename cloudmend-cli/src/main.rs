//! cloudmend: statistical outlier removal followed by moving least squares
//! smoothing and upsampling of PCD/PLY point clouds.
//!
//! # Logging
//!
//! `-v` enables stage summaries, `-vv` per-stage details. `RUST_LOG`
//! overrides both, e.g. `RUST_LOG=cloudmend_reconstruction=debug`.
//!
//! # Example
//!
//! ```bash
//! cloudmend scan.pcd --mean-k 30 --search-radius 0.05 \
//!     --upsampling sample-local-plane -o smoothed.ply
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use cloudmend_algorithms::{OutlierFilterConfig, WorkerPoolConfig};
use cloudmend_io::FileFormat;
use cloudmend_reconstruction::{
    MlsConfig, PipelineConfig, ReconstructionPipeline, UpsamplingConfig, UpsamplingMethod,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Remove outliers from a point cloud and resample it onto a smooth surface.
#[derive(Parser, Debug)]
#[command(name = "cloudmend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input point cloud (.pcd or .ply)
    #[arg(value_parser = supported_path)]
    input: PathBuf,

    /// Output file; defaults to `<input>_reconstructed` with the input extension
    #[arg(short, long, value_parser = supported_path)]
    output: Option<PathBuf>,

    /// Number of neighbors used to score each point
    #[arg(long, default_value_t = 50)]
    mean_k: usize,

    /// Points scoring above mean + this many standard deviations are outliers
    #[arg(long, default_value_t = 1.0)]
    std_dev_mul_thresh: f64,

    /// Skip outlier removal
    #[arg(long)]
    no_filter: bool,

    /// Neighborhood radius of the surface fit
    #[arg(long, default_value_t = 0.03)]
    search_radius: f64,

    /// Upsampling method; repeat to combine methods
    #[arg(long, value_enum)]
    upsampling: Vec<UpsamplingArg>,

    /// Radius of the disc sampled around each point (sample-local-plane)
    #[arg(long, default_value_t = 0.10)]
    upsampling_radius: f64,

    /// Grid step of local plane sampling (sample-local-plane)
    #[arg(long, default_value_t = 0.03)]
    upsampling_step: f64,

    /// Target points per search radius (random-uniform-density)
    #[arg(long)]
    point_density: Option<usize>,

    /// Worker threads (defaults to one per logical CPU)
    #[arg(long)]
    threads: Option<usize>,

    /// Suppress all non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum UpsamplingArg {
    /// Project points only
    None,
    /// Regular grid on the local surface around each point
    SampleLocalPlane,
    /// Random surface samples where density is below target
    RandomUniformDensity,
}

impl From<UpsamplingArg> for UpsamplingMethod {
    fn from(arg: UpsamplingArg) -> Self {
        match arg {
            UpsamplingArg::None => UpsamplingMethod::None,
            UpsamplingArg::SampleLocalPlane => UpsamplingMethod::SampleLocalPlane,
            UpsamplingArg::RandomUniformDensity => UpsamplingMethod::RandomUniformDensity,
        }
    }
}

fn supported_path(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    FileFormat::from_path(&path)
        .map(|_| path)
        .map_err(|_| format!("'{}' is not a .pcd or .ply file", value))
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let methods: Vec<UpsamplingMethod> =
            self.upsampling.iter().copied().map(Into::into).collect();
        let mut upsampling = UpsamplingConfig::default()
            .with_methods(&methods)
            .with_radius(self.upsampling_radius)
            .with_step(self.upsampling_step);
        if let Some(density) = self.point_density {
            upsampling = upsampling.with_point_density(density);
        }

        let mut workers = WorkerPoolConfig::default();
        if let Some(threads) = self.threads {
            workers = workers.with_threads(threads);
        }

        PipelineConfig::default()
            .with_filter(OutlierFilterConfig::new(self.mean_k, self.std_dev_mul_thresh))
            .with_mls(MlsConfig::new(self.search_radius).with_upsampling(upsampling))
            .with_workers(workers)
            .with_skip_filter(self.no_filter)
    }

    fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.input))
    }
}

/// `scan.pcd` becomes `scan_reconstructed.pcd`
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}_reconstructed.{}", stem, extension))
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.pipeline_config();
    let pipeline = ReconstructionPipeline::new(config).context("invalid parameters")?;

    let cloud = cloudmend_io::read_point_cloud(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    info!(points = cloud.len(), "input loaded");

    let output = pipeline.run(&cloud)?;

    let output_path = cli.output_path();
    cloudmend_io::write_point_cloud(&output.reconstructed, &output_path)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    if !cli.quiet {
        println!(
            "{} -> {} points after filtering -> {} points written to {} ({:.2}s)",
            cloud.len(),
            output.filtered.len(),
            output.reconstructed.len(),
            output_path.display(),
            output.processing_time
        );
        if let Some(stats) = &output.outlier_statistics {
            println!(
                "outlier scores: mean {:.6}, std dev {:.6}, threshold {:.6} (k = {})",
                stats.mean, stats.std_dev, stats.threshold, stats.effective_k
            );
        }
        println!("{}", output.report);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            eprintln!("{}", Cli::command().render_usage());
            ExitCode::FAILURE
        }
    }
}
