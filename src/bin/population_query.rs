use clap::{ArgAction, Parser, ValueEnum};
use popgrid::{BuildParams, Config, FileSource, OverlapPolicy, PopulationService, RegionPolicy};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    CellCenter,
    AnyOverlap,
    Exact,
}

impl From<PolicyArg> for OverlapPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::CellCenter => OverlapPolicy::CellCenter,
            PolicyArg::AnyOverlap => OverlapPolicy::AnyOverlap,
            PolicyArg::Exact => OverlapPolicy::Exact,
        }
    }
}

/// Population inside a longitude/latitude rectangle.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, allow_negative_numbers = true)]
struct Args {
    /// West edge (longitude)
    west: f64,
    /// North edge (latitude)
    north: f64,
    /// East edge (longitude)
    east: f64,
    /// South edge (latitude)
    south: f64,

    /// Census centroid file
    #[arg(short, long, default_value = "CenPop2010.txt")]
    data: PathBuf,

    #[arg(long, default_value_t = 100)]
    columns: usize,

    #[arg(long, default_value_t = 100)]
    rows: usize,

    /// Build tag; a new tag forces a fresh index
    #[arg(long, default_value_t = 1)]
    version_tag: u32,

    #[arg(long)]
    shards: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    /// How cells on the edge of the rectangle are counted
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Index the extent of the data instead of the continental US
    #[arg(long)]
    extent: bool,

    /// JSON or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also print the share of the total population
    #[arg(long)]
    share: bool,

    /// Verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(args: Args) -> popgrid::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(shards) = args.shards {
        config = config.with_shards(shards);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(policy) = args.policy {
        config = config.with_overlap_policy(policy.into());
    }
    if args.extent {
        config = config.with_region(RegionPolicy::DataExtent);
    }

    let service = PopulationService::builder().config(config).build()?;
    let source = FileSource::new(&args.data);
    let params = BuildParams::new(args.columns, args.rows, args.version_tag);

    let result = service.single_interaction(
        &source, params, args.west, args.south, args.east, args.north,
    )?;
    println!("Population: {}", result.population);
    if args.share {
        println!("Percent: {:.2}", result.percent);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
