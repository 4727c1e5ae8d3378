//! CLI for enviropi: bridge an Enviro+ serial feed into InfluxDB and air-quality APIs.

mod commands;

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "enviropi")]
#[command(about = "enviropi: forward Enviro+ sensor readings from a serial link to InfluxDB, a telemetry API and Sensor.Community")]
#[command(version = enviropi_core::VERSION)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    overrides: commands::Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the serial link and forward every reading set (runs until Ctrl+C)
    Run,

    /// Parse a captured serial log and print each reading set as JSON
    Parse(ParseArgs),

    /// Resubmit readings stored in InfluxDB to the air-quality API
    Replay {
        /// Start of the window (exclusive), RFC 3339, e.g. 2022-06-11T00:00:00Z
        #[arg(long)]
        from: String,

        /// End of the window (exclusive), RFC 3339
        #[arg(long)]
        to: String,
    },

    /// Print the effective configuration with passwords redacted
    Config,
}

#[derive(Args)]
struct ParseArgs {
    /// Capture file to read (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Inject this value as the local temperature instead of leaving it out
    #[arg(long)]
    temperature: Option<f64>,

    /// Print reading sets re-framed as BEGIN / key=value / END blocks
    #[arg(long)]
    frames: bool,
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    // ureq's debug output dumps request preludes, headers included.
    builder.filter_module("ureq", LevelFilter::Info);

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Warning: cannot open log file {}: {e}", path.display()),
        }
    }
    let _ = builder.try_init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_ref());

    let config = commands::load_config(cli.config.as_deref(), &cli.overrides);

    match cli.command {
        Commands::Run => commands::run::run(config),
        Commands::Parse(args) => {
            commands::parse::run(args.input.as_deref(), args.temperature, args.frames);
        }
        Commands::Replay { from, to } => commands::replay::run(&config, &from, &to),
        Commands::Config => commands::config::run(&config),
    }
}
