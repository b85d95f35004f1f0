use clap::{Parser, Subcommand};
use quire::config::{self, ConfigError};
use quire::engine::{EngineError, ExitCode};
use quire::output;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Pipeline-driven static content generator")]
#[command(long_about = "\
Pipeline-driven static content generator

Documents flow through the pipelines defined in quire.toml. Each pipeline is
an ordered list of modules; pipelines run in order and later ones can read
the output of earlier ones.

  quire.toml
  input/                   # Read by read-files modules
  ├── index.md
  └── blog/
      └── first-post.md
  output/                  # Written by write-files modules

Set QUIRE_LOG (e.g. QUIRE_LOG=quire=trace) to control log output.

Run 'quire gen-config' to generate a documented quire.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log module execution details
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every pipeline
    Build(BuildArgs),
    /// Validate the configuration without running anything
    Check,
    /// Print a stock quire.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Disable the execution cache
    #[arg(long)]
    no_cache: bool,

    /// Keep existing files in the output directory
    #[arg(long)]
    no_clean: bool,

    /// Write a JSON run summary to this file
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Could not write summary: {0}")]
    Summary(#[from] std::io::Error),
    #[error("Could not serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::ConfigurationError,
            CliError::Engine(e) => e.exit_code(),
            CliError::Summary(_) | CliError::Json(_) => ExitCode::UnhandledError,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli) {
        Ok(()) => ExitCode::Normal,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code.code());
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Build(args) => build(&cli.config, args),
        Command::Check => {
            let config = config::load_config(&cli.config)?;
            let root = config_dir(&cli.config).join(&config.root);
            println!("==> Checking {}", cli.config.display());
            config.build_engine(config_dir(&cli.config))?;
            output::print_config_check(&config, &root);
            println!("==> Configuration is valid");
            Ok(())
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
    }
}

fn build(config_path: &Path, args: BuildArgs) -> Result<(), CliError> {
    let config = config::load_config(config_path)?;
    init_thread_pool(&config.processing);

    let mut engine = config.build_engine(config_dir(config_path))?;
    if args.no_cache {
        engine.set_cache_enabled(false);
    }
    if args.no_clean {
        engine.set_clean_output_on_execute(false);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    engine.set_event_sender(tx);
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_run_event(&event) {
                println!("{}", line);
            }
        }
    });

    let result = engine.execute();
    // Dropping the engine closes the channel and ends the printer.
    drop(engine);
    if printer.join().is_err() {
        warn!("progress printer panicked");
    }

    let summary = result?;
    output::print_summary(&summary);
    if let Some(path) = args.summary {
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    }
    Ok(())
}

/// Directory the config's `root` is relative to.
fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// `QUIRE_LOG` wins; otherwise info, or debug with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "quire=debug" } else { "quire=info" };
    let filter = EnvFilter::try_from_env("QUIRE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
