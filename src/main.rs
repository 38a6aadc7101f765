use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use console::style;
use ollama_sync::{
    Config, FsPorts, IndicatifProgressReporter, Overrides, ProgressReporter, SyncError,
    TracingReporter, platform_link_installer, sync_models,
};
use tracing_subscriber::EnvFilter;

const DESCRIPTION: &str =
    "A tool to bridge Ollama models with other tools (like LM Studio) seamlessly.";

#[derive(Parser)]
#[command(name = "ollama-sync", version, about = DESCRIPTION)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory containing manifest files
    #[arg(long = "manifest_dir", value_name = "DIR")]
    manifest_dir: Option<PathBuf>,

    /// Directory containing blob files
    #[arg(long = "blob_dir", value_name = "DIR")]
    blob_dir: Option<PathBuf>,

    /// Comma-separated list of destinations
    #[arg(long, value_name = "LIST")]
    destinations: Option<String>,

    /// Show a progress spinner instead of log lines
    #[arg(long)]
    progress: bool,

    /// Log debug details
    #[arg(short, long)]
    verbose: bool,

    /// Skip the welcome banner
    #[arg(long)]
    no_banner: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.no_banner {
        print_banner();
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("running on {}", std::env::consts::OS);

    let ports = FsPorts::new();
    let installer = platform_link_installer();
    let progress: Box<dyn ProgressReporter> = if cli.progress {
        Box::new(IndicatifProgressReporter::new())
    } else {
        Box::new(TracingReporter::new())
    };

    match sync_models(&ports, &installer, progress.as_ref(), &config) {
        Ok(stats) => {
            println!(
                "manifests: {} resolved: {} failed: {} links: {} copies: {} destination_failures: {}",
                stats.manifests_found,
                stats.manifests_resolved,
                stats.manifests_failed,
                stats.links_created,
                stats.copies_created,
                stats.destination_failures
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "error while searching for manifest files");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, SyncError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let defaults = Config::platform_defaults()?;

    let mut config = Config::load_or_init(&path, &defaults)?;
    config.apply_overrides(Overrides {
        manifest_dir: cli.manifest_dir.clone(),
        blob_dir: cli.blob_dir.clone(),
        destinations: cli.destinations.clone(),
    });

    Ok(config)
}

fn print_banner() {
    eprintln!(
        "{} - Version {}",
        style("Ollama Sync").bold().cyan(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{DESCRIPTION}");
    eprintln!();
}
