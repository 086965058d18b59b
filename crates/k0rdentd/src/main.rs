mod commands;
mod utils;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use k0rdentd_airgap::daemon::{DEFAULT_REGISTRY_HOST, DEFAULT_REGISTRY_PORT, DEFAULT_STORAGE_DIR};
use k0rdentd_airgap::exporter::DEFAULT_EXPORT_DIR;
use k0rdentd_airgap::{DEFAULT_COSIGN_KEY, DEFAULT_PUSH_CONCURRENCY};
use k0rdentd_config::{DEFAULT_CONFIG_PATH, InstallationConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "k0rdentd")]
#[command(about = "Install k0s and k0rdent on a single node, online or air-gapped", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to /etc/k0rdentd/k0rdentd.yaml when present)
    #[arg(short = 'c', long, global = true, env = "K0RDENTD_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print what would be done without changing anything
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install k0s and k0rdent
    Install {
        /// k0s version to install
        #[arg(long)]
        k0s_version: Option<String>,
        /// k0rdent version to install
        #[arg(long)]
        k0rdent_version: Option<String>,
    },
    /// Stop and reset k0s, then remove generated configuration
    Uninstall,
    /// Serve an airgap bundle's images from a local registry
    Registry(RegistryArgs),
    /// Show version and build information
    Version {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the build flavor (online or airgap)
    ShowFlavor,
    /// Configuration file management
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Write the artifacts a worker node needs to join an air-gapped cluster
    ExportWorkerArtifacts {
        /// Output directory
        #[arg(short, long, default_value = DEFAULT_EXPORT_DIR)]
        output: PathBuf,
        /// Airgap bundle the workers should reference (defaults to airgap.bundlePath)
        #[arg(long)]
        bundle_path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RegistryArgs {
    /// Airgap bundle (.tar.gz or extracted directory)
    #[arg(long, env = "K0RDENTD_REGISTRY_BUNDLE_PATH")]
    bundle_path: PathBuf,
    /// Address to listen on
    #[arg(long, env = "K0RDENTD_REGISTRY_HOST", default_value = DEFAULT_REGISTRY_HOST)]
    host: String,
    /// Port to listen on
    #[arg(long, env = "K0RDENTD_REGISTRY_PORT", default_value_t = DEFAULT_REGISTRY_PORT)]
    port: u16,
    /// Registry storage directory
    #[arg(long, env = "K0RDENTD_REGISTRY_STORAGE", default_value = DEFAULT_STORAGE_DIR)]
    storage: PathBuf,
    /// Verify the bundle signature with cosign before serving it
    #[arg(
        long,
        env = "K0RDENTD_REGISTRY_VERIFY",
        default_value_t = true,
        action = ArgAction::Set
    )]
    verify: bool,
    /// Cosign public key, local path or URL
    #[arg(long, env = "K0RDENTD_REGISTRY_COSIGN_KEY", default_value = DEFAULT_COSIGN_KEY)]
    cosign_key: String,
    /// Images pushed in parallel
    #[arg(
        long,
        env = "K0RDENTD_REGISTRY_PUSH_CONCURRENCY",
        default_value_t = DEFAULT_PUSH_CONCURRENCY
    )]
    push_concurrency: usize,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Check the configuration for errors
    Validate,
    /// Print the effective configuration
    Show,
    /// Write a configuration file with the built-in defaults
    Init {
        /// Where to write the file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,
    },
}

impl Commands {
    /// Commands that read the installation configuration
    fn needs_config(&self) -> bool {
        matches!(
            self,
            Commands::Install { .. }
                | Commands::Config(ConfigCommands::Validate | ConfigCommands::Show)
                | Commands::ExportWorkerArtifacts { .. }
        )
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<InstallationConfig> {
    InstallationConfig::load_with_fallback(explicit, Path::new(DEFAULT_CONFIG_PATH))
        .context("failed to load configuration")
}

/// `--debug` wins, then `RUST_LOG`, then the configured level
fn init_logging(debug: bool, level: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.command.needs_config() {
        Some(load_config(cli.config_file.as_deref())?)
    } else {
        None
    };

    let level = config.as_ref().map_or("info", |c| c.log_level.as_str());
    init_logging(cli.debug || config.as_ref().is_some_and(|c| c.debug), level);

    match cli.command {
        Commands::Install {
            k0s_version,
            k0rdent_version,
        } => {
            let overrides = k0rdentd_config::Overrides {
                k0s_version,
                k0rdent_version,
                debug: cli.debug,
            };
            commands::install::handle(config.unwrap_or_default(), overrides, cli.dry_run).await
        }
        Commands::Uninstall => commands::uninstall::handle(cli.dry_run).await,
        Commands::Registry(args) => commands::registry::handle(args, cli.dry_run).await,
        Commands::Version { json } => commands::version::handle(json),
        Commands::ShowFlavor => {
            commands::version::show_flavor();
            Ok(())
        }
        Commands::Config(ConfigCommands::Validate) => {
            commands::config::validate(&config.unwrap_or_default())
        }
        Commands::Config(ConfigCommands::Show) => commands::config::show(&config.unwrap_or_default()),
        Commands::Config(ConfigCommands::Init { output }) => {
            commands::config::init(&output, cli.dry_run)
        }
        Commands::ExportWorkerArtifacts {
            output,
            bundle_path,
        } => commands::export::handle(
            &config.unwrap_or_default(),
            &output,
            bundle_path,
            cli.dry_run,
        ),
    }
}
