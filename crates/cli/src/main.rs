//! Edge Placer CLI
//!
//! Operator tool for the placement controller: inspect the daemon's view
//! of the cluster, apply the initial spread, tear down all workloads and
//! probe the external scaler endpoint.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{scaler, spread, status, teardown};
use placer_lib::Settings;
use tracing_subscriber::EnvFilter;

/// Edge Placer CLI
#[derive(Parser)]
#[command(name = "placerctl")]
#[command(author, version, about = "CLI for the Edge Placer placement controller", long_about = None)]
pub struct Cli {
    /// Daemon API URL (can also be set via PLACER_API_URL env var)
    #[arg(long, env = "PLACER_API_URL")]
    pub api_url: Option<String>,

    /// Controller settings file for commands that act on the cluster directly
    #[arg(long, env = "EDGE_PLACER_CONFIG")]
    pub settings: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest utilization snapshot and live placement
    Status,

    /// Spread every workload group evenly over the sampled nodes
    Spread {
        /// Print the plan without patching any affinity
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete the jobs and pods of every workload group
    Teardown {
        /// Confirm the teardown
        #[arg(long)]
        yes: bool,
    },

    /// External scaler commands
    #[command(subcommand)]
    Scaler(ScalerCommands),
}

#[derive(Subcommand)]
pub enum ScalerCommands {
    /// Call IsActive, GetMetricSpec and GetMetrics against the daemon
    Probe {
        /// Scaler gRPC endpoint
        #[arg(long, env = "PLACER_SCALER_ENDPOINT")]
        endpoint: Option<String>,

        /// ScaledJob name sent with the requests
        #[arg(long, default_value = "probe")]
        name: String,

        /// Namespace sent with the requests
        #[arg(long, short, default_value = "default")]
        namespace: String,
    },
}

fn load_settings(path: Option<String>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(Some(&path)),
        None => Settings::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    let config = config::Config::load()?;
    let kubeconfig = cli.kubeconfig.as_deref();

    match cli.command {
        Commands::Status => {
            let client = client::ApiClient::new(&config.api_url(cli.api_url))?;
            status::show_status(&client, cli.format).await
        }
        Commands::Spread { dry_run } => {
            let settings = load_settings(config.settings_path(cli.settings))?;
            spread::run_spread(&settings, kubeconfig, dry_run, cli.format).await
        }
        Commands::Teardown { yes } => {
            let settings = load_settings(config.settings_path(cli.settings))?;
            teardown::run_teardown(&settings, kubeconfig, yes, cli.format).await
        }
        Commands::Scaler(ScalerCommands::Probe {
            endpoint,
            name,
            namespace,
        }) => {
            let endpoint = config.scaler_endpoint(endpoint);
            scaler::probe(&endpoint, &name, &namespace, cli.format).await
        }
    }
}
