//! console-warden operator CLI: gate probe and config-blob tooling

use clap::{Parser, Subcommand};
use console_warden::config::GateConfig;
use console_warden::gate::{Gate, GateState};
use console_warden::obscure::{self, ObscuredConfig};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// console-warden - entitlement gate tooling for the services console
#[derive(Parser, Debug)]
#[command(name = "console-warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one gate check against the configured licensing endpoint and
    /// exit 0 (allowed) or 1 (blocked). A deployment probe.
    Check,

    /// Author an obscured config blob from plaintext values.
    EncodeConfig {
        /// Licensing endpoint URL
        #[arg(long)]
        url: String,

        /// Client identifier
        #[arg(long)]
        client_id: String,
    },

    /// Decode an obscured config blob and print its contents.
    DecodeConfig {
        /// The blob, as deployed
        blob: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "console_warden=trace"
    } else {
        "console_warden=debug"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Check => {
            let config = if let Some(ref path) = cli.config {
                match GateConfig::from_file(path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("could not load config from {path}: {e}");
                        return ExitCode::from(2);
                    }
                }
            } else {
                GateConfig::load()
            };

            info!("checking gate");
            info!("  endpoint: {}", redact_empty(&config.endpoint_url));
            info!("  client id: {}", redact_empty(&config.client_id));
            info!("  bypass: {}", config.bypass_active);

            let gate = Gate::new(config);
            match gate.check().await {
                GateState::Ok => {
                    info!("gate: allowed");
                    ExitCode::SUCCESS
                }
                GateState::Fail { message } if message.is_empty() => {
                    warn!("gate: blocked");
                    ExitCode::FAILURE
                }
                GateState::Fail { message } => {
                    warn!("gate: blocked ({message})");
                    ExitCode::FAILURE
                }
                // check() never resolves to Checking.
                GateState::Checking => ExitCode::FAILURE,
            }
        }
        Command::EncodeConfig { url, client_id } => {
            let blob = obscure::encode(&ObscuredConfig { url, client_id });
            println!("{blob}");
            ExitCode::SUCCESS
        }
        Command::DecodeConfig { blob } => match obscure::decode(&blob) {
            Some(config) => {
                println!("url:       {}", config.url);
                println!("client id: {}", config.client_id);
                ExitCode::SUCCESS
            }
            None => {
                warn!("blob did not decode");
                ExitCode::FAILURE
            }
        },
    }
}

fn redact_empty(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}
