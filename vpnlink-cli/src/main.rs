//! vpnlink CLI
//!
//! Runs one VPN session and rolls host changes back on exit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use link_dns::ResolvHandling;
use link_tun::RouteManager;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vpnlink_engine::{promise, Collaborators, Config, Coordinator, Resolver};

/// vpnlink - TLS/DTLS VPN client
#[derive(Parser)]
#[command(name = "vpnlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "vpnlink.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and keep the session up until interrupted
    Connect {
        /// Override the resolver file handling ("watch" or "writeOnce")
        #[arg(long)]
        resolv_conf_handler: Option<ResolvHandling>,

        /// Interface created by the external helper
        #[arg(long, default_value = "ppp0")]
        helper_interface: String,

        /// Seconds to wait for the helper's interface to come up
        #[arg(long, default_value_t = 30)]
        helper_timeout: u64,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "vpnlink.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Connect {
            resolv_conf_handler,
            helper_interface,
            helper_timeout,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(handler) = resolv_conf_handler {
                config.resolv_conf_handler = handler;
            }
            run_connect(config, helper_interface, Duration::from_secs(helper_timeout)).await
        }
        Commands::GenConfig { output } => {
            generate_config(output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_connect(config: Config, helper_interface: String, helper_timeout: Duration) -> Result<ExitCode> {
    info!("Connecting to {}...", config.server);

    let routes = RouteManager::new()
        .await
        .context("Failed to open the routing table")?;
    let external_helper = config.external_helper;
    let coordinator = Coordinator::new(config, Collaborators::system(Arc::new(routes)));
    let mut session_end = coordinator.shutdown_handle().subscribe();

    let (name_tx, name_rx) = promise::<String>("interface name");
    let (up_tx, up_rx) = promise::<bool>("link up");

    let dialed = tokio::select! {
        result = coordinator.dial() => Some(result),
        _ = wait_for_shutdown() => None,
    };

    match dialed {
        Some(Ok(Some(name))) => {
            let _ = name_tx.resolve(name);
        }
        Some(Ok(None)) => {
            tokio::spawn(watch_helper(helper_interface, name_tx, up_tx, helper_timeout));
        }
        Some(Err(e)) => {
            coordinator.restore_config().await;
            return Err(e).context("Failed to establish the VPN session");
        }
        None => {
            info!("Interrupted while connecting");
            coordinator.restore_config().await;
            return Ok(ExitCode::FAILURE);
        }
    }

    let forward = tokio::spawn({
        let coordinator = coordinator.clone();
        let up = external_helper.then_some(up_rx);
        async move { coordinator.wait_and_config(name_rx, up).await }
    });

    tokio::select! {
        _ = wait_for_shutdown() => info!("Shutting down client..."),
        _ = session_end.recv() => info!("Session terminated"),
    }

    coordinator.restore_config().await;
    forward.abort();

    match coordinator.take_terminal_error().await {
        Some(e) => {
            error!("VPN session failed ({}): {}", e.category(), e);
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

/// Report the helper's interface name, then whether it came up in time
async fn watch_helper(
    name: String,
    name_tx: Resolver<String>,
    up_tx: Resolver<bool>,
    timeout: Duration,
) {
    info!("Waiting for {} to come up", name);
    let _ = name_tx.resolve(name.clone());

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if interface_is_up(&name) {
            let _ = up_tx.resolve(true);
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("{} did not come up within {:?}", name, timeout);
            let _ = up_tx.resolve(false);
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(target_os = "linux")]
fn interface_is_up(name: &str) -> bool {
    link_tun::linux::is_interface_up(name)
}

#[cfg(not(target_os = "linux"))]
fn interface_is_up(_name: &str) -> bool {
    false
}

fn load_config(path: &PathBuf) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the server and [session] values before connecting.");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolv_handler_override_parses() {
        let cli = Cli::try_parse_from(["vpnlink", "connect", "--resolv-conf-handler", "writeOnce"]).unwrap();
        match cli.command {
            Commands::Connect {
                resolv_conf_handler, ..
            } => assert_eq!(resolv_conf_handler, Some(ResolvHandling::WriteOnce)),
            _ => panic!("expected connect"),
        }

        assert!(Cli::try_parse_from(["vpnlink", "connect", "--resolv-conf-handler", "bogus"]).is_err());
    }
}
