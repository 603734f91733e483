#![deny(unsafe_code)]

//! radiolink: operator command line for the radiosocketd control link.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use radiolink_config::AppConfig;
use radiolink_core::bridge::{self, BridgeState};
use radiolink_core::report::ReportEntry;
use radiolink_core::supervisor::devices::{DeviceSelector, IwDeviceSelector, StaticDeviceSelector};
use radiolink_core::telemetry::{Poller, ShutdownSignal};
use radiolink_core::{Dispatcher, Supervisor};

/// radiolink: supervise radiosocketd and drive it over its control socket.
#[derive(Parser)]
#[command(name = "radiolink", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "radiolink.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure and start the daemon, poll telemetry until Ctrl-C.
    Run {
        /// Print every report as it arrives.
        #[arg(long)]
        print: bool,

        /// Serve the HTTP bridge even if `[bridge] enabled` is false.
        #[arg(long)]
        bridge: bool,
    },

    /// Request one report from a running daemon.
    Report {
        #[arg(long)]
        socket: PathBuf,

        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebind a port to another channel.
    Switch {
        #[arg(long)]
        socket: PathBuf,

        #[arg(long)]
        port: i32,

        /// Channel id, decimal or `0x` hex.
        #[arg(long, value_parser = parse_channel)]
        channel: i32,
    },

    /// Set a port's FEC factor.
    UpdatePort {
        #[arg(long)]
        socket: PathBuf,

        #[arg(long)]
        port: i32,

        #[arg(long)]
        fec_factor: f64,
    },

    /// Ask a running daemon to exit.
    Exit {
        #[arg(long)]
        socket: PathBuf,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config.logging.level))),
        )
        .init();
    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Run { print, bridge } => cmd_run(config, print, bridge).await?,
        Commands::Report { socket, json } => cmd_report(&config, socket, json).await?,
        Commands::Switch {
            socket,
            port,
            channel,
        } => cmd_switch(&config, socket, port, channel).await?,
        Commands::UpdatePort {
            socket,
            port,
            fec_factor,
        } => cmd_update_port(&config, socket, port, fec_factor).await?,
        Commands::Exit { socket } => cmd_exit(&config, socket).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_run(config: AppConfig, print: bool, bridge: bool) -> Result<()> {
    let bridge_addr = resolve_bridge_addr(&config, bridge)?;
    let supervisor = Supervisor::new(config.clone());
    let selector: Box<dyn DeviceSelector> = match config.device.phys {
        Some(phys) => Box::new(StaticDeviceSelector::new(phys, config.device.ifname.clone())),
        None => Box::new(IwDeviceSelector::new(
            supervisor.prompt(),
            supervisor.process_table(),
        )),
    };

    let configured = supervisor.configure(&*selector).await?;
    let (running, dispatcher) = configured.start().await?;
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    // The daemon is up: every outcome from here on goes through `stop`.
    let served = serve_until_interrupted(&config, Arc::clone(&dispatcher), print, bridge_addr).await;
    if let Err(e) = &served {
        warn!(error = %e, "Stopping daemon after failure");
    }

    let mut dispatcher = dispatcher.lock().await;
    let stopped = running.stop(&mut dispatcher).await?;
    match stopped.exit_status() {
        Some(status) => info!(%status, "Daemon stopped"),
        None => warn!("Daemon may still be running"),
    }
    served
}

/// Poll telemetry, optionally print it and serve the bridge, until Ctrl-C.
async fn serve_until_interrupted(
    config: &AppConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    print: bool,
    bridge_addr: Option<SocketAddr>,
) -> Result<()> {
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    let poller = Poller::from_config(Arc::clone(&dispatcher), config);
    let history = poller.history();
    let printer = print.then(|| {
        let mut latest = poller.subscribe();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    changed = latest.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        print_entries(&latest.borrow_and_update());
                    }
                }
            }
        })
    });
    let poll_task = tokio::spawn(poller.run(shutdown_tx.subscribe()));

    let bridge_task = bridge_addr.map(|addr| {
        let state = Arc::new(BridgeState {
            dispatcher,
            history,
            static_dir: config.bridge.static_dir.clone(),
        });
        tokio::spawn(bridge::serve(addr, state, shutdown_tx.subscribe()))
    });

    let interrupted = tokio::signal::ctrl_c().await;
    warn!("Initiating graceful shutdown");
    let _ = shutdown_tx.send(ShutdownSignal);

    poll_task.await?;
    if let Some(task) = printer {
        task.await?;
    }
    if let Some(task) = bridge_task {
        if let Err(e) = task.await? {
            warn!(error = %e, "HTTP bridge stopped with an error");
        }
    }
    interrupted.context("waiting for Ctrl-C")
}

/// Bridge listen address, if the bridge is enabled in config or by flag.
fn resolve_bridge_addr(config: &AppConfig, forced: bool) -> Result<Option<SocketAddr>> {
    if forced || config.bridge.enabled {
        Ok(Some(config.bridge.socket_addr()?))
    } else {
        Ok(None)
    }
}

async fn cmd_report(config: &AppConfig, socket: PathBuf, json: bool) -> Result<()> {
    let entries = Dispatcher::from_config(socket, config).report().await;
    if entries.is_empty() {
        bail!("no report received");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_entries(&entries);
    }
    Ok(())
}

async fn cmd_switch(config: &AppConfig, socket: PathBuf, port: i32, channel: i32) -> Result<()> {
    let status = Dispatcher::from_config(socket, config)
        .switch_channel(port, channel)
        .await;
    report_status("switch", status)
}

async fn cmd_update_port(config: &AppConfig, socket: PathBuf, port: i32, fec_factor: f64) -> Result<()> {
    let status = Dispatcher::from_config(socket, config)
        .update_port(port, fec_factor)
        .await;
    report_status("update-port", status)
}

async fn cmd_exit(config: &AppConfig, socket: PathBuf) -> Result<()> {
    if Dispatcher::from_config(socket, config).close().await {
        println!("Daemon acknowledged exit.");
        Ok(())
    } else {
        bail!("daemon did not acknowledge exit")
    }
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn report_status(command: &str, status: i32) -> Result<()> {
    if status == 0 {
        println!("{command}: ok");
        Ok(())
    } else {
        bail!("{command} failed with status {status}")
    }
}

fn print_entries(entries: &[ReportEntry]) {
    for entry in entries {
        println!("{entry}");
    }
    println!();
}

/// Load the config file, or defaults if it does not exist. The flag tells
/// whether the file was found.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

/// `-v`/`-vv` override the configured level.
fn log_filter(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Channel ids are usually written in hex (`0x1007`).
fn parse_channel(s: &str) -> Result<i32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => s.parse::<i32>(),
    };
    parsed.map_err(|e| format!("invalid channel {s:?}: {e}"))
}
