//! # FuelNet Node
//!
//! One binary for every tier of the fuel network.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        fuelnet-node                                     │
//! │                                                                         │
//! │  fuelnet.toml ─┐                                                        │
//! │  FUELNET_* env ┼──► NodeConfig ──► role                                 │
//! │  --role / -c  ─┘                    │                                   │
//! │                    ┌────────────────┼────────────────┐                  │
//! │                    ▼                ▼                ▼                  │
//! │              enterprise          station            pump                │
//! │            EnterpriseServer   StationServer      PumpClient             │
//! │                               + StationUplink                           │
//! │                                                                         │
//! │  stdin console ──► admin surface of the running role                    │
//! │  Ctrl+C / SIGTERM ──► graceful shutdown                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fuelnet_core::PumpId;
use fuelnet_link::{
    EnterpriseHub, EnterpriseServer, InMemoryRecordStore, NodeConfig, NodeRole, PumpClient,
    PumpClientConfig, StationHub, StationServer, StationServerConfig, StationUplink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::console::{parse_line, ConsoleCommand, HELP};

#[derive(Parser, Debug)]
#[command(name = "fuelnet-node")]
#[command(about = "FuelNet node - enterprise, station or pump")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role override (enterprise, station, pump)
    #[arg(short, long)]
    role: Option<NodeRole>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the effective configuration to the config file and exit
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let mut config = NodeConfig::load(args.config.clone()).context("Failed to load configuration")?;
    if let Some(role) = args.role {
        config.node.role = role;
        config.validate().context("Invalid configuration for role")?;
    }

    if let Some(Command::InitConfig) = args.command {
        config.save(args.config).context("Failed to save configuration")?;
        return Ok(());
    }

    info!(role = %config.role(), "Starting FuelNet node");

    match config.role() {
        NodeRole::Enterprise => run_enterprise(config).await?,
        NodeRole::Station => run_station(config).await?,
        NodeRole::Pump => run_pump(config).await?,
    }

    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Roles
// =============================================================================

async fn run_enterprise(config: NodeConfig) -> Result<()> {
    let directory = Arc::new(InMemoryRecordStore::with_stations(
        config.enterprise.known_stations.clone(),
    ));
    let hub = Arc::new(EnterpriseHub::new(
        config.enterprise.prices.clone(),
        directory,
        config.timings(),
    ));
    let server = EnterpriseServer::start(&config.enterprise.bind_address(), hub.clone()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(ConsoleCommand::Prices(update))) => {
                        let (merged, report) = hub.push_prices(&update).await;
                        println!("prices {} | delivered {} failed {}", json(&merged), report.delivered, report.failed);
                    }
                    Ok(Some(ConsoleCommand::Status)) => {
                        println!("prices {}", json(&hub.current_prices().await));
                        println!("stations {}", json(&hub.summaries().await));
                    }
                    Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
                    Ok(Some(other)) => println!("not available on enterprise: {:?}", other),
                    Ok(None) => {}
                    Err(e) => println!("error: {:#}", e),
                },
                _ => stdin_open = false,
            },
            _ = &mut shutdown => break,
        }
    }

    server.shutdown().await?;
    Ok(())
}

async fn run_station(config: NodeConfig) -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::with_pumps(
        config.station.known_pumps.iter().copied(),
    ));
    let timings = config.timings();
    let hub = Arc::new(StationHub::new(config.station.prices.clone(), store, timings));
    let station = StationServer::start(
        StationServerConfig {
            tcp_bind: config.station.tcp_bind_address(),
            udp_bind: config.station.udp_bind_address(),
        },
        hub.clone(),
    )
    .await?;

    let uplink = config.uplink.enabled.then(|| {
        StationUplink::spawn(
            config.uplink.enterprise_addr.clone(),
            config.station.id.clone(),
            hub.clone(),
            timings,
        )
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(ConsoleCommand::Prices(prices))) => {
                        let report = hub.trigger_price_broadcast(prices).await;
                        println!("delivered {} failed {}", report.delivered, report.failed);
                    }
                    Ok(Some(ConsoleCommand::Command { pump_id, verb, reason })) => {
                        let sent = hub.dispatch_command(pump_id, verb, &reason).await;
                        println!("{} {} → {}", verb, pump_id, if sent { "sent" } else { "failed" });
                    }
                    Ok(Some(ConsoleCommand::Status)) => print_station_status(&hub).await,
                    Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
                    Ok(Some(other)) => println!("not available on station: {:?}", other),
                    Ok(None) => {}
                    Err(e) => println!("error: {:#}", e),
                },
                _ => stdin_open = false,
            },
            _ = &mut shutdown => break,
        }
    }

    if let Some(uplink) = uplink {
        uplink.shutdown().await;
    }
    station.shutdown().await?;
    Ok(())
}

async fn print_station_status(hub: &StationHub) {
    println!("prices {}", json(&hub.current_prices().await));
    for summary in hub.registry_snapshot().await {
        let telemetry = hub.latest_telemetry(summary.id).await;
        println!("pump {} telemetry {}", json(&summary), json(&telemetry));
    }
}

async fn run_pump(config: NodeConfig) -> Result<()> {
    let pump_id: PumpId = config.pump.id;
    let pump = PumpClient::start(PumpClientConfig::from_settings(&config.pump, config.timings())).await?;
    info!(pump_id = %pump_id, station = %config.pump.station_tcp_address(), "Pump running");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let outcome = match parse_line(&line) {
                        Ok(Some(ConsoleCommand::Start)) => pump.start_dispensing().await.map(|_| "dispensing".to_string()),
                        Ok(Some(ConsoleCommand::Stop(payment))) => pump
                            .stop_dispensing(payment)
                            .await
                            .map(|tx| format!("transaction {}", json(&tx))),
                        Ok(Some(ConsoleCommand::Grade(grade))) => pump.select_grade(grade).await.map(|_| "grade selected".to_string()),
                        Ok(Some(ConsoleCommand::Status)) => pump.snapshot().await.map(|s| json(&s)),
                        Ok(Some(ConsoleCommand::Help)) => Ok(HELP.to_string()),
                        Ok(Some(other)) => Ok(format!("not available on pump: {:?}", other)),
                        Ok(None) => continue,
                        Err(e) => Ok(format!("error: {:#}", e)),
                    };
                    match outcome {
                        Ok(text) => println!("{}", text),
                        Err(e) => warn!(%e, "Pump control refused"),
                    }
                }
                _ => stdin_open = false,
            },
            _ = &mut shutdown => break,
        }
    }

    pump.shutdown().await;
    Ok(())
}

fn json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<{}>", e))
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(%e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
