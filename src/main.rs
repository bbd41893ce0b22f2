//! Main entry point for the Duet Room matchmaking service
//!
//! Initializes logging and configuration, starts the WebSocket gateway and
//! health endpoints, and shuts down gracefully on SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use duet_room::config::{AppConfig, NextPolicy};
use duet_room::service::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::signal;
use tracing::{error, info, warn};

/// Duet Room - matchmaking and signaling relay for one-to-one video chat
#[derive(Parser)]
#[command(
    name = "duet-room",
    version,
    about = "Pairs waiting users for one-to-one video chat and relays their WebRTC signaling",
    long_about = "Duet Room accepts WebSocket connections, pairs waiting users by mutual gender \
                 preference and subscription priority, and relays offers, answers and ICE \
                 candidates between the two members of each room."
)]
struct Args {
    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Probe a running instance and exit
    #[arg(long, help = "Query the liveness endpoint of a running instance and exit")]
    health_check: bool,

    /// Tracing filter, e.g. `info` or `duet_room=debug`
    #[arg(short, long, value_name = "FILTER")]
    log_level: Option<String>,

    /// WebSocket gateway port override
    #[arg(long, value_name = "PORT", help = "Override WebSocket gateway port")]
    http_port: Option<u16>,

    /// Health/metrics port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Candidate scan limit override
    #[arg(long, value_name = "N", help = "Override the number of candidates scanned per search")]
    scan_limit: Option<usize>,

    /// Who is requeued after a `next`
    #[arg(long, value_enum, help = "Override who is re-queued when a user asks for the next partner")]
    next_policy: Option<NextPolicy>,

    /// Shorthand for `--log-level debug`
    #[arg(short, long)]
    debug: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    /// Resolve configuration from file or environment, then layer flags on top
    fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::from_env()?,
        };

        if let Some(filter) = &self.log_level {
            config.service.log_level = filter.clone();
        }
        if self.debug {
            config.service.log_level = "debug".to_string();
        }
        if let Some(port) = self.http_port {
            config.service.http_port = port;
        }
        if let Some(port) = self.health_port {
            config.service.health_port = port;
        }
        if let Some(limit) = self.scan_limit {
            config.matchmaking.scan_limit = limit;
        }
        if let Some(policy) = self.next_policy {
            config.matchmaking.next_policy = policy;
        }

        duet_room::config::validate_config(&config)?;
        Ok(config)
    }
}

/// `RUST_LOG` wins over the configured filter when set
fn init_logging(default_filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Could not install tracing subscriber: {}", e))
}

/// Ask a running instance for `/alive` and report whether it answered 200
async fn perform_health_check(config: &AppConfig) -> Result<bool> {
    let addr = format!("127.0.0.1:{}", config.service.health_port);
    info!("Performing health check against {}...", addr);

    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream
        .write_all(b"GET /alive HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    let status_line = response.lines().next().unwrap_or_default();
    println!("Health Check: {}", status_line);

    Ok(status_line.split_whitespace().nth(1) == Some("200"))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!("{} received", signal_name);
}

fn log_startup_summary(config: &AppConfig) {
    info!(
        service = %config.service.name,
        version = duet_room::VERSION,
        gateway_port = config.service.http_port,
        health_port = config.service.health_port,
        "🚀 duet-room starting"
    );
    info!(
        scan_limit = config.matchmaking.scan_limit,
        next_policy = ?config.matchmaking.next_policy,
        requeue_partner_on_leave = config.matchmaking.requeue_partner_on_leave,
        log_filter = %config.service.log_level,
        "matchmaking settings"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if args.health_check {
        match perform_health_check(&config).await {
            Ok(true) => std::process::exit(0),
            Ok(false) => std::process::exit(1),
            Err(e) => {
                error!("Liveness probe failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    log_startup_summary(&config);
    if args.dry_run {
        info!("Configuration is valid; not starting (--dry-run)");
        return Ok(());
    }

    let app_state = match AppState::new(config.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Could not build service: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Could not start service: {}", e);
        std::process::exit(1);
    }
    info!("✅ duet-room is accepting connections");

    wait_for_shutdown_signal().await;
    info!("🛑 Draining connections");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Shutdown complete"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!(
            "⚠️  Shutdown exceeded {:?}, exiting anyway",
            config.shutdown_timeout()
        ),
    }
    Ok(())
}
