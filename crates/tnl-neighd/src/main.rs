//! Tunnel Neighbor Cache Daemon
//!
//! `tnl-neighd run` owns the cache, drives the aging sweep and serves the
//! control socket. `tnl-neighd ctl <command>` talks to a running daemon.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - File and command line configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use sonic_tnl_neighd::control::{self, ControlServer};
use sonic_tnl_neighd::{TnlNeigh, TnlNeighConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tnl-neighd")]
#[command(about = "Tunnel neighbor resolution cache daemon")]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Control socket path (overrides the config file)
        #[arg(long)]
        control_socket: Option<PathBuf>,

        /// Idle lifetime of a binding in seconds (overrides the config file)
        #[arg(long)]
        idle_time: Option<u64>,

        /// Aging sweep period in milliseconds (overrides the config file)
        #[arg(long)]
        aging_interval_ms: Option<u64>,

        /// Hash bucket count (overrides the config file)
        #[arg(long)]
        buckets: Option<usize>,
    },
    /// Send a command to a running daemon
    Ctl {
        /// Control socket path
        #[arg(long, default_value = sonic_tnl_neighd::config::DEFAULT_CONTROL_SOCKET)]
        socket: PathBuf,

        /// Command and arguments, e.g. `tnl/neigh/set br0 10.0.0.5 02:00:00:00:00:01`
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Run {
            config,
            control_socket,
            idle_time,
            aging_interval_ms,
            buckets,
        } => {
            let mut cfg = match config {
                Some(path) => TnlNeighConfig::from_json_file(&path)?,
                None => TnlNeighConfig::default(),
            };
            if let Some(path) = control_socket {
                cfg.control_socket = path;
            }
            if let Some(secs) = idle_time {
                cfg.idle_time_secs = secs;
            }
            if let Some(ms) = aging_interval_ms {
                cfg.aging_interval_ms = ms;
            }
            if let Some(count) = buckets {
                cfg.buckets = count;
            }
            cfg.validate()?;

            if let Err(e) = run_daemon(cfg).await {
                error!(error = %e, "tnl-neighd: Daemon exiting with error");
                return Err(e);
            }
            Ok(())
        }
        Commands::Ctl { socket, command } => {
            let reply = control::request(&socket, &command.join(" "))
                .await
                .with_context(|| format!("failed to reach {}", socket.display()))?;
            if reply.success {
                println!("{}", reply.body.unwrap_or_default());
                Ok(())
            } else {
                anyhow::bail!(reply.error.unwrap_or_else(|| "request failed".to_string()))
            }
        }
    }
}

/// Initialize structured logging; RUST_LOG takes priority over `--log-level`.
///
/// # NIST Controls
/// - AU-3: Content of Audit Records - Structured format with thread, file and line
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

/// # NIST Controls
/// - AU-12: Audit Record Generation - Startup and shutdown logged
/// - SC-5: Denial of Service Protection - Aging keeps the table bounded
async fn run_daemon(config: TnlNeighConfig) -> anyhow::Result<()> {
    // NIST: AU-12 - Log daemon start
    info!("tnl-neighd: Starting tunnel neighbor cache daemon");

    let tnl = TnlNeigh::new(&config)?;
    let shutdown = setup_signal_handlers();

    let server = ControlServer::bind(&config.control_socket, tnl.admin().clone())
        .with_context(|| format!("binding {}", config.control_socket.display()))?;
    let server_task = tokio::spawn(server.serve());

    let sweeper = tnl.sweeper().clone();
    let aging_task = tokio::spawn(sweeper.run(config.aging_interval(), shutdown.clone()));

    aging_task.await?;
    server_task.abort();
    let _ = server_task.await;

    info!(
        entries = tnl.cache().len(),
        version = tnl.current_version(),
        "tnl-neighd: Graceful shutdown complete"
    );
    Ok(())
}

/// Setup signal handlers for graceful shutdown
///
/// NIST: AU-12 - Shutdown is logged before the loops stop
fn setup_signal_handlers() -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("tnl-neighd: Received SIGINT");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    shutdown_flag
}
