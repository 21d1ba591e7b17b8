//! agentmux daemon binary.
//!
//! `start` runs the daemon in the foreground (use a service manager to
//! daemonize); `stop`, `status`, and `windows` talk to a running daemon
//! over the control socket.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use client::ControlClient;
use daemon::config::Config;
use daemon::orchestrator::Daemon;
use daemon::{paths, pidfile};
use protocol::ControlResponse;

/// Terminal runtime multiplexer for agent sessions.
#[derive(Parser, Debug)]
#[command(name = "agentmux-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Run the daemon in the foreground
    Start,
    /// Ask the running daemon to shut down
    Stop,
    /// Show status of the running daemon
    Status,
    /// List windows
    Windows {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    if cli.verbose {
        config.daemon.log_level = "debug".to_string();
    }
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Start => start(config).await,
        Commands::Stop => stop().await,
        Commands::Status => status().await,
        Commands::Windows { json } => windows(json).await,
    }
}

/// Keep the appender guard alive for the daemon's lifetime.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.clone()));

    if config.daemon.log_to_file {
        let appender =
            tracing_appender::rolling::daily(paths::data_dir().join("logs"), "daemon.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

async fn start(config: Config) -> Result<()> {
    if pidfile::is_daemon_running() {
        let pid = pidfile::daemon_pid().unwrap_or(0);
        bail!("daemon already running (pid {pid}); run `agentmux-daemon stop` first");
    }

    let _guard = init_tracing(&config);
    Daemon::new(config).run().await
}

async fn control_client() -> Result<ControlClient> {
    ControlClient::connect(&paths::control_socket_path())
        .await
        .context("cannot reach the control socket; is the daemon running?")
}

async fn stop() -> Result<()> {
    let mut client = control_client().await?;
    match client.shutdown().await? {
        ControlResponse::ShuttingDown => {
            println!("daemon shutting down");
            Ok(())
        }
        other => bail!("unexpected reply: {other:?}"),
    }
}

async fn status() -> Result<()> {
    let mut client = match control_client().await {
        Ok(client) => client,
        Err(_) => {
            println!("daemon: not running");
            return Ok(());
        }
    };
    match client.status().await? {
        ControlResponse::Status {
            uptime_secs,
            window_count,
            stream_clients,
        } => {
            println!("daemon: running");
            println!("uptime: {uptime_secs}s");
            println!("windows: {window_count}");
            println!("stream clients: {stream_clients}");
            Ok(())
        }
        other => bail!("unexpected reply: {other:?}"),
    }
}

async fn windows(json: bool) -> Result<()> {
    let mut client = control_client().await?;
    match client.list_windows().await? {
        ControlResponse::Windows { windows } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&windows)?);
            } else if windows.is_empty() {
                println!("no windows");
            } else {
                for entry in windows {
                    let status = format!("{:?}", entry.status).to_lowercase();
                    let exit = match (entry.exit_code, &entry.message) {
                        (Some(code), _) => format!(" exit={code}"),
                        (None, Some(message)) => format!(" error={message}"),
                        _ => String::new(),
                    };
                    println!(
                        "{}\t{}\t{}x{}{}",
                        entry.id, status, entry.cols, entry.rows, exit
                    );
                }
            }
            Ok(())
        }
        other => bail!("unexpected reply: {other:?}"),
    }
}
