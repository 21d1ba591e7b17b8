//! Daemon orchestration.
//!
//! Wires the registry, both servers, and the sweeper to one cancellation
//! token, then waits for a signal or a `Shutdown` control request.
//! Shutdown order: stop accepting, give every window the grace period,
//! then tear down sockets and the pid file.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::control::ControlServer;
use crate::paths;
use crate::pidfile;
use crate::runtime::{build_runtime, WindowRegistry};
use crate::stream::StreamServer;

/// The assembled daemon.
pub struct Daemon {
    config: Config,
    registry: Arc<WindowRegistry>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let registry = build_runtime(config.runtime.backend, config.runtime_settings());
        Self {
            config,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<WindowRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until a signal arrives or a client requests shutdown.
    pub async fn run(self) -> Result<()> {
        pidfile::write_pid_file().context("failed to write pid file")?;

        let stream_path = paths::stream_socket_path();
        let control_path = paths::control_socket_path();

        let stream_server = StreamServer::bind(&stream_path)
            .with_context(|| format!("failed to bind {}", stream_path.display()))?;
        let control_server = ControlServer::bind(&control_path)
            .with_context(|| format!("failed to bind {}", control_path.display()))?;

        tracing::info!(
            stream = %stream_path.display(),
            control = %control_path.display(),
            "agentmux daemon listening"
        );

        self.registry.start_sweeper(self.cancel.clone());

        let stream_clients = Arc::new(AtomicUsize::new(0));
        let stream_task = tokio::spawn(stream_server.run(
            Arc::clone(&self.registry),
            self.config.stream_settings(),
            self.cancel.clone(),
            Arc::clone(&stream_clients),
        ));
        let control_task = tokio::spawn(control_server.run(
            Arc::clone(&self.registry),
            self.config.control_settings(),
            self.cancel.clone(),
            stream_clients,
        ));

        wait_for_shutdown(&self.cancel).await;
        self.cancel.cancel();
        tracing::info!("shutting down");

        self.registry.shutdown().await;
        let _ = stream_task.await;
        let _ = control_task.await;

        let _ = std::fs::remove_file(&stream_path);
        let _ = std::fs::remove_file(&control_path);
        pidfile::remove_pid_file();
        tracing::info!("shutdown complete");
        Ok(())
    }
}

async fn wait_for_shutdown(cancel: &CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
