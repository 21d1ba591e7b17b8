//! Window runtime: the single owner of all spawned processes.
//!
//! [`WindowRuntime`] is the narrow contract everything above the runtime
//! consumes; [`registry::WindowRegistry`] is the native PTY-backed
//! implementation. The backend is a tagged variant selected from config at
//! startup so an alternative implementation can satisfy the same contract
//! behind the same daemon surfaces.

mod registry;
mod ring;
mod window;

pub use registry::{RuntimeSettings, WindowRegistry};
pub use ring::ByteRing;
pub use window::{StartSpec, Window, WindowEvent, BROADCAST_CAPACITY};

use std::sync::Arc;

use protocol::{WindowEntry, WindowId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from window runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No live or recently-closed window with this id.
    #[error("window not found: {0}")]
    NotFound(WindowId),

    /// `start_window` on a window that is still running.
    #[error("window already running: {0}")]
    AlreadyRunning(WindowId),

    /// The window exists but its process has terminated.
    #[error("window already terminated: {0}")]
    AlreadyTerminated(WindowId),

    /// The process could not be spawned. The window enters the error
    /// state; there is no automatic retry.
    #[error("failed to spawn window: {0}")]
    SpawnFailed(String),

    /// Writing to the process stdin failed.
    #[error("failed to write to window: {0}")]
    WriteFailed(String),

    /// Resizing the PTY failed.
    #[error("failed to resize window: {0}")]
    ResizeFailed(String),

    /// Other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which runtime implementation backs the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackend {
    /// Built-in PTY runtime with the in-process screen engine.
    #[default]
    Native,
}

/// The uniform runtime contract. Callers never special-case how a window
/// actually runs.
#[allow(async_fn_in_trait)]
pub trait WindowRuntime: Send + Sync {
    /// Register (or look up) a session, returning its normalized id.
    fn ensure_session(&self, name: &str) -> String;

    /// Whether a live or recently-closed window exists under this id.
    fn window_exists(&self, session: &str, window: &str) -> bool;

    /// Spawn a window's process at the default or last-known size.
    async fn start_window(
        &self,
        session: &str,
        window: &str,
        spec: StartSpec,
    ) -> Result<WindowId, RuntimeError>;

    /// Graceful stop with force-kill fallback; idempotent.
    async fn stop_window(&self, id: &WindowId) -> Result<(), RuntimeError>;

    /// Forward raw bytes to the process input.
    async fn write_input(&self, id: &WindowId, bytes: &[u8]) -> Result<(), RuntimeError>;

    /// Propagate a new geometry to the PTY and the screen engine.
    async fn resize(&self, id: &WindowId, cols: u16, rows: u16) -> Result<(), RuntimeError>;

    /// Ids, statuses and activity for live and recently-closed windows.
    fn list_windows(&self) -> Vec<WindowEntry>;

    /// Raw-output slice for poll-based consumers: (data, start, next).
    fn buffer_since(&self, id: &WindowId, offset: u64) -> Result<(Vec<u8>, u64, u64), RuntimeError>;
}

/// Build the runtime selected by config.
pub fn build_runtime(backend: RuntimeBackend, settings: RuntimeSettings) -> Arc<WindowRegistry> {
    match backend {
        RuntimeBackend::Native => Arc::new(WindowRegistry::new(settings)),
    }
}
