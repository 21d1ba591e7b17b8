//! Window registry: the native implementation of the runtime contract.
//!
//! Live windows sit in one concurrent map; windows that have terminated
//! move into a closed-window arena that retains exit metadata and the ring
//! tail for a bounded period, so a late caller can still read them. A
//! sweeper task archives finished windows and purges expired arena entries.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::{WindowEntry, WindowId, WindowStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::window::{now_ms, StartSpec, Window, WindowEvent};
use super::{RuntimeError, WindowRuntime};
use protocol::{CursorPos, Line};

/// Tunables for the native runtime, taken from daemon config.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub default_cols: u16,
    pub default_rows: u16,
    /// Retained rows per window (viewport + scrollback).
    pub max_screen_rows: usize,
    /// Raw-output ring capacity in bytes.
    pub ring_capacity: usize,
    /// Grace period between SIGTERM and force-kill.
    pub grace_period: Duration,
    /// How long exited windows stay readable in the arena.
    pub closed_retention: Duration,
    /// Sweeper cadence.
    pub sweep_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_cols: 80,
            default_rows: 24,
            max_screen_rows: 500,
            ring_capacity: 256 * 1024,
            grace_period: Duration::from_secs(3),
            closed_retention: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(2),
        }
    }
}

/// Exit state retained after a window is gone.
#[derive(Debug, Clone)]
struct ClosedWindow {
    status: WindowStatus,
    exit_code: Option<i32>,
    signal: Option<i32>,
    message: Option<String>,
    ring_data: Vec<u8>,
    ring_start: u64,
    last_activity: u64,
    cols: u16,
    rows: u16,
    closed_at: u64,
}

/// The native window runtime.
pub struct WindowRegistry {
    settings: RuntimeSettings,
    sessions: DashMap<String, u64>,
    windows: DashMap<WindowId, Arc<Window>>,
    closed: DashMap<WindowId, ClosedWindow>,
    focused: std::sync::Mutex<Option<WindowId>>,
    started_at: u64,
}

/// Keep ids shell- and path-safe; the separator is reserved.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

impl WindowRegistry {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            sessions: DashMap::new(),
            windows: DashMap::new(),
            closed: DashMap::new(),
            focused: std::sync::Mutex::new(None),
            started_at: now_ms(),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn uptime_secs(&self) -> u64 {
        (now_ms().saturating_sub(self.started_at)) / 1000
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// A live window by id.
    pub fn window(&self, id: &WindowId) -> Option<Arc<Window>> {
        self.windows.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Subscribe to a live window: receiver plus a consistent snapshot.
    pub fn subscribe(
        &self,
        id: &WindowId,
    ) -> Result<
        (
            tokio::sync::broadcast::Receiver<WindowEvent>,
            u64,
            Vec<Line>,
            CursorPos,
        ),
        RuntimeError,
    > {
        if let Some(window) = self.window(id) {
            // An exited-but-unswept window already broadcast its exit
            // event; a fresh subscription would wait forever.
            if !window.is_running() {
                return Err(RuntimeError::AlreadyTerminated(id.clone()));
            }
            return Ok(window.subscribe());
        }
        if self.closed.contains_key(id) {
            return Err(RuntimeError::AlreadyTerminated(id.clone()));
        }
        Err(RuntimeError::NotFound(id.clone()))
    }

    /// Whether any live or closed window exists under this id.
    pub fn contains(&self, id: &WindowId) -> bool {
        self.windows.contains_key(id) || self.closed.contains_key(id)
    }

    /// Exit metadata for a terminated window, live-but-unswept or archived.
    pub fn exit_info(&self, id: &WindowId) -> Option<(Option<i32>, Option<i32>)> {
        if let Some(window) = self.window(id) {
            let (status, code, signal) = window.status();
            if status.is_final() {
                return Some((code, signal));
            }
            return None;
        }
        self.closed_exit(id)
    }

    /// Exit metadata for a window in the arena.
    pub fn closed_exit(&self, id: &WindowId) -> Option<(Option<i32>, Option<i32>)> {
        self.closed
            .get(id)
            .map(|entry| (entry.exit_code, entry.signal))
    }

    pub fn focus(&self, id: &WindowId) -> Result<(), RuntimeError> {
        if !self.windows.contains_key(id) && !self.closed.contains_key(id) {
            return Err(RuntimeError::NotFound(id.clone()));
        }
        *self.focused.lock().unwrap() = Some(id.clone());
        Ok(())
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focused.lock().unwrap().clone()
    }

    /// Move a finished window into the closed arena.
    fn archive(&self, window: &Arc<Window>) {
        if window.is_running() {
            return;
        }
        let id = window.id().clone();
        let (status, exit_code, signal) = window.status();
        let (ring_data, ring_start) = window.ring_contents();
        let (cols, rows) = window.size();
        self.closed.insert(
            id.clone(),
            ClosedWindow {
                status,
                exit_code,
                signal,
                message: None,
                ring_data,
                ring_start,
                last_activity: window.last_activity(),
                cols,
                rows,
                closed_at: now_ms(),
            },
        );
        self.windows.remove(&id);
        tracing::debug!(window_id = %id, "archived window");
    }

    /// Record a spawn failure so late readers can observe the error state.
    fn record_spawn_failure(&self, id: &WindowId, cols: u16, rows: u16, message: &str) {
        self.closed.insert(
            id.clone(),
            ClosedWindow {
                status: WindowStatus::Error,
                exit_code: None,
                signal: None,
                message: Some(message.to_string()),
                ring_data: Vec::new(),
                ring_start: 0,
                last_activity: now_ms(),
                cols,
                rows,
                closed_at: now_ms(),
            },
        );
    }

    /// Archive finished live windows; purge expired arena entries.
    pub fn sweep(&self) {
        let finished: Vec<Arc<Window>> = self
            .windows
            .iter()
            .filter(|entry| !entry.value().is_running())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for window in finished {
            self.archive(&window);
        }

        let cutoff = now_ms().saturating_sub(self.settings.closed_retention.as_millis() as u64);
        self.closed.retain(|id, closed| {
            let keep = closed.closed_at >= cutoff;
            if !keep {
                tracing::debug!(window_id = %id, "purged closed window");
            }
            keep
        });
    }

    /// Run the sweeper until cancelled.
    pub fn start_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let registry = Arc::clone(self);
        let interval = registry.settings.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => registry.sweep(),
                }
            }
        });
    }

    /// Stop every live window within the grace period.
    pub async fn shutdown(&self) {
        let grace = self.settings.grace_period;
        let windows: Vec<Arc<Window>> = self
            .windows
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut set = JoinSet::new();
        for window in windows {
            set.spawn(async move {
                let _ = window.stop(grace).await;
            });
        }
        while set.join_next().await.is_some() {}
        self.sweep();
    }

    /// Last-known geometry for a window id, for relaunches.
    fn last_known_size(&self, id: &WindowId) -> (u16, u16) {
        if let Some(window) = self.windows.get(id) {
            return window.size();
        }
        if let Some(closed) = self.closed.get(id) {
            return (closed.cols, closed.rows);
        }
        (self.settings.default_cols, self.settings.default_rows)
    }
}

impl WindowRuntime for WindowRegistry {
    fn ensure_session(&self, name: &str) -> String {
        let session = sanitize(name);
        self.sessions.entry(session.clone()).or_insert_with(now_ms);
        session
    }

    fn window_exists(&self, session: &str, window: &str) -> bool {
        let id = WindowId::new(sanitize(session), sanitize(window));
        self.windows.contains_key(&id) || self.closed.contains_key(&id)
    }

    async fn start_window(
        &self,
        session: &str,
        window: &str,
        spec: StartSpec,
    ) -> Result<WindowId, RuntimeError> {
        let session = self.ensure_session(session);
        let id = WindowId::new(session, sanitize(window));

        if let Some(existing) = self.window(&id) {
            if existing.is_running() {
                return Err(RuntimeError::AlreadyRunning(id));
            }
            // A relaunch replaces the old window value entirely.
            self.archive(&existing);
        }

        let (cols, rows) = self.last_known_size(&id);
        match Window::spawn(
            id.clone(),
            spec,
            cols,
            rows,
            self.settings.max_screen_rows,
            self.settings.ring_capacity,
        ) {
            Ok(win) => {
                self.closed.remove(&id);
                self.windows.insert(id.clone(), win);
                Ok(id)
            }
            Err(RuntimeError::SpawnFailed(message)) => {
                tracing::warn!(window_id = %id, error = %message, "spawn failed");
                self.record_spawn_failure(&id, cols, rows, &message);
                Err(RuntimeError::SpawnFailed(message))
            }
            Err(other) => Err(other),
        }
    }

    async fn stop_window(&self, id: &WindowId) -> Result<(), RuntimeError> {
        if let Some(window) = self.window(id) {
            window.stop(self.settings.grace_period).await?;
            self.archive(&window);
            return Ok(());
        }
        if self.closed.contains_key(id) {
            // Already exited; stopping again is a no-op.
            return Ok(());
        }
        Err(RuntimeError::NotFound(id.clone()))
    }

    async fn write_input(&self, id: &WindowId, bytes: &[u8]) -> Result<(), RuntimeError> {
        match self.window(id) {
            Some(window) => window.write_input(bytes).await,
            None if self.closed.contains_key(id) => {
                Err(RuntimeError::AlreadyTerminated(id.clone()))
            }
            None => Err(RuntimeError::NotFound(id.clone())),
        }
    }

    async fn resize(&self, id: &WindowId, cols: u16, rows: u16) -> Result<(), RuntimeError> {
        match self.window(id) {
            Some(window) => window.resize(cols, rows).await,
            None if self.closed.contains_key(id) => {
                Err(RuntimeError::AlreadyTerminated(id.clone()))
            }
            None => Err(RuntimeError::NotFound(id.clone())),
        }
    }

    fn list_windows(&self) -> Vec<WindowEntry> {
        let mut entries: Vec<WindowEntry> = self
            .windows
            .iter()
            .map(|entry| {
                let window = entry.value();
                let (status, exit_code, signal) = window.status();
                let (cols, rows) = window.size();
                WindowEntry {
                    id: window.id().clone(),
                    status,
                    last_activity_ms: window.last_activity(),
                    cols,
                    rows,
                    exit_code,
                    signal,
                    message: None,
                }
            })
            .collect();

        for entry in self.closed.iter() {
            if self.windows.contains_key(entry.key()) {
                continue;
            }
            let closed = entry.value();
            entries.push(WindowEntry {
                id: entry.key().clone(),
                status: closed.status,
                last_activity_ms: closed.last_activity,
                cols: closed.cols,
                rows: closed.rows,
                exit_code: closed.exit_code,
                signal: closed.signal,
                message: closed.message.clone(),
            });
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    fn buffer_since(&self, id: &WindowId, offset: u64) -> Result<(Vec<u8>, u64, u64), RuntimeError> {
        if let Some(window) = self.window(id) {
            return Ok(window.buffer_since(offset));
        }
        if let Some(closed) = self.closed.get(id) {
            let end = closed.ring_start + closed.ring_data.len() as u64;
            let effective = offset.clamp(closed.ring_start, end);
            let skip = (effective - closed.ring_start) as usize;
            return Ok((closed.ring_data[skip..].to_vec(), effective, end));
        }
        Err(RuntimeError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WindowRegistry {
        WindowRegistry::new(RuntimeSettings {
            grace_period: Duration::from_millis(500),
            closed_retention: Duration::from_secs(60),
            ..RuntimeSettings::default()
        })
    }

    fn sh(script: &str) -> StartSpec {
        StartSpec {
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            env: Vec::new(),
            cwd: None,
        }
    }

    async fn wait_exited(registry: &WindowRegistry, id: &WindowId) {
        for _ in 0..100 {
            if let Some(window) = registry.window(id) {
                if !window.is_running() {
                    return;
                }
            } else {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("window never exited");
    }

    #[test]
    fn sanitize_session_names() {
        assert_eq!(sanitize("My Project!"), "My-Project-");
        assert_eq!(sanitize("a:b"), "a-b");
        assert_eq!(sanitize("  "), "default");
        assert_eq!(sanitize("ok-name_1.2"), "ok-name_1.2");
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let registry = registry();
        let a = registry.ensure_session("proj");
        let b = registry.ensure_session("proj");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn start_list_stop_roundtrip() {
        let registry = registry();
        let id = registry
            .start_window("proj", "main", sh("sleep 30"))
            .await
            .unwrap();
        assert!(registry.window_exists("proj", "main"));

        let windows = registry.list_windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].id, id);
        assert_eq!(windows[0].status, WindowStatus::Running);

        registry.stop_window(&id).await.unwrap();
        let windows = registry.list_windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].status, WindowStatus::Exited);
    }

    #[tokio::test]
    async fn hello_buffer_since_scenario() {
        let registry = registry();
        let id = registry
            .start_window("proj", "hello", sh("printf hello"))
            .await
            .unwrap();
        wait_exited(&registry, &id).await;
        registry.sweep();

        let (data, _, _) = registry.buffer_since(&id, 0).unwrap();
        assert!(String::from_utf8_lossy(&data).contains("hello"));
    }

    #[tokio::test]
    async fn stop_twice_is_noop() {
        let registry = registry();
        let id = registry
            .start_window("proj", "short", sh("exit 0"))
            .await
            .unwrap();
        wait_exited(&registry, &id).await;

        registry.stop_window(&id).await.unwrap();
        registry.stop_window(&id).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected_while_running() {
        let registry = registry();
        let _ = registry
            .start_window("proj", "dup", sh("sleep 30"))
            .await
            .unwrap();
        let err = registry
            .start_window("proj", "dup", sh("sleep 30"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning(_)));

        let id = WindowId::new("proj", "dup");
        registry.stop_window(&id).await.unwrap();
    }

    #[tokio::test]
    async fn relaunch_after_exit_creates_new_window() {
        let registry = registry();
        let id = registry
            .start_window("proj", "re", sh("exit 3"))
            .await
            .unwrap();
        wait_exited(&registry, &id).await;
        registry.sweep();

        let id2 = registry
            .start_window("proj", "re", sh("sleep 30"))
            .await
            .unwrap();
        assert_eq!(id, id2);
        let windows = registry.list_windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].status, WindowStatus::Running);

        registry.stop_window(&id2).await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_recorded_as_error_window() {
        let registry = registry();
        let spec = StartSpec {
            command: vec!["/definitely/not/a/real/binary".to_string()],
            env: Vec::new(),
            cwd: None,
        };
        let result = registry.start_window("proj", "bad", spec).await;

        if result.is_err() {
            let windows = registry.list_windows();
            assert_eq!(windows.len(), 1);
            assert_eq!(windows[0].status, WindowStatus::Error);
            assert!(windows[0].message.is_some());
        }
    }

    #[tokio::test]
    async fn unknown_window_operations_fail() {
        let registry = registry();
        let id = WindowId::new("proj", "ghost");
        assert!(matches!(
            registry.write_input(&id, b"x").await.unwrap_err(),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            registry.resize(&id, 80, 24).await.unwrap_err(),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            registry.stop_window(&id).await.unwrap_err(),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            registry.buffer_since(&id, 0).unwrap_err(),
            RuntimeError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn closed_arena_retains_buffer_until_purged() {
        let registry = WindowRegistry::new(RuntimeSettings {
            grace_period: Duration::from_millis(200),
            closed_retention: Duration::from_millis(0),
            ..RuntimeSettings::default()
        });
        let id = registry
            .start_window("proj", "gone", sh("printf bye"))
            .await
            .unwrap();
        wait_exited(&registry, &id).await;
        registry.sweep();

        // With zero retention the second sweep purges it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.sweep();
        assert!(matches!(
            registry.buffer_since(&id, 0).unwrap_err(),
            RuntimeError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn focus_tracks_known_windows_only() {
        let registry = registry();
        let ghost = WindowId::new("proj", "ghost");
        assert!(registry.focus(&ghost).is_err());

        let id = registry
            .start_window("proj", "focus", sh("sleep 30"))
            .await
            .unwrap();
        registry.focus(&id).unwrap();
        assert_eq!(registry.focused(), Some(id.clone()));

        registry.stop_window(&id).await.unwrap();
    }

    #[tokio::test]
    async fn two_windows_are_independent() {
        let registry = registry();
        let a = registry
            .start_window("proj", "a", sh("sleep 30"))
            .await
            .unwrap();
        let b = registry
            .start_window("proj", "b", sh("exit 1"))
            .await
            .unwrap();
        wait_exited(&registry, &b).await;

        // b's exit must not disturb a.
        let window_a = registry.window(&a).unwrap();
        assert!(window_a.is_running());
        registry.write_input(&a, b"still alive\n").await.unwrap();

        registry.stop_window(&a).await.unwrap();
    }
}
