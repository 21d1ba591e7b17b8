//! One PTY-backed window.
//!
//! A window owns its spawned process, screen engine, raw-output ring, and
//! per-window event channel. The output pump (blocking PTY reads on the
//! blocking pool) is the only writer of screen state; every mutation bumps
//! the window's sequence number and broadcasts one update. Subscribers that
//! fall behind the bounded channel resynchronize from a fresh snapshot.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use protocol::{CursorPos, Line, PatchOp, WindowId, WindowStatus};
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;

use super::ring::ByteRing;
use super::RuntimeError;
use crate::vt::Emulator;

/// Buffer size for PTY reads.
const READ_BUFFER_SIZE: usize = 4096;

/// Per-window event channel capacity. A subscriber that lags this far is
/// resynchronized with a fresh frame rather than blocking the pump.
pub const BROADCAST_CAPACITY: usize = 256;

/// How long the pump polls for the exit status after PTY EOF before
/// force-killing the straggler.
const EXIT_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawn parameters supplied by the launch collaborator: argv, extra
/// environment, working directory. Nothing else is known about the caller.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
}

/// Updates broadcast to window subscribers, in sequence order.
#[derive(Debug, Clone)]
pub enum WindowEvent {
    /// Changed viewport rows since the previous sequence number.
    Patch {
        seq: u64,
        line_count: u16,
        ops: Vec<PatchOp>,
    },
    /// Full snapshot; emitted on geometry changes.
    Frame {
        seq: u64,
        lines: Vec<Line>,
        cursor: CursorPos,
    },
    /// The process terminated. Emitted exactly once, last.
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

#[derive(Debug, Clone, Copy)]
struct StatusInner {
    status: WindowStatus,
    exit_code: Option<i32>,
    signal: Option<i32>,
}

/// A live window. Created by the registry, which is its sole owner; other
/// components hold it only transiently by `Arc`.
pub struct Window {
    id: WindowId,
    /// Screen engine. Sequence numbers are allocated and events sent while
    /// holding this lock, which is what keeps them in emission order.
    screen: std::sync::Mutex<Emulator>,
    seq: AtomicU64,
    ring: std::sync::Mutex<ByteRing>,
    writer: AsyncMutex<Box<dyn Write + Send>>,
    master: AsyncMutex<Box<dyn MasterPty + Send>>,
    child: AsyncMutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    events: broadcast::Sender<WindowEvent>,
    status: std::sync::Mutex<StatusInner>,
    running: AtomicBool,
    exit_emitted: AtomicBool,
    last_activity: AtomicU64,
    size: std::sync::Mutex<(u16, u16)>,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Window {
    /// Spawn the process on a fresh PTY and start the output pump.
    pub fn spawn(
        id: WindowId,
        spec: StartSpec,
        cols: u16,
        rows: u16,
        max_screen_rows: usize,
        ring_capacity: usize,
    ) -> Result<Arc<Self>, RuntimeError> {
        let program = spec
            .command
            .first()
            .ok_or_else(|| RuntimeError::SpawnFailed("empty command line".to_string()))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&spec.command[1..]);
        if let Some(ref dir) = spec.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;
        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;

        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        let window = Arc::new(Window {
            id: id.clone(),
            screen: std::sync::Mutex::new(Emulator::new(cols, rows, max_screen_rows)),
            seq: AtomicU64::new(0),
            ring: std::sync::Mutex::new(ByteRing::new(ring_capacity)),
            writer: AsyncMutex::new(writer),
            master: AsyncMutex::new(pair.master),
            child: AsyncMutex::new(child),
            pid,
            events,
            status: std::sync::Mutex::new(StatusInner {
                status: WindowStatus::Running,
                exit_code: None,
                signal: None,
            }),
            running: AtomicBool::new(true),
            exit_emitted: AtomicBool::new(false),
            last_activity: AtomicU64::new(now_ms()),
            size: std::sync::Mutex::new((cols, rows)),
        });

        window.start_output_pump(reader);

        tracing::info!(window_id = %window.id, pid = ?pid, cols, rows, "spawned window");
        Ok(window)
    }

    pub fn id(&self) -> &WindowId {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> (WindowStatus, Option<i32>, Option<i32>) {
        let inner = self.status.lock().unwrap();
        (inner.status, inner.exit_code, inner.signal)
    }

    fn touch(&self) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
    }

    /// Subscribe to window events and take a consistent snapshot.
    ///
    /// The receiver is registered before the snapshot is taken under the
    /// screen lock, so every event with a sequence number above the
    /// returned one will be delivered. Events at or below it may also be
    /// buffered; the caller skips those.
    pub fn subscribe(&self) -> (broadcast::Receiver<WindowEvent>, u64, Vec<Line>, CursorPos) {
        let rx = self.events.subscribe();
        let screen = self.screen.lock().unwrap();
        let seq = self.seq.load(Ordering::SeqCst);
        let (lines, cursor) = screen.snapshot();
        (rx, seq, lines, cursor)
    }

    /// Current snapshot with its sequence number, for forced resyncs.
    pub fn snapshot(&self) -> (u64, Vec<Line>, CursorPos) {
        let screen = self.screen.lock().unwrap();
        let seq = self.seq.load(Ordering::SeqCst);
        let (lines, cursor) = screen.snapshot();
        (seq, lines, cursor)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Raw-output slice for polling consumers.
    pub fn buffer_since(&self, offset: u64) -> (Vec<u8>, u64, u64) {
        self.ring.lock().unwrap().read_since(offset)
    }

    /// Snapshot of the whole retained ring, for the closed-window arena.
    pub fn ring_contents(&self) -> (Vec<u8>, u64) {
        let ring = self.ring.lock().unwrap();
        let (data, start, _) = ring.read_since(ring.start_offset());
        (data, start)
    }

    /// Write keystrokes to the process. Serialized by the writer lock; no
    /// interleaving of concurrent senders within one write.
    pub async fn write_input(&self, bytes: &[u8]) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Err(RuntimeError::AlreadyTerminated(self.id.clone()));
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .map_err(|e| RuntimeError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| RuntimeError::WriteFailed(e.to_string()))?;
        self.touch();
        Ok(())
    }

    /// Resize the PTY and the screen, then broadcast a full frame at the
    /// new geometry. In-flight updates at the old geometry are simply
    /// superseded by this frame's sequence number.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Err(RuntimeError::AlreadyTerminated(self.id.clone()));
        }
        let cols = cols.max(1);
        let rows = rows.max(1);

        {
            let master = self.master.lock().await;
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| RuntimeError::ResizeFailed(e.to_string()))?;
        }

        let mut screen = self.screen.lock().unwrap();
        screen.resize(cols, rows);
        let _ = screen.take_damage();
        let (lines, cursor) = screen.snapshot();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(WindowEvent::Frame { seq, lines, cursor });
        drop(screen);

        *self.size.lock().unwrap() = (cols, rows);
        tracing::debug!(window_id = %self.id, cols, rows, "resized window");
        Ok(())
    }

    /// Graceful stop: SIGTERM, wait out the grace period, then force-kill.
    /// A no-op on a window that already exited.
    pub async fn stop(&self, grace: Duration) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Ok(());
        }

        match self.pid {
            Some(pid) => {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    tracing::debug!(window_id = %self.id, error = %e, "SIGTERM failed");
                }
            }
            None => {
                let mut child = self.child.lock().await;
                let _ = child.kill();
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while self.is_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        if self.is_running() {
            tracing::warn!(window_id = %self.id, "grace period expired, force killing");
            {
                let mut child = self.child.lock().await;
                let _ = child.kill();
            }
            // The pump observes EOF and finalizes; give it a moment.
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while self.is_running() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }

        Ok(())
    }

    /// Feed one chunk of process output through ring and screen, then
    /// broadcast the resulting patch.
    fn ingest_output(&self, data: &[u8]) {
        self.touch();
        self.ring.lock().unwrap().append(data);

        let mut screen = self.screen.lock().unwrap();
        screen.feed(data);
        let damage = screen.take_damage();
        if damage.is_empty() {
            return;
        }

        let (_, rows) = screen.size();
        let ops: Vec<PatchOp> = if damage.full {
            (0..rows)
                .map(|index| PatchOp {
                    index,
                    line: screen.line(index),
                })
                .collect()
        } else {
            damage
                .rows
                .iter()
                .map(|&index| PatchOp {
                    index,
                    line: screen.line(index),
                })
                .collect()
        };

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(WindowEvent::Patch {
            seq,
            line_count: rows,
            ops,
        });
    }

    /// The output pump: blocking PTY reads on the blocking pool, fan-in to
    /// the screen engine, exit finalization on EOF.
    fn start_output_pump(self: &Arc<Self>, reader: Box<dyn Read + Send>) {
        let window = Arc::clone(self);
        tokio::spawn(async move {
            let reader = Arc::new(std::sync::Mutex::new(reader));
            loop {
                if !window.running.load(Ordering::SeqCst) {
                    break;
                }

                let reader_clone = Arc::clone(&reader);
                let result = tokio::task::spawn_blocking(move || {
                    let mut buf = vec![0u8; READ_BUFFER_SIZE];
                    let mut reader = reader_clone.lock().unwrap();
                    match reader.read(&mut buf) {
                        Ok(0) => Ok(None),
                        Ok(n) => {
                            buf.truncate(n);
                            Ok(Some(buf))
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

                match result {
                    Ok(Ok(Some(data))) => window.ingest_output(&data),
                    Ok(Ok(None)) => {
                        tracing::debug!(window_id = %window.id, "pty eof");
                        break;
                    }
                    Ok(Err(e)) => {
                        if window.running.load(Ordering::SeqCst) {
                            tracing::debug!(window_id = %window.id, error = %e, "pty read error");
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::error!(window_id = %window.id, error = %e, "read task panicked");
                        break;
                    }
                }
            }

            window.finalize_exit().await;
        });
    }

    /// Reap the child, record exit metadata, and emit the single `Exited`
    /// event. Safe to reach from the pump exactly once.
    async fn finalize_exit(&self) {
        self.running.store(false, Ordering::SeqCst);

        let exit_code = {
            let mut child = self.child.lock().await;
            let deadline = tokio::time::Instant::now() + EXIT_REAP_TIMEOUT;
            let mut code = None;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        code = Some(status.exit_code() as i32);
                        break;
                    }
                    Ok(None) => {
                        if tokio::time::Instant::now() >= deadline {
                            // EOF without exit: process closed its PTY but
                            // lingers. Take it down.
                            let _ = child.kill();
                            if let Ok(Some(status)) = child.try_wait() {
                                code = Some(status.exit_code() as i32);
                            }
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => {
                        tracing::debug!(window_id = %self.id, error = %e, "try_wait failed");
                        break;
                    }
                }
            }
            code
        };

        {
            let mut inner = self.status.lock().unwrap();
            if !inner.status.is_final() {
                inner.status = WindowStatus::Exited;
                inner.exit_code = exit_code;
            }
        }

        if !self.exit_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(WindowEvent::Exited {
                code: exit_code,
                signal: None,
            });
            tracing::info!(window_id = %self.id, code = ?exit_code, "window exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn spec(cmd: &[&str]) -> StartSpec {
        StartSpec {
            command: cmd.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            cwd: None,
        }
    }

    fn test_id(name: &str) -> WindowId {
        WindowId::new("test", name)
    }

    async fn wait_for_exit(window: &Window) {
        for _ in 0..100 {
            if !window.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("window did not exit");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let err = Window::spawn(
            test_id("bad"),
            spec(&["/nonexistent/definitely-not-a-program"]),
            80,
            24,
            200,
            4096,
        )
        .err();
        // portable-pty reports spawn failures either at spawn time or via
        // immediate exit; a direct error is the common path on Unix.
        if let Some(e) = err {
            assert!(matches!(e, RuntimeError::SpawnFailed(_)));
        }
    }

    #[tokio::test]
    async fn empty_command_is_spawn_failure() {
        let err = Window::spawn(test_id("empty"), spec(&[]), 80, 24, 200, 4096).unwrap_err();
        assert!(matches!(err, RuntimeError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn hello_output_lands_in_ring() {
        let window = Window::spawn(
            test_id("hello"),
            spec(&["/bin/sh", "-c", "printf hello"]),
            80,
            24,
            200,
            4096,
        )
        .unwrap();

        wait_for_exit(&window).await;
        let (data, start, _) = window.buffer_since(0);
        assert_eq!(start, 0);
        assert!(String::from_utf8_lossy(&data).contains("hello"));
    }

    #[tokio::test]
    async fn exit_event_emitted_once_with_code() {
        let window = Window::spawn(
            test_id("exit7"),
            spec(&["/bin/sh", "-c", "exit 7"]),
            80,
            24,
            200,
            4096,
        )
        .unwrap();
        let (mut rx, _, _, _) = window.subscribe();

        let mut exits = 0;
        let mut code = None;
        loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(WindowEvent::Exited { code: c, .. })) => {
                    exits += 1;
                    code = c;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Ok(Err(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(exits, 1);
        assert_eq!(code, Some(7));

        let (status, exit_code, _) = window.status();
        assert_eq!(status, WindowStatus::Exited);
        assert_eq!(exit_code, Some(7));
    }

    #[tokio::test]
    async fn echoed_input_reaches_screen() {
        let window = Window::spawn(
            test_id("cat"),
            spec(&["/bin/cat"]),
            40,
            5,
            100,
            4096,
        )
        .unwrap();
        let (mut rx, frame_seq, _, _) = window.subscribe();

        window.write_input(b"marker42\n").await.unwrap();

        let mut seen = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Ok(WindowEvent::Patch { seq, ops, .. })) => {
                    assert!(seq > frame_seq);
                    if ops.iter().any(|op| op.line.text.contains("marker42")) {
                        seen = true;
                        break;
                    }
                }
                Ok(Ok(_)) => continue,
                _ => continue,
            }
        }
        assert!(seen, "echoed input never showed up in a patch");

        window.stop(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_exit() {
        let window = Window::spawn(
            test_id("quick"),
            spec(&["/bin/sh", "-c", "exit 0"]),
            80,
            24,
            200,
            4096,
        )
        .unwrap();
        wait_for_exit(&window).await;

        window.stop(Duration::from_millis(100)).await.unwrap();
        window.stop(Duration::from_millis(100)).await.unwrap();
        let (status, _, _) = window.status();
        assert_eq!(status, WindowStatus::Exited);
    }

    #[tokio::test]
    async fn stop_terminates_long_running_process() {
        let window = Window::spawn(
            test_id("sleeper"),
            spec(&["/bin/sh", "-c", "sleep 60"]),
            80,
            24,
            200,
            4096,
        )
        .unwrap();
        assert!(window.is_running());

        window.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!window.is_running());
    }

    #[tokio::test]
    async fn write_after_exit_is_rejected() {
        let window = Window::spawn(
            test_id("done"),
            spec(&["/bin/sh", "-c", "exit 0"]),
            80,
            24,
            200,
            4096,
        )
        .unwrap();
        wait_for_exit(&window).await;

        let err = window.write_input(b"late\n").await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyTerminated(_)));
    }

    #[tokio::test]
    async fn resize_broadcasts_frame_at_new_geometry() {
        let window = Window::spawn(test_id("rsz"), spec(&["/bin/cat"]), 80, 24, 200, 4096)
            .unwrap();
        let (mut rx, _, _, _) = window.subscribe();

        window.resize(100, 30).await.unwrap();
        assert_eq!(window.size(), (100, 30));

        let mut got_frame = false;
        for _ in 0..20 {
            match timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Ok(WindowEvent::Frame { lines, .. })) => {
                    assert_eq!(lines.len(), 30);
                    got_frame = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(got_frame);

        window.stop(Duration::from_millis(200)).await.unwrap();
    }
}
