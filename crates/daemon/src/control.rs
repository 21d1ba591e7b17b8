//! Control surface: the synchronous request/response fallback.
//!
//! Newline-delimited JSON on a second Unix socket, one response per
//! request. It operates on the same window identities as the stream
//! server, so a consumer that cannot hold a streaming connection can
//! function correctly by polling alone. Requests over the configured byte
//! ceiling are rejected outright and the connection dropped.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use protocol::{ControlRequest, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::runtime::{StartSpec, WindowRegistry, WindowRuntime};

/// Control surface tunables.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Hard ceiling on a single request line, in bytes.
    pub max_request_bytes: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            max_request_bytes: 128 * 1024,
        }
    }
}

/// Listens for control connections on a local socket.
pub struct ControlServer {
    listener: UnixListener,
}

impl ControlServer {
    /// Bind the control socket, creating parent directories and removing a
    /// stale socket file first.
    pub fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self { listener })
    }

    /// Accept connections until cancelled.
    pub async fn run(
        self,
        registry: Arc<WindowRegistry>,
        settings: ControlSettings,
        cancel: CancellationToken,
        stream_clients: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let registry = Arc::clone(&registry);
                        let settings = settings.clone();
                        let cancel = cancel.clone();
                        let stream_clients = Arc::clone(&stream_clients);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(
                                stream,
                                registry,
                                settings,
                                cancel,
                                stream_clients,
                            )
                            .await
                            {
                                tracing::debug!(error = %e, "control connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "control accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
            }
        }
        tracing::debug!("control server stopped");
    }
}

async fn handle_connection(
    stream: UnixStream,
    registry: Arc<WindowRegistry>,
    settings: ControlSettings,
    cancel: CancellationToken,
    stream_clients: Arc<AtomicUsize>,
) -> io::Result<()> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let max = settings.max_request_bytes;

    loop {
        let mut line: Vec<u8> = Vec::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_limited(&mut reader, &mut line, max) => read?,
        };
        if read == 0 {
            break;
        }

        if line.len() > max {
            let reply = ControlResponse::Error {
                message: format!("request exceeds {max} byte ceiling"),
            };
            write_response(&mut write_half, &reply).await?;
            // Whatever follows belongs to the oversized request; drop the
            // connection rather than resynchronize on it.
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let request: ControlRequest = match serde_json::from_str(text.trim()) {
            Ok(request) => request,
            Err(e) => {
                let reply = ControlResponse::Error {
                    message: format!("malformed request: {e}"),
                };
                write_response(&mut write_half, &reply).await?;
                continue;
            }
        };

        let shutdown = matches!(request, ControlRequest::Shutdown);
        let reply = dispatch(request, &registry, &stream_clients).await;
        write_response(&mut write_half, &reply).await?;

        if shutdown {
            cancel.cancel();
            break;
        }
    }

    Ok(())
}

/// Read one newline-terminated request, never buffering more than
/// `max + 1` bytes.
async fn read_limited<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<usize> {
    use tokio::io::AsyncReadExt;
    let mut limited = reader.take(max as u64 + 1);
    limited.read_until(b'\n', line).await
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ControlResponse,
) -> io::Result<()> {
    let mut json = serde_json::to_string(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}

async fn dispatch(
    request: ControlRequest,
    registry: &Arc<WindowRegistry>,
    stream_clients: &Arc<AtomicUsize>,
) -> ControlResponse {
    match request {
        ControlRequest::Ping => ControlResponse::Pong,

        ControlRequest::Status => ControlResponse::Status {
            uptime_secs: registry.uptime_secs(),
            window_count: registry.window_count(),
            stream_clients: stream_clients.load(Ordering::Relaxed),
        },

        ControlRequest::ListWindows => ControlResponse::Windows {
            windows: registry.list_windows(),
        },

        ControlRequest::Focus { window } => match registry.focus(&window) {
            Ok(()) => ControlResponse::Focused { window },
            Err(e) => ControlResponse::Error {
                message: e.to_string(),
            },
        },

        ControlRequest::SendInput {
            window,
            text,
            submit,
        } => {
            let mut bytes = text.into_bytes();
            if submit {
                // Carriage return works for both cooked shells and
                // raw-mode TUI programs.
                bytes.push(b'\r');
            }
            match registry.write_input(&window, &bytes).await {
                Ok(()) => ControlResponse::InputSent,
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        ControlRequest::BufferSince { window, offset } => {
            match registry.buffer_since(&window, offset) {
                Ok((data, start_offset, next_offset)) => ControlResponse::Buffer {
                    data,
                    start_offset,
                    next_offset,
                },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        ControlRequest::StartWindow {
            session,
            window,
            command,
            env,
            cwd,
        } => {
            let spec = StartSpec { command, env, cwd };
            match registry.start_window(&session, &window, spec).await {
                Ok(id) => ControlResponse::WindowStarted { window: id },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        ControlRequest::StopWindow { window } => match registry.stop_window(&window).await {
            Ok(()) => ControlResponse::WindowStopped { window },
            Err(e) => ControlResponse::Error {
                message: e.to_string(),
            },
        },

        ControlRequest::ResizeWindow { window, cols, rows } => {
            match registry.resize(&window, cols, rows).await {
                Ok(()) => ControlResponse::WindowResized { window },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        ControlRequest::Shutdown => ControlResponse::ShuttingDown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeSettings;
    use std::time::Duration;
    use tokio::io::AsyncBufReadExt;

    struct TestControl {
        path: std::path::PathBuf,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    async fn start_server() -> TestControl {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let server = ControlServer::bind(&path).unwrap();
        let registry = Arc::new(WindowRegistry::new(RuntimeSettings {
            grace_period: Duration::from_millis(300),
            ..RuntimeSettings::default()
        }));
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(
            registry,
            ControlSettings::default(),
            cancel.clone(),
            Arc::new(AtomicUsize::new(0)),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        TestControl {
            path,
            cancel,
            _dir: dir,
        }
    }

    async fn roundtrip(path: &Path, request: &ControlRequest) -> ControlResponse {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut json = serde_json::to_string(request).unwrap();
        json.push('\n');
        write_half.write_all(json.as_bytes()).await.unwrap();
        write_half.flush().await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    #[tokio::test]
    async fn ping_pong() {
        let server = start_server().await;
        let reply = roundtrip(&server.path, &ControlRequest::Ping).await;
        assert_eq!(reply, ControlResponse::Pong);
        server.cancel.cancel();
    }

    #[tokio::test]
    async fn list_windows_empty() {
        let server = start_server().await;
        let reply = roundtrip(&server.path, &ControlRequest::ListWindows).await;
        assert_eq!(reply, ControlResponse::Windows { windows: vec![] });
        server.cancel.cancel();
    }

    #[tokio::test]
    async fn start_input_and_poll_buffer() {
        let server = start_server().await;

        let reply = roundtrip(
            &server.path,
            &ControlRequest::StartWindow {
                session: "proj".to_string(),
                window: "main".to_string(),
                command: vec!["/bin/cat".to_string()],
                env: vec![],
                cwd: None,
            },
        )
        .await;
        let id = match reply {
            ControlResponse::WindowStarted { window } => window,
            other => panic!("unexpected reply: {other:?}"),
        };

        let reply = roundtrip(
            &server.path,
            &ControlRequest::SendInput {
                window: id.clone(),
                text: "poll-marker".to_string(),
                submit: true,
            },
        )
        .await;
        assert_eq!(reply, ControlResponse::InputSent);

        // Poll until the echo shows up.
        let mut found = false;
        for _ in 0..50 {
            let reply = roundtrip(
                &server.path,
                &ControlRequest::BufferSince {
                    window: id.clone(),
                    offset: 0,
                },
            )
            .await;
            if let ControlResponse::Buffer { data, .. } = reply {
                if String::from_utf8_lossy(&data).contains("poll-marker") {
                    found = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(found, "input echo never appeared in the ring buffer");

        let reply = roundtrip(&server.path, &ControlRequest::StopWindow { window: id }).await;
        assert!(matches!(reply, ControlResponse::WindowStopped { .. }));
        server.cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_window_is_an_error_reply() {
        let server = start_server().await;
        let reply = roundtrip(
            &server.path,
            &ControlRequest::SendInput {
                window: protocol::WindowId::new("no", "where"),
                text: "x".to_string(),
                submit: false,
            },
        )
        .await;
        assert!(matches!(reply, ControlResponse::Error { .. }));

        // The connection survives a bad request.
        let reply = roundtrip(&server.path, &ControlRequest::Ping).await;
        assert_eq!(reply, ControlResponse::Pong);
        server.cancel.cancel();
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let server = ControlServer::bind(&path).unwrap();
        let registry = Arc::new(WindowRegistry::new(RuntimeSettings::default()));
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(
            registry,
            ControlSettings {
                max_request_bytes: 64,
            },
            cancel.clone(),
            Arc::new(AtomicUsize::new(0)),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let huge = format!("{}\n", "x".repeat(1024));
        write_half.write_all(huge.as_bytes()).await.unwrap();
        write_half.flush().await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let reply: ControlResponse = serde_json::from_str(line.trim()).unwrap();
        match reply {
            ControlResponse::Error { message } => assert!(message.contains("ceiling")),
            other => panic!("unexpected reply: {other:?}"),
        }

        // Connection is dropped afterwards.
        let mut rest = String::new();
        let n = reader.read_line(&mut rest).await.unwrap();
        assert_eq!(n, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn shutdown_request_cancels_daemon() {
        let server = start_server().await;
        let reply = roundtrip(&server.path, &ControlRequest::Shutdown).await;
        assert_eq!(reply, ControlResponse::ShuttingDown);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.cancel.is_cancelled());
    }
}
