//! Stream server: the push channel for display clients.
//!
//! One Unix-socket listener; per connection, a reader loop dispatching
//! client messages, a writer task draining a bounded outbound queue, and
//! one subscription pump per subscribed window. Failures are scoped to the
//! offending connection; corrupted framing drops the connection, anything
//! less gets an error reply and the connection stays up.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    framing, ClientMessage, ErrorCode, FrameUpdate, ServerMessage, WindowId, PROTOCOL_VERSION,
};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::subscriber;
use crate::runtime::{RuntimeError, WindowRegistry, WindowRuntime};

/// Delivery policy for stream subscribers. The values bound both latency
/// and buffering: patches are flushed at most once per coalescing
/// interval, and a client that cannot keep up is resynchronized with a
/// frame instead of buffered without limit.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub coalesce: Duration,
    pub outbound_queue: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            coalesce: Duration::from_millis(25),
            outbound_queue: 64,
        }
    }
}

/// Listens for display-client connections on a local socket.
pub struct StreamServer {
    listener: UnixListener,
}

impl StreamServer {
    /// Bind the stream socket, creating parent directories and removing a
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
        settings: StreamSettings,
        cancel: CancellationToken,
        client_count: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let registry = Arc::clone(&registry);
                        let settings = settings.clone();
                        let cancel = cancel.clone();
                        let client_count = Arc::clone(&client_count);
                        client_count.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(async move {
                            handle_connection(stream, registry, settings, cancel).await;
                            client_count.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stream accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        tracing::debug!("stream server stopped");
    }
}

async fn send_error(
    outbound: &mpsc::Sender<ServerMessage>,
    code: ErrorCode,
    message: impl Into<String>,
) {
    let _ = outbound
        .send(ServerMessage::Error {
            code,
            message: message.into(),
        })
        .await;
}

async fn handle_connection(
    stream: UnixStream,
    registry: Arc<WindowRegistry>,
    settings: StreamSettings,
    cancel: CancellationToken,
) {
    let conn_id = Uuid::new_v4();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(settings.outbound_queue);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let payload = match message.to_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode server message");
                    continue;
                }
            };
            if framing::write_frame(&mut writer, &payload).await.is_err() {
                break;
            }
        }
    });

    // The handshake must come first and carry a matching version.
    let hello_ok = match framing::read_frame(&mut reader).await {
        Ok(Some(payload)) => match ClientMessage::from_bytes(&payload) {
            Ok(ClientMessage::Hello { version }) if version == PROTOCOL_VERSION => true,
            Ok(ClientMessage::Hello { version }) => {
                send_error(
                    &outbound_tx,
                    ErrorCode::VersionMismatch,
                    format!("client speaks v{version}, daemon speaks v{PROTOCOL_VERSION}"),
                )
                .await;
                false
            }
            Ok(_) => {
                send_error(&outbound_tx, ErrorCode::Malformed, "expected hello first").await;
                false
            }
            Err(e) => {
                send_error(&outbound_tx, ErrorCode::Malformed, e.to_string()).await;
                false
            }
        },
        _ => false,
    };

    if !hello_ok {
        drop(outbound_tx);
        let _ = writer_task.await;
        return;
    }
    tracing::debug!(conn_id = %conn_id, "stream client connected");

    let mut subscriptions: HashMap<WindowId, JoinHandle<()>> = HashMap::new();
    let mut focused: Option<WindowId> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = outbound_tx.try_send(ServerMessage::Error {
                    code: ErrorCode::ShuttingDown,
                    message: "daemon shutting down".to_string(),
                });
                break;
            }
            frame = framing::read_frame(&mut reader) => match frame {
                Ok(Some(payload)) => {
                    let message = match ClientMessage::from_bytes(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            send_error(&outbound_tx, ErrorCode::Malformed, e.to_string()).await;
                            continue;
                        }
                    };
                    handle_message(
                        message,
                        &registry,
                        &settings,
                        &outbound_tx,
                        &mut subscriptions,
                        &mut focused,
                    )
                    .await;
                }
                Ok(None) => break,
                Err(e) => {
                    // Framing is corrupted; the connection cannot be trusted.
                    tracing::debug!(conn_id = %conn_id, error = %e, "dropping stream connection");
                    break;
                }
            },
        }
    }

    // Free this subscriber's buffers immediately.
    for (_, handle) in subscriptions {
        handle.abort();
    }
    drop(outbound_tx);
    let _ = writer_task.await;
    tracing::debug!(conn_id = %conn_id, "stream client disconnected");
}

async fn handle_message(
    message: ClientMessage,
    registry: &Arc<WindowRegistry>,
    settings: &StreamSettings,
    outbound: &mpsc::Sender<ServerMessage>,
    subscriptions: &mut HashMap<WindowId, JoinHandle<()>>,
    focused: &mut Option<WindowId>,
) {
    match message {
        ClientMessage::Hello { .. } => {
            send_error(outbound, ErrorCode::Malformed, "duplicate hello").await;
        }

        ClientMessage::Subscribe { window, cols, rows } => {
            subscribe(registry, settings, outbound, subscriptions, window, cols, rows).await;
        }

        ClientMessage::Focus { window } => {
            if registry.contains(&window) {
                *focused = Some(window);
                tracing::trace!(window = ?focused, "client focus changed");
            } else {
                send_error(
                    outbound,
                    ErrorCode::UnknownWindow,
                    format!("no such window: {window}"),
                )
                .await;
            }
        }

        ClientMessage::Input { window, bytes } => {
            match registry.write_input(&window, &bytes).await {
                Ok(()) => {}
                Err(RuntimeError::NotFound(_)) | Err(RuntimeError::AlreadyTerminated(_)) => {
                    send_error(
                        outbound,
                        ErrorCode::UnknownWindow,
                        format!("no such window: {window}"),
                    )
                    .await;
                }
                Err(e) => send_error(outbound, ErrorCode::Internal, e.to_string()).await,
            }
        }

        ClientMessage::Resize { window, cols, rows } => {
            match registry.resize(&window, cols, rows).await {
                Ok(()) => {}
                Err(RuntimeError::NotFound(_)) | Err(RuntimeError::AlreadyTerminated(_)) => {
                    send_error(
                        outbound,
                        ErrorCode::UnknownWindow,
                        format!("no such window: {window}"),
                    )
                    .await;
                }
                Err(e) => send_error(outbound, ErrorCode::Internal, e.to_string()).await,
            }
        }
    }
}

/// Subscribe flow: resize to the negotiated geometry, reply with a full
/// frame, then stream patches through a dedicated pump.
async fn subscribe(
    registry: &Arc<WindowRegistry>,
    settings: &StreamSettings,
    outbound: &mpsc::Sender<ServerMessage>,
    subscriptions: &mut HashMap<WindowId, JoinHandle<()>>,
    window: WindowId,
    cols: u16,
    rows: u16,
) {
    match registry.resize(&window, cols, rows).await {
        Ok(()) => {}
        Err(RuntimeError::NotFound(_)) => {
            send_error(
                outbound,
                ErrorCode::UnknownWindow,
                format!("no such window: {window}"),
            )
            .await;
            return;
        }
        Err(RuntimeError::AlreadyTerminated(_)) => {
            let (code, signal) = registry.exit_info(&window).unwrap_or((None, None));
            let _ = outbound
                .send(ServerMessage::WindowExit {
                    window,
                    code,
                    signal,
                })
                .await;
            return;
        }
        Err(e) => {
            send_error(outbound, ErrorCode::Internal, e.to_string()).await;
            return;
        }
    }

    match registry.subscribe(&window) {
        Ok((events, seq, lines, cursor)) => {
            // Re-subscribing replaces the previous pump.
            if let Some(old) = subscriptions.remove(&window) {
                old.abort();
            }

            let _ = outbound
                .send(ServerMessage::Frame(FrameUpdate {
                    window: window.clone(),
                    seq,
                    lines,
                    cursor,
                }))
                .await;

            let pump = tokio::spawn(subscriber::run(
                Arc::clone(registry),
                window.clone(),
                events,
                seq,
                outbound.clone(),
                settings.coalesce,
            ));
            subscriptions.insert(window, pump);
        }
        Err(RuntimeError::AlreadyTerminated(_)) => {
            let (code, signal) = registry.exit_info(&window).unwrap_or((None, None));
            let _ = outbound
                .send(ServerMessage::WindowExit {
                    window,
                    code,
                    signal,
                })
                .await;
        }
        Err(_) => {
            send_error(
                outbound,
                ErrorCode::UnknownWindow,
                format!("no such window: {window}"),
            )
            .await;
        }
    }
}
