//! Reconnecting stream connection.
//!
//! [`StreamClient`] owns a background task that keeps one connection to
//! the daemon's stream socket alive: it performs the hello handshake,
//! replays subscriptions after every reconnect, forwards commands, and
//! surfaces server pushes as [`StreamEvent`]s. The embedding front end
//! holds one [`ScreenModel`] per window and must invalidate it on
//! `Disconnected` so stale patches are never applied.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use protocol::{framing, ClientMessage, ErrorCode, ServerMessage, WindowId, PROTOCOL_VERSION};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ClientError;

/// Reconnect policy: exponential backoff between these bounds.
const RECONNECT_MIN: Duration = Duration::from_millis(250);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

/// Capacity of the event channel toward the front end.
const EVENT_QUEUE: usize = 256;

/// Events surfaced to the embedding front end.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Connection (re-)established; subscriptions have been replayed and
    /// fresh frames are on the way.
    Connected,
    /// Connection lost; invalidate all screen models and wait.
    Disconnected,
    /// A server push for a subscribed window.
    Message(ServerMessage),
}

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Close,
}

/// Handle to the background connection task.
pub struct StreamClient {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl StreamClient {
    /// Start the connection task against the given stream socket. Returns
    /// the handle and the event stream.
    pub fn spawn(socket_path: PathBuf) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let task = tokio::spawn(connection_task(socket_path, commands_rx, events_tx));
        (
            Self {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    /// Subscribe to a window at the given geometry. Tracked across
    /// reconnects; the server answers each (re)subscription with a frame.
    pub async fn subscribe(
        &self,
        window: WindowId,
        cols: u16,
        rows: u16,
    ) -> Result<(), ClientError> {
        self.send(ClientMessage::Subscribe { window, cols, rows })
            .await
    }

    /// Mark the client's active window.
    pub async fn focus(&self, window: WindowId) -> Result<(), ClientError> {
        self.send(ClientMessage::Focus { window }).await
    }

    /// Send raw keystrokes to a window.
    pub async fn input(&self, window: WindowId, bytes: Vec<u8>) -> Result<(), ClientError> {
        self.send(ClientMessage::Input { window, bytes }).await
    }

    /// Resize a window.
    pub async fn resize(&self, window: WindowId, cols: u16, rows: u16) -> Result<(), ClientError> {
        self.send(ClientMessage::Resize { window, cols, rows })
            .await
    }

    async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.commands
            .send(Command::Send(message))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Tear down the connection task.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close).await;
        let _ = self.task.await;
    }
}

async fn connection_task(
    socket_path: PathBuf,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<StreamEvent>,
) {
    let mut subscriptions: HashMap<WindowId, (u16, u16)> = HashMap::new();
    let mut backoff = RECONNECT_MIN;

    loop {
        let stream = match UnixStream::connect(&socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "stream connect failed; backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    cmd = commands.recv() => {
                        match cmd {
                            // Track intent while disconnected.
                            Some(Command::Send(message)) => {
                                track_subscription(&mut subscriptions, &message);
                                continue;
                            }
                            Some(Command::Close) | None => return,
                        }
                    }
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        };
        backoff = RECONNECT_MIN;

        match serve_connection(stream, &mut commands, &events, &mut subscriptions).await {
            ServeOutcome::Closed => return,
            ServeOutcome::Lost => {
                if events.send(StreamEvent::Disconnected).await.is_err() {
                    return;
                }
            }
        }
    }
}

enum ServeOutcome {
    /// Close requested or front end dropped.
    Closed,
    /// Transport failed; reconnect.
    Lost,
}

fn track_subscription(subscriptions: &mut HashMap<WindowId, (u16, u16)>, message: &ClientMessage) {
    match message {
        ClientMessage::Subscribe { window, cols, rows }
        | ClientMessage::Resize { window, cols, rows } => {
            if matches!(message, ClientMessage::Subscribe { .. })
                || subscriptions.contains_key(window)
            {
                subscriptions.insert(window.clone(), (*cols, *rows));
            }
        }
        _ => {}
    }
}

async fn serve_connection(
    stream: UnixStream,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::Sender<StreamEvent>,
    subscriptions: &mut HashMap<WindowId, (u16, u16)>,
) -> ServeOutcome {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Handshake, then replay subscriptions; the server answers each with a
    // fresh frame, which is exactly what a reconnecting model needs.
    let hello = ClientMessage::Hello {
        version: PROTOCOL_VERSION,
    };
    if write_message(&mut writer, &hello).await.is_err() {
        return ServeOutcome::Lost;
    }
    for (window, (cols, rows)) in subscriptions.iter() {
        let subscribe = ClientMessage::Subscribe {
            window: window.clone(),
            cols: *cols,
            rows: *rows,
        };
        if write_message(&mut writer, &subscribe).await.is_err() {
            return ServeOutcome::Lost;
        }
    }
    if events.send(StreamEvent::Connected).await.is_err() {
        return ServeOutcome::Closed;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    track_subscription(subscriptions, &message);
                    if write_message(&mut writer, &message).await.is_err() {
                        return ServeOutcome::Lost;
                    }
                }
                Some(Command::Close) | None => return ServeOutcome::Closed,
            },
            frame = framing::read_frame(&mut reader) => match frame {
                Ok(Some(payload)) => match ServerMessage::from_bytes(&payload) {
                    Ok(message) => {
                        if let ServerMessage::Error { code: ErrorCode::VersionMismatch, ref message } = message {
                            tracing::error!(%message, "daemon rejected protocol version");
                        }
                        if events.send(StreamEvent::Message(message)).await.is_err() {
                            return ServeOutcome::Closed;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable server message");
                    }
                },
                Ok(None) => return ServeOutcome::Lost,
                Err(e) => {
                    tracing::debug!(error = %e, "stream read failed");
                    return ServeOutcome::Lost;
                }
            },
        }
    }
}

async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ClientMessage,
) -> Result<(), protocol::ProtocolError> {
    let payload = message.to_bytes()?;
    framing::write_frame(writer, &payload).await
}
