//! Per-subscription delivery pump.
//!
//! One pump per (connection, window). It drains the window's broadcast
//! channel, batches patches within a bounded coalescing interval, and
//! forwards them to the connection's outbound queue. A subscriber that
//! lags its broadcast buffer, hits a sequence gap, or accumulates too many
//! pending patches is resynchronized with a fresh frame instead of ever
//! blocking the window's output pipeline.

use std::sync::Arc;
use std::time::Duration;

use protocol::{FrameUpdate, PatchUpdate, ServerMessage, WindowId};
use tokio::sync::{broadcast, mpsc};

use crate::runtime::{WindowEvent, WindowRegistry};

/// Patches buffered past this count are dropped in favor of a fresh frame.
pub const MAX_PENDING_PATCHES: usize = 64;

/// What the collection phase decided to deliver.
enum Flush {
    /// In-order messages to forward as-is.
    Deliver(Vec<ServerMessage>),
    /// Forward these messages (ending in the exit notice), then stop.
    DeliverAndStop(Vec<ServerMessage>),
    /// State is stale or incomplete; send a fresh snapshot instead.
    Resync,
    /// The window terminated.
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// Run one subscription until the window exits, the client goes away, or
/// the channel is torn down.
pub async fn run(
    registry: Arc<WindowRegistry>,
    window_id: WindowId,
    mut events: broadcast::Receiver<WindowEvent>,
    mut last_seq: u64,
    outbound: mpsc::Sender<ServerMessage>,
    coalesce: Duration,
) {
    loop {
        let first = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(window_id = %window_id, skipped, "subscriber lagged; resyncing");
                if !send_resync(&registry, &window_id, &mut last_seq, &outbound).await {
                    return;
                }
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let flush = collect(&window_id, first, &mut events, &mut last_seq, coalesce).await;
        match flush {
            Flush::Deliver(messages) => {
                for message in messages {
                    // Awaiting here applies per-connection backpressure: a
                    // slow socket makes this pump fall behind its own
                    // broadcast buffer, which triggers the lag path above.
                    if outbound.send(message).await.is_err() {
                        return;
                    }
                }
            }
            Flush::DeliverAndStop(messages) => {
                for message in messages {
                    let _ = outbound.send(message).await;
                }
                return;
            }
            Flush::Resync => {
                if !send_resync(&registry, &window_id, &mut last_seq, &outbound).await {
                    return;
                }
            }
            Flush::Exited { code, signal } => {
                let _ = outbound
                    .send(ServerMessage::WindowExit {
                        window: window_id.clone(),
                        code,
                        signal,
                    })
                    .await;
                return;
            }
        }
    }
}

/// Starting from `first`, batch everything that arrives within the
/// coalescing window, preserving per-window sequence order.
async fn collect(
    window_id: &WindowId,
    first: WindowEvent,
    events: &mut broadcast::Receiver<WindowEvent>,
    last_seq: &mut u64,
    coalesce: Duration,
) -> Flush {
    let mut batch: Vec<ServerMessage> = Vec::new();

    match append_event(window_id, first, &mut batch, last_seq) {
        Appended::Ok => {}
        Appended::Stale => return Flush::Deliver(Vec::new()),
        Appended::Gap => return Flush::Resync,
        Appended::Exited { code, signal } => return Flush::Exited { code, signal },
    }

    let deadline = tokio::time::sleep(coalesce);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => match append_event(window_id, event, &mut batch, last_seq) {
                    Appended::Ok => {
                        if batch.len() > MAX_PENDING_PATCHES {
                            return Flush::Resync;
                        }
                    }
                    Appended::Stale => {}
                    Appended::Gap => return Flush::Resync,
                    Appended::Exited { code, signal } => {
                        // Deliver what we have, then the exit notice.
                        batch.push(ServerMessage::WindowExit {
                            window: window_id.clone(),
                            code,
                            signal,
                        });
                        return Flush::DeliverAndStop(batch);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(_)) => return Flush::Resync,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    Flush::Deliver(batch)
}

enum Appended {
    Ok,
    Stale,
    Gap,
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

fn append_event(
    window_id: &WindowId,
    event: WindowEvent,
    batch: &mut Vec<ServerMessage>,
    last_seq: &mut u64,
) -> Appended {
    match event {
        WindowEvent::Patch {
            seq,
            line_count,
            ops,
        } => {
            if seq <= *last_seq {
                // Buffered before our subscription snapshot.
                return Appended::Stale;
            }
            if seq != *last_seq + 1 {
                return Appended::Gap;
            }
            *last_seq = seq;
            batch.push(ServerMessage::Patch(PatchUpdate {
                window: window_id.clone(),
                seq,
                line_count,
                ops,
            }));
            Appended::Ok
        }
        WindowEvent::Frame { seq, lines, cursor } => {
            if seq <= *last_seq {
                return Appended::Stale;
            }
            // A frame supersedes everything batched before it.
            batch.clear();
            *last_seq = seq;
            batch.push(ServerMessage::Frame(FrameUpdate {
                window: window_id.clone(),
                seq,
                lines,
                cursor,
            }));
            Appended::Ok
        }
        WindowEvent::Exited { code, signal } => Appended::Exited { code, signal },
    }
}

/// Push a fresh authoritative frame; returns false when the client or the
/// window is gone.
async fn send_resync(
    registry: &WindowRegistry,
    window_id: &WindowId,
    last_seq: &mut u64,
    outbound: &mpsc::Sender<ServerMessage>,
) -> bool {
    match registry.window(window_id) {
        Some(window) => {
            let (seq, lines, cursor) = window.snapshot();
            *last_seq = seq;
            outbound
                .send(ServerMessage::Frame(FrameUpdate {
                    window: window_id.clone(),
                    seq,
                    lines,
                    cursor,
                }))
                .await
                .is_ok()
        }
        None => {
            // Window archived under us; report its exit if known.
            let (code, signal) = registry.closed_exit(window_id).unwrap_or((None, None));
            let _ = outbound
                .send(ServerMessage::WindowExit {
                    window: window_id.clone(),
                    code,
                    signal,
                })
                .await;
            false
        }
    }
}
