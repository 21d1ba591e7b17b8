//! Synchronous control client.
//!
//! Speaks the newline-delimited JSON control protocol in a strict
//! request/response pattern. This is the polling fallback surface: it
//! works even when the streaming channel is down.

use std::path::Path;
use std::time::Duration;

use protocol::{ControlRequest, ControlResponse, WindowId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::ClientError;

/// Default timeout for a control round trip.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to the daemon's control socket.
pub struct ControlClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
}

impl ControlClient {
    /// Connect to the control socket. Failure usually means the daemon is
    /// not running.
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// One request, one response.
    pub async fn send(&mut self, request: ControlRequest) -> Result<ControlResponse, ClientError> {
        tokio::time::timeout(self.timeout, self.send_inner(request))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn send_inner(
        &mut self,
        request: ControlRequest,
    ) -> Result<ControlResponse, ClientError> {
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    pub async fn ping(&mut self) -> Result<bool, ClientError> {
        Ok(matches!(
            self.send(ControlRequest::Ping).await?,
            ControlResponse::Pong
        ))
    }

    pub async fn status(&mut self) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::Status).await
    }

    pub async fn list_windows(&mut self) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::ListWindows).await
    }

    pub async fn focus(&mut self, window: WindowId) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::Focus { window }).await
    }

    /// Send text input; `submit` appends a carriage return.
    pub async fn send_input(
        &mut self,
        window: WindowId,
        text: String,
        submit: bool,
    ) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::SendInput {
            window,
            text,
            submit,
        })
        .await
    }

    /// Poll raw output from `offset`; pass the returned `next_offset` back
    /// in on the next call.
    pub async fn buffer_since(
        &mut self,
        window: WindowId,
        offset: u64,
    ) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::BufferSince { window, offset })
            .await
    }

    pub async fn start_window(
        &mut self,
        session: String,
        window: String,
        command: Vec<String>,
        env: Vec<(String, String)>,
        cwd: Option<String>,
    ) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::StartWindow {
            session,
            window,
            command,
            env,
            cwd,
        })
        .await
    }

    pub async fn stop_window(&mut self, window: WindowId) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::StopWindow { window }).await
    }

    pub async fn shutdown(&mut self) -> Result<ControlResponse, ClientError> {
        self.send(ControlRequest::Shutdown).await
    }
}
