//! Stdio transport.
//!
//! Reads newline-delimited JSON-RPC messages from stdin and writes replies, plus any
//! server-initiated notifications, to stdout. The process has exactly one implicit
//! session, so there is no authentication and no session id.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcError, JsonRpcResponse};
use crate::server::McpServer;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info};

pub struct StdioTransport {
    server: McpServer,
}

impl StdioTransport {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    /// Serve stdin/stdout until stdin reaches EOF.
    pub async fn run(self) -> McpResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve an arbitrary reader/writer pair until the reader reaches EOF.
    ///
    /// Lines are handled one at a time: while a `tools/call` waits on upstream, later
    /// requests and pending notifications wait with it. Notifications still buffered at
    /// EOF are flushed before returning.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        let mut output = FramedWrite::new(writer, LinesCodec::new());
        let mut notifications = self.server.subscribe()?;

        info!("Stdio transport started, waiting for input");

        loop {
            tokio::select! {
                line = lines.next() => {
                    let Some(line) = line else {
                        info!("Stdin closed, shutting down");
                        break;
                    };
                    let line = line.map_err(codec_error)?;
                    if let Some(reply) = self.process_line(&line).await? {
                        debug!(output = %reply, "Sending response");
                        output.send(reply).await.map_err(codec_error)?;
                    }
                }
                Ok(notification) = notifications.recv() => {
                    output.send(notification).await.map_err(codec_error)?;
                }
            }
        }

        while let Ok(notification) = notifications.try_recv() {
            output.send(notification).await.map_err(codec_error)?;
        }

        // Ignore AlreadyClosed: the process is exiting either way.
        let _ = self.server.close();
        Ok(())
    }

    async fn process_line(&self, line: &str) -> McpResult<Option<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        debug!(input = %trimmed, "Received message");

        let reply = match serde_json::from_str::<Value>(trimmed) {
            Ok(message) => self.server.handle_message(message).await?,
            Err(e) => Some(serde_json::to_value(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::parse_error(e.to_string()),
            ))?),
        };

        reply
            .map(|value| serde_json::to_string(&value))
            .transpose()
            .map_err(McpError::from)
    }
}

fn codec_error(err: LinesCodecError) -> McpError {
    match err {
        LinesCodecError::Io(e) => McpError::Io(e),
        other => McpError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string())),
    }
}
