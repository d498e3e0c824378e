//! Raw-socket SCPI session.
//!
//! Most LXI instruments accept SCPI over a plain TCP socket (port 5025). Commands
//! are written with a line terminator and query responses are read up to the
//! response delimiter. Reads block until the delimiter arrives.

use super::{ScpiSession, SessionStatus};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Builder for [`TcpScpiSession`].
///
/// # Example
/// ```no_run
/// use vco_bench::instrument::tcp::TcpScpiSessionBuilder;
///
/// let session = TcpScpiSessionBuilder::new("192.168.0.20:5025")
///     .with_line_terminator("\r\n")
///     .build();
/// ```
pub struct TcpScpiSessionBuilder {
    address: String,
    line_terminator: String,
    response_delimiter: u8,
}

impl TcpScpiSessionBuilder {
    /// Builder for `address` (`host:port`).
    ///
    /// Defaults: line terminator `"\n"`, response delimiter `'\n'`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            line_terminator: "\n".to_string(),
            response_delimiter: b'\n',
        }
    }

    /// Terminator appended to every command.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Byte that ends a query response.
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Build an unconnected session.
    pub fn build(self) -> TcpScpiSession {
        TcpScpiSession {
            address: self.address,
            line_terminator: self.line_terminator,
            response_delimiter: self.response_delimiter,
            stream: Arc::new(Mutex::new(None)),
        }
    }
}

/// SCPI over a TCP socket.
#[derive(Clone)]
pub struct TcpScpiSession {
    address: String,
    line_terminator: String,
    response_delimiter: u8,
    stream: Arc<Mutex<Option<BufReader<TcpStream>>>>,
}

impl TcpScpiSession {
    /// Session with default framing.
    pub fn new(address: impl Into<String>) -> Self {
        TcpScpiSessionBuilder::new(address).build()
    }

    /// Open the socket. Reconnects if already open.
    pub async fn connect(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to {}", self.address))?;
        info!(address = %self.address, "SCPI socket connected");
        *self.stream.lock().await = Some(BufReader::new(stream));
        Ok(())
    }

    /// Close the socket.
    pub async fn disconnect(&self) {
        if self.stream.lock().await.take().is_some() {
            info!(address = %self.address, "SCPI socket closed");
        }
    }

    /// Address this session talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn write_line(stream: &mut BufReader<TcpStream>, command: &str, terminator: &str) -> Result<()> {
        let inner = stream.get_mut();
        inner.write_all(command.as_bytes()).await?;
        inner.write_all(terminator.as_bytes()).await?;
        inner.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ScpiSession for TcpScpiSession {
    async fn send(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to {}", self.address))?;
        debug!(address = %self.address, command, "send");
        Self::write_line(stream, command, &self.line_terminator)
            .await
            .with_context(|| format!("Write to {} failed", self.address))
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to {}", self.address))?;
        Self::write_line(stream, command, &self.line_terminator)
            .await
            .with_context(|| format!("Write to {} failed", self.address))?;

        let mut buf = Vec::new();
        let read = stream
            .read_until(self.response_delimiter, &mut buf)
            .await
            .with_context(|| format!("Read from {} failed", self.address))?;
        if read == 0 {
            return Err(anyhow!("Connection to {} closed", self.address));
        }
        let response = String::from_utf8_lossy(&buf).trim().to_string();
        debug!(address = %self.address, command, response = %response, "query");
        Ok(response)
    }

    async fn status(&self) -> SessionStatus {
        if self.stream.lock().await.is_some() {
            SessionStatus::online("tcp", self.address.clone(), "socket open")
        } else {
            SessionStatus::offline("tcp", self.address.clone(), "not connected")
        }
    }
}
