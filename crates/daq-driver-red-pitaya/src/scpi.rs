//! SCPI over TCP transport for Red Pitaya boards.
//!
//! The board runs a line-oriented SCPI server (default port 5000). Commands
//! are terminated with `\r\n`; every query yields exactly one response line.
//!
//! [`ScpiOps`] is the seam between the transport and
//! [`ScpiRedPitaya`](crate::ScpiRedPitaya), so the command mapping can be
//! exercised against a scripted transport without a board on the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default SCPI port for Red Pitaya
pub const DEFAULT_PORT: u16 = 5000;

/// Default per-query timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Pause after each write so the SCPI server can apply the setting.
const WRITE_SETTLE: Duration = Duration::from_millis(10);

/// Line-level SCPI operations used by the real backend.
#[async_trait]
pub trait ScpiOps: Send + Sync {
    /// Send a command that produces no response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return its trimmed response line.
    async fn query(&self, query: &str) -> Result<String>;

    /// Release the connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Async SCPI client for TCP communication with Red Pitaya
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
}

impl ScpiClient {
    /// Connect to `host:port`, giving up after `connect_timeout`.
    ///
    /// `host` may be an IP address or a resolvable hostname.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("Connection timeout to {}:{}", host, port))?
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!(host, port, "Connected to Red Pitaya SCPI server");

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Set the per-query timeout.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// Send a command without expecting a response.
    pub async fn write(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;

        tracing::debug!(command, "SCPI write");
        Self::send_line(&mut stream, command)
            .await
            .with_context(|| format!("Failed to write command: {}", command))?;

        tokio::time::sleep(WRITE_SETTLE).await;
        Ok(())
    }

    /// Send a query and read the response line.
    pub async fn query(&self, query: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;

        // A previous timed-out query may have left its answer behind.
        Self::flush_input_buffer(&mut stream).await?;

        tracing::debug!(query, "SCPI query");
        Self::send_line(&mut stream, query)
            .await
            .with_context(|| format!("Failed to write query: {}", query))?;

        let mut response = String::new();
        let result = timeout(self.timeout, stream.read_line(&mut response)).await;

        match result {
            Ok(Ok(0)) => anyhow::bail!("Connection closed by device"),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::trace!(query, len = trimmed.len(), "SCPI response");
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).context("Failed to read response"),
            Err(_) => anyhow::bail!("Timeout waiting for response to: {}", query),
        }
    }

    /// Shut down the write half of the socket.
    pub async fn close(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .get_mut()
            .shutdown()
            .await
            .context("Failed to close SCPI connection")
    }

    async fn send_line(stream: &mut BufReader<TcpStream>, line: &str) -> Result<()> {
        let cmd = format!("{}\r\n", line);
        stream.get_mut().write_all(cmd.as_bytes()).await?;
        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) -> Result<()> {
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!(bytes = buffered, "Flushing buffered SCPI input");
            stream.consume(buffered);
        }

        let mut discard = vec![0u8; 256];
        loop {
            match timeout(
                Duration::from_millis(10),
                stream.get_mut().peek(&mut discard),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) | Ok(Err(_)) => break,
                Ok(Ok(n)) => {
                    let mut consume_buf = vec![0u8; n];
                    let _ = stream.get_mut().try_read(&mut consume_buf);
                    tracing::debug!(bytes = n, "Flushed stale SCPI bytes");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ScpiOps for ScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        ScpiClient::write(self, command).await
    }

    async fn query(&self, query: &str) -> Result<String> {
        ScpiClient::query(self, query).await
    }

    async fn close(&self) -> Result<()> {
        ScpiClient::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_query_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line, "*IDN?\r\n");
            reader
                .get_mut()
                .write_all(b"Red Pitaya,STEMlab 125-14,1234,2.00\r\n")
                .await
                .unwrap();
            // Drain until the client closes.
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest).await;
        });

        let client = ScpiClient::connect("127.0.0.1", addr.port(), Duration::from_secs(1))
            .await
            .unwrap();
        let idn = client.query("*IDN?").await.unwrap();
        assert_eq!(idn, "Red Pitaya,STEMlab 125-14,1234,2.00");
        client.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_has_context() {
        // Port 1 on loopback is not expected to have a listener.
        let err = ScpiClient::connect("127.0.0.1", 1, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("127.0.0.1:1"));
    }
}
