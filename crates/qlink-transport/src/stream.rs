//! Persistent monitoring connection
//!
//! Unlike command exchanges, event monitoring keeps one socket open and
//! reads an unbounded stream of unsolicited lines.

use qlink_core::{encode_command, LineDecoder, Terminator};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::tcp::connect;

const READ_BUFFER_SIZE: usize = 4096;

/// Long-lived line-oriented connection to the controller
pub struct MonitorConnection {
    stream: TcpStream,
    decoder: LineDecoder,
    timeout: Duration,
}

impl MonitorConnection {
    /// Connect with the given connect/acknowledge timeout
    pub async fn connect(addr: &str, terminator: Terminator, timeout: Duration) -> Result<Self> {
        info!("Connecting event listener to {}", addr);
        let stream = connect(addr, timeout).await?;
        Ok(Self {
            stream,
            decoder: LineDecoder::new(terminator),
            timeout,
        })
    }

    /// Write one command line
    pub async fn send(&mut self, command: &str) -> Result<()> {
        let frame = encode_command(command, self.decoder.terminator());
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a command and wait for its single acknowledgement line
    pub async fn request(&mut self, command: &str) -> Result<String> {
        self.send(command).await?;
        match tokio::time::timeout(self.timeout, self.next_line()).await {
            Ok(result) => {
                let ack = result?;
                debug!(cmd = command, ack = %ack, "acknowledged");
                Ok(ack)
            }
            Err(_) => Err(TransportError::Timeout(format!("acknowledgement of {}", command))),
        }
    }

    /// Wait for the next complete non-empty line; no timeout
    pub async fn next_line(&mut self) -> Result<String> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(line) = self.decoder.next_line() {
                return Ok(line);
            }
            let n = self
                .stream
                .read(&mut buf)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            self.decoder.feed(&buf[..n]);
        }
    }
}
