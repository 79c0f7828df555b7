//! TCP request/response client
//!
//! The IP-Enabler handles one exchange at a time and starts refusing
//! connections when it sees several at once. Every call therefore opens
//! its own short-lived connection while holding a process-wide gate, so at
//! most one command socket to the controller exists at any moment.

use async_trait::async_trait;
use parking_lot::RwLock;
use qlink_core::{encode_command, LineDecoder, Terminator};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::retry::RetryPolicy;
use crate::traits::CommandSender;

/// Read buffer size for a single response
const READ_BUFFER_SIZE: usize = 4096;

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Per-call options that may change at runtime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientOptions {
    pub terminator: Terminator,
    /// Applies separately to connect and to the response read
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            terminator: Terminator::Cr,
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Serialized command client for one controller
pub struct QlinkClient {
    addr: String,
    options: RwLock<ClientOptions>,
    gate: Mutex<()>,
}

impl QlinkClient {
    pub fn new(addr: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            addr: addr.into(),
            options: RwLock::new(options),
            gate: Mutex::new(()),
        }
    }

    /// Controller address (`host:port`); fixed for the life of the client
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn options(&self) -> ClientOptions {
        *self.options.read()
    }

    /// Change options; takes effect from the next call
    pub fn update_options(&self, update: impl FnOnce(&mut ClientOptions)) {
        update(&mut self.options.write());
    }

    /// Send one command and return the first response line.
    ///
    /// A read timeout is not an error: the controller sometimes accepts a
    /// command without acknowledging it, so an empty string comes back.
    pub async fn send_command(&self, command: &str, timeout: Option<Duration>) -> Result<String> {
        let options = self.options();
        let timeout = timeout.unwrap_or(options.timeout);

        let _gate = self.gate.lock().await;
        let started = Instant::now();

        let result = options
            .retry
            .run(|_| exchange(&self.addr, command, options.terminator, timeout))
            .await;

        info!(
            cmd = command,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            ok = result.is_ok(),
            "controller exchange"
        );
        result
    }
}

#[async_trait]
impl CommandSender for QlinkClient {
    async fn send(&self, command: &str, timeout: Option<Duration>) -> Result<String> {
        self.send_command(command, timeout).await
    }

    fn reconfigure(&self, options: ClientOptions) {
        self.update_options(|current| *current = options);
    }
}

/// Open a connection, classifying failures the way the retry policy expects
pub(crate) async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Err(_) => Err(TransportError::Timeout(addr.to_string())),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(TransportError::ConnectionRefused(e.to_string()))
        }
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Ok(Ok(stream)) => Ok(stream),
    }
}

async fn exchange(
    addr: &str,
    command: &str,
    terminator: Terminator,
    timeout: Duration,
) -> Result<String> {
    let mut stream = connect(addr, timeout).await?;

    stream
        .write_all(&encode_command(command, terminator))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;

    read_line(&mut stream, terminator, timeout).await
}

/// Read until one complete line, EOF, or the deadline
async fn read_line(stream: &mut TcpStream, terminator: Terminator, timeout: Duration) -> Result<String> {
    let deadline = deadline_after(timeout);
    let mut decoder = LineDecoder::new(terminator);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) => {
                debug!("No response before timeout");
                return Ok(decoder.take_remainder().unwrap_or_default());
            }
            Ok(Ok(0)) => return Ok(decoder.take_remainder().unwrap_or_default()),
            Ok(Ok(n)) => {
                decoder.feed(&buf[..n]);
                if let Some(line) = decoder.next_line() {
                    return Ok(line);
                }
            }
            Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}

/// `now + timeout`, saturating instead of overflowing the clock
fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Connect-only reachability check against an arbitrary target.
///
/// Returns the time taken to connect.
pub async fn probe(target: &str, timeout: Duration) -> Result<Duration> {
    let started = Instant::now();
    let stream = connect(target, timeout).await?;
    drop(stream);
    Ok(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Accept connections forever, answering each with `reply`
    async fn spawn_responder(reply: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock.write_all(reply).await;
                });
            }
        });

        (addr, accepted)
    }

    async fn closed_port_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_send_returns_first_line() {
        let (addr, _) = spawn_responder(b"VGL 251 75\r").await;
        let client = QlinkClient::new(addr, ClientOptions::default());

        let resp = client.send_command("VGL@ 251", None).await.unwrap();
        assert_eq!(resp, "VGL 251 75");
    }

    #[tokio::test]
    async fn test_silent_controller_yields_empty_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = QlinkClient::new(addr, ClientOptions::default());
        let resp = client
            .send_command("VLO@ 1 50", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(resp, "");
    }

    #[tokio::test]
    async fn test_refused_exhausts_retries() {
        let addr = closed_port_addr().await;
        let client = QlinkClient::new(
            addr,
            ClientOptions {
                retry: RetryPolicy::new(2, Duration::from_millis(1)),
                ..Default::default()
            },
        );

        let err = client.send_command("VGL@ 1", None).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::MaxRetriesExceeded { attempts: 2, .. }
        ));
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_concurrent_callers_each_get_a_connection() {
        let (addr, accepted) = spawn_responder(b"OK\r").await;
        let client = Arc::new(QlinkClient::new(addr, ClientOptions::default()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.send_command(&format!("VGL@ {}", i), None).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "OK");
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let now = tokio::time::Instant::now();
        assert!(deadline_after(Duration::MAX) > now);

        let (addr, _) = spawn_responder(b"VGL 3 10\r").await;
        let client = QlinkClient::new(addr, ClientOptions::default());
        let resp = client
            .send_command("VGL@ 3", Some(Duration::from_secs_f64(1e19)))
            .await
            .unwrap();
        assert_eq!(resp, "VGL 3 10");
    }

    #[tokio::test]
    async fn test_update_options() {
        let client = QlinkClient::new("127.0.0.1:1", ClientOptions::default());
        client.update_options(|o| o.terminator = Terminator::Crlf);
        assert_eq!(client.options().terminator, Terminator::Crlf);
    }

    #[tokio::test]
    async fn test_probe() {
        let (addr, _) = spawn_responder(b"").await;
        assert!(probe(&addr, Duration::from_secs(1)).await.is_ok());

        let closed = closed_port_addr().await;
        assert!(probe(&closed, Duration::from_secs(1)).await.is_err());
    }
}
