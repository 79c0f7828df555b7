//! Common test helpers and utilities for QLink tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A mock controller speaking the ASCII line protocol over TCP
//! - A fake [`CommandSender`] for exercising callers without sockets

use async_trait::async_trait;
use parking_lot::Mutex;
use qlink_core::{LineDecoder, Terminator};
use qlink_transport::{ClientOptions, CommandSender, Result as TransportResult, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
    }
    check()
}

// ============================================================================
// Mock Controller
// ============================================================================

type ReplyFn = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Out-of-band instruction for every open mock connection
#[derive(Debug, Clone)]
enum Push {
    Line(String),
    Close,
}

fn no_hook() -> Arc<ReplyFn> {
    Arc::new(|_: &str| None)
}

#[derive(Default)]
struct MockState {
    commands: Vec<String>,
    levels: HashMap<u32, i64>,
    overrides: HashMap<String, Option<String>>,
    connections: usize,
}

/// In-process stand-in for the IP-Enabler.
///
/// Replies to `VLO`/`VLO@` and `VGL@` by tracking load levels, acknowledges
/// the monitoring-enable commands with `ROS`/`ROL`/`ROD`, and answers
/// anything else with `OK`. Individual commands can be overridden with a
/// canned reply or silenced.
pub struct MockController {
    addr: String,
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<Push>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockController {
    pub async fn start() -> Self {
        Self::start_with(no_hook()).await
    }

    /// Start on a specific port, e.g. one reserved with [`find_available_port`]
    /// so that earlier connection attempts were refused
    pub async fn start_on(port: u16) -> Self {
        Self::bind(&format!("127.0.0.1:{}", port), no_hook()).await
    }

    /// Start with a custom reply hook consulted before the built-in replies
    pub async fn start_with(hook: Arc<ReplyFn>) -> Self {
        Self::bind("127.0.0.1:0", hook).await
    }

    async fn bind(addr: &str, hook: Arc<ReplyFn>) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(MockState::default()));
        let (events, _) = broadcast::channel(64);

        let accept_state = state.clone();
        let accept_events = events.clone();
        let handle = tokio::spawn(async move {
            while let Ok((sock, peer)) = listener.accept().await {
                debug!("Mock controller accepted {}", peer);
                accept_state.lock().connections += 1;
                tokio::spawn(serve_connection(
                    sock,
                    accept_state.clone(),
                    hook.clone(),
                    accept_events.subscribe(),
                ));
            }
        });

        Self {
            addr,
            state,
            events,
            handle,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Every command line received, in arrival order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Number of TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Answer `command` with `reply` instead of the built-in response
    pub fn reply(&self, command: &str, reply: &str) {
        self.state
            .lock()
            .overrides
            .insert(command.to_string(), Some(reply.to_string()));
    }

    /// Never answer `command`
    pub fn silence(&self, command: &str) {
        self.state.lock().overrides.insert(command.to_string(), None);
    }

    /// Push an unsolicited event line to every open connection
    pub fn push_event(&self, line: &str) {
        let _ = self.events.send(Push::Line(line.to_string()));
    }

    /// Close every open connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        let _ = self.events.send(Push::Close);
    }

    /// Stop accepting new connections
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut sock: TcpStream,
    state: Arc<Mutex<MockState>>,
    hook: Arc<ReplyFn>,
    mut events: broadcast::Receiver<Push>,
) {
    let mut decoder = LineDecoder::new(Terminator::Cr);
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            read = sock.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.feed(&buf[..n]);
                while let Some(line) = decoder.next_line() {
                    let reply = reply_for(&state, hook.as_ref(), &line);
                    if let Some(reply) = reply {
                        if sock.write_all(format!("{}\r", reply).as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Ok(Push::Line(line)) => {
                    if sock.write_all(format!("{}\r", line).as_bytes()).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Close) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Overrides first, then the hook, then the built-in behaviour
fn reply_for(state: &Mutex<MockState>, hook: &ReplyFn, line: &str) -> Option<String> {
    let mut state = state.lock();
    state.commands.push(line.to_string());

    if let Some(reply) = state.overrides.get(line) {
        return reply.clone();
    }
    if let Some(reply) = hook(line) {
        return Some(reply);
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let reply = match parts.as_slice() {
        ["VLO@" | "VLO", id, level, ..] => match (id.parse::<u32>(), level.parse::<i64>()) {
            (Ok(id), Ok(level)) => {
                state.levels.insert(id, level);
                format!("VLO {} {}", id, level)
            }
            _ => "ERR".to_string(),
        },
        ["VGL@", id] => match id.parse::<u32>() {
            Ok(id) => format!("VGL {} {}", id, state.levels.get(&id).copied().unwrap_or(0)),
            Err(_) => "ERR".to_string(),
        },
        ["VOS@", ..] => "ROS".to_string(),
        ["VOL@", ..] => "ROL".to_string(),
        ["VOD@", ..] => "ROD".to_string(),
        _ => "OK".to_string(),
    };
    Some(reply)
}

// ============================================================================
// Fake Command Sender
// ============================================================================

type Responder = dyn Fn(&str) -> TransportResult<String> + Send + Sync;

/// Records every command and answers from a closure
pub struct FakeSender {
    sent: Mutex<Vec<String>>,
    options: Mutex<Option<ClientOptions>>,
    responder: Box<Responder>,
}

impl FakeSender {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> TransportResult<String> + Send + Sync + 'static,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            options: Mutex::new(None),
            responder: Box::new(responder),
        }
    }

    /// Always answer `reply`
    pub fn replying(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Always fail with a timeout
    pub fn timing_out() -> Self {
        Self::new(|_| Err(TransportError::Timeout("fake controller".into())))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Options from the most recent `reconfigure`, if any
    pub fn last_options(&self) -> Option<ClientOptions> {
        *self.options.lock()
    }
}

#[async_trait]
impl CommandSender for FakeSender {
    async fn send(&self, command: &str, _timeout: Option<Duration>) -> TransportResult<String> {
        self.sent.lock().push(command.to_string());
        (self.responder)(command)
    }

    fn reconfigure(&self, options: ClientOptions) {
        *self.options.lock() = Some(options);
    }
}
