//! Monitor loop
//!
//! Keeps LED and device state live in one of two ways, chosen once at
//! startup:
//!
//! - **events**: hold one persistent connection, enable monitoring with
//!   `VOS@`/`VOL@`/`VOD@` (each must be acknowledged), then decode every
//!   line and hand events to the hub. Disconnects back off with jitter
//!   (1 s doubling to 30 s) and the backoff resets after a good connect.
//! - **poll**: every interval, reload the station list and query each
//!   station's LEDs in ascending order. Per-station failures are counted
//!   and skipped; the cycle always runs to the end.
//!
//! A panic inside one session or cycle is logged and the loop carries on.

use futures::FutureExt;
use parking_lot::RwLock;
use qlink_core::{Command, Event};
use qlink_transport::{MonitorConnection, ReconnectBackoff, TransportError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::settings::MonitorMode;

/// Monitor state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Disconnected,
    Connecting,
    ActiveEvents,
    ActivePoll,
    /// Monitoring disabled by configuration
    Off,
}

/// Live flags and counters shared with the HTTP surface
#[derive(Debug, Default)]
pub struct MonitorStatus {
    state: RwLock<MonitorState>,
    connected: AtomicBool,
    monitoring: AtomicBool,
    events_seen: AtomicU64,
    polls_completed: AtomicU64,
    poll_errors: AtomicU64,
}

/// Point-in-time copy of [`MonitorStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub state: MonitorState,
    pub connected: bool,
    pub monitoring: bool,
    pub events_seen: u64,
    pub polls_completed: u64,
    pub poll_errors: u64,
}

impl MonitorStatus {
    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    pub fn set_state(&self, state: MonitorState) {
        *self.state.write() = state;
        let active = matches!(state, MonitorState::ActiveEvents | MonitorState::ActivePoll);
        self.monitoring.store(active, Ordering::Relaxed);
        if state == MonitorState::ActiveEvents {
            self.connected.store(true, Ordering::Relaxed);
        } else if state != MonitorState::ActivePoll {
            self.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    fn record_event(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// In poll mode "connected" means the last cycle reached at least one station
    fn record_poll_cycle(&self, any_succeeded: bool) {
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
        self.connected.store(any_succeeded, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            state: self.state(),
            connected: self.is_connected(),
            monitoring: self.is_monitoring(),
            events_seen: self.events_seen.load(Ordering::Relaxed),
            polls_completed: self.polls_completed.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

/// Start the monitor for the configured mode; `None` when monitoring is off
pub fn spawn(ctx: Arc<BridgeContext>) -> Option<JoinHandle<()>> {
    match ctx.settings().monitor_mode {
        MonitorMode::Off => {
            info!("Event monitoring disabled");
            ctx.status().set_state(MonitorState::Off);
            None
        }
        MonitorMode::Events => Some(tokio::spawn(run_events(ctx))),
        MonitorMode::Poll => Some(tokio::spawn(run_poll(ctx))),
    }
}

/// Event-stream monitor; runs until the task is dropped
pub async fn run_events(ctx: Arc<BridgeContext>) {
    let mut backoff = ReconnectBackoff::default();

    loop {
        let session = AssertUnwindSafe(events_session(&ctx, &mut backoff))
            .catch_unwind()
            .await;

        ctx.status().set_state(MonitorState::Disconnected);
        let delay = backoff.next_delay();
        match session {
            Ok(err) => warn!(
                "Event listener disconnected: {}; reconnecting in {:.1}s",
                err,
                delay.as_secs_f64()
            ),
            Err(_) => error!(
                "Event listener panicked; reconnecting in {:.1}s",
                delay.as_secs_f64()
            ),
        }
        tokio::time::sleep(delay).await;
    }
}

/// One connection's lifetime; returns the error that ended it
async fn events_session(ctx: &BridgeContext, backoff: &mut ReconnectBackoff) -> TransportError {
    let settings = ctx.settings();
    let addr = ctx.controller_addr();
    ctx.status().set_state(MonitorState::Connecting);

    let mut conn = match MonitorConnection::connect(addr, settings.terminator, settings.timeout).await
    {
        Ok(conn) => conn,
        Err(e) => return e,
    };

    for command in Command::monitoring_sequence() {
        if let Err(e) = conn.request(&command.to_string()).await {
            return e;
        }
    }

    backoff.reset();
    ctx.status().set_state(MonitorState::ActiveEvents);
    info!("Event monitoring enabled on {}", addr);

    loop {
        let line = match conn.next_line().await {
            Ok(line) => line,
            Err(e) => return e,
        };
        if let Some(event) = ctx.decoder().decode(&line) {
            debug!(kind = event.type_name(), raw = %event.raw, "event");
            ctx.status().record_event();
            ctx.hub().broadcast(&event);
        }
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Poll monitor; runs until the task is dropped
pub async fn run_poll(ctx: Arc<BridgeContext>) {
    info!("Polling LED state every {:?}", ctx.settings().poll_interval);

    loop {
        let interval = ctx.settings().poll_interval;

        let stations = match ctx.loads().await {
            Ok(config) => config.stations(),
            Err(e) => {
                warn!("Could not load station list: {}", e);
                BTreeSet::new()
            }
        };

        if stations.is_empty() {
            warn!("No stations to poll; retrying in {:?}", interval);
            ctx.status().set_state(MonitorState::Disconnected);
            tokio::time::sleep(interval).await;
            continue;
        }

        ctx.status().set_state(MonitorState::ActivePoll);
        match AssertUnwindSafe(poll_cycle(&ctx, &stations))
            .catch_unwind()
            .await
        {
            Ok(report) => info!(
                polled = report.polled.len(),
                failed = report.failed.len(),
                "Poll cycle complete"
            ),
            Err(_) => error!("Poll cycle panicked"),
        }

        tokio::time::sleep(interval).await;
    }
}

/// Query every station once, in ascending order.
///
/// Each success updates the store and broadcasts an `led_keypad` event with
/// source `poll`.
pub async fn poll_cycle(ctx: &BridgeContext, stations: &BTreeSet<u32>) -> PollReport {
    let delay = ctx.settings().station_delay;
    let mut report = PollReport::default();

    for (index, &station) in stations.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match ctx.query_leds(station).await {
            Ok(query) => {
                let event = Event::from_poll(query.address.master, station, &query.report, &query.raw);
                ctx.hub().broadcast(&event);
                report.polled.push(station);
            }
            Err(e) => {
                debug!(station, "LED poll failed: {}", e);
                ctx.status().record_poll_error();
                report.failed.push(station);
            }
        }
    }

    ctx.status().record_poll_cycle(!report.polled.is_empty());
    report
}
