//! Event line decoding
//!
//! In monitoring mode the controller emits unsolicited lines whose first
//! token selects the message type:
//!
//! | Tag  | Fields                                            |
//! |------|---------------------------------------------------|
//! | `SW` | master station button state [serial]              |
//! | `LO` | master enclosure module load level                |
//! | `LS` | master station load level                         |
//! | `LV` | master variable level                             |
//! | `LE` | master station on_hex blink_hex                   |
//! | `LC` | master station button state                       |
//!
//! `ROD`/`ROL`/`ROS` acknowledge the monitoring-enable commands and bare
//! single-digit lines are handshake noise; both decode to nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::led::{decode_led_hex, ButtonStates, LedReport, LedState};
use crate::state::LedStore;
use crate::types::ButtonAction;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Unsolicited line on the monitoring connection
    Events,
    /// Synthesized from an LED poll response
    Poll,
}

/// Kind-specific event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Button {
        master: u8,
        station: u32,
        button: u8,
        state: ButtonAction,
        serial: Option<String>,
    },
    LoadModule {
        master: u8,
        enclosure: u32,
        module: u32,
        load: u32,
        level: i32,
    },
    LoadStation {
        master: u8,
        station: u32,
        load: u32,
        level: i32,
    },
    LoadVariable {
        master: u8,
        variable: u32,
        level: i32,
    },
    LedKeypad {
        master: u8,
        station: u32,
        on_leds: String,
        blink_leds: String,
        button_states: ButtonStates,
    },
    LedLcd {
        master: u8,
        station: u32,
        button: u8,
        state: LedState,
    },
    Unknown,
}

/// A decoded controller event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
}

impl Event {
    fn new(kind: EventKind, raw: &str, source: EventSource) -> Self {
        Self {
            kind,
            raw: raw.to_string(),
            timestamp: Utc::now(),
            source,
        }
    }

    /// Build an `led_keypad` event from a poll response
    pub fn from_poll(master: u8, station: u32, report: &LedReport, raw: &str) -> Self {
        Self::new(
            EventKind::LedKeypad {
                master,
                station,
                on_leds: report.on_leds.clone(),
                blink_leds: report.blink_leds.clone(),
                button_states: report.button_states(),
            },
            raw,
            EventSource::Poll,
        )
    }

    /// Station the event refers to, if any
    pub fn station(&self) -> Option<u32> {
        match &self.kind {
            EventKind::Button { station, .. }
            | EventKind::LoadStation { station, .. }
            | EventKind::LedKeypad { station, .. }
            | EventKind::LedLcd { station, .. } => Some(*station),
            _ => None,
        }
    }

    /// Lowercase type tag as used on the wire to subscribers
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::Button { .. } => "button",
            EventKind::LoadModule { .. } => "load_module",
            EventKind::LoadStation { .. } => "load_station",
            EventKind::LoadVariable { .. } => "load_variable",
            EventKind::LedKeypad { .. } => "led_keypad",
            EventKind::LedLcd { .. } => "led_lcd",
            EventKind::Unknown => "unknown",
        }
    }
}

/// Monitoring-enable acknowledgements
const ACK_TAGS: [&str; 3] = ["ROD", "ROL", "ROS"];

const KNOWN_TAGS: [&str; 6] = ["SW", "LO", "LS", "LV", "LE", "LC"];

fn field<T: FromStr>(parts: &[&str], index: usize) -> Option<T> {
    parts.get(index)?.parse().ok()
}

fn is_handshake(token: &str) -> bool {
    token.len() == 1 && token.as_bytes()[0].is_ascii_digit()
}

/// Decode one controller line.
///
/// Never fails: malformed lines and suppressed acknowledgements return `None`.
pub fn decode_line(line: &str) -> Option<Event> {
    let line = line.trim();
    let parts: Vec<&str> = line.split_whitespace().collect();
    let tag = *parts.first()?;

    if ACK_TAGS.contains(&tag) || is_handshake(tag) {
        return None;
    }

    if !KNOWN_TAGS.contains(&tag) {
        warn!("Unknown event: {}", line);
        return Some(Event::new(EventKind::Unknown, line, EventSource::Events));
    }

    match parse_known(tag, &parts) {
        Some(kind) => Some(Event::new(kind, line, EventSource::Events)),
        None => {
            debug!("Failed to parse event {:?}", line);
            None
        }
    }
}

fn parse_known(tag: &str, parts: &[&str]) -> Option<EventKind> {
    match (tag, parts.len()) {
        ("SW", _) => parse_button(parts),
        ("LO", 6) => Some(EventKind::LoadModule {
            master: field(parts, 1)?,
            enclosure: field(parts, 2)?,
            module: field(parts, 3)?,
            load: field(parts, 4)?,
            level: field(parts, 5)?,
        }),
        ("LS", 5) => Some(EventKind::LoadStation {
            master: field(parts, 1)?,
            station: field(parts, 2)?,
            load: field(parts, 3)?,
            level: field(parts, 4)?,
        }),
        ("LV", 4) => Some(EventKind::LoadVariable {
            master: field(parts, 1)?,
            variable: field(parts, 2)?,
            level: field(parts, 3)?,
        }),
        ("LE", _) => parse_led_keypad(parts),
        ("LC", 5) => Some(EventKind::LedLcd {
            master: field(parts, 1)?,
            station: field(parts, 2)?,
            button: field(parts, 3)?,
            state: if parts[4] == "1" {
                LedState::On
            } else {
                LedState::Off
            },
        }),
        _ => None,
    }
}

fn parse_button(parts: &[&str]) -> Option<EventKind> {
    if !(5..=6).contains(&parts.len()) {
        return None;
    }
    Some(EventKind::Button {
        master: field(parts, 1)?,
        station: field(parts, 2)?,
        button: field(parts, 3)?,
        state: if parts[4] == "1" {
            ButtonAction::Pressed
        } else {
            ButtonAction::Released
        },
        serial: parts.get(5).map(|s| s.to_string()),
    })
}

fn parse_led_keypad(parts: &[&str]) -> Option<EventKind> {
    if parts.len() != 5 {
        return None;
    }
    let button_states = decode_led_hex(parts[3], parts[4]);
    if button_states.is_empty() {
        return None;
    }
    Some(EventKind::LedKeypad {
        master: field(parts, 1)?,
        station: field(parts, 2)?,
        on_leds: parts[3].to_string(),
        blink_leds: parts[4].to_string(),
        button_states,
    })
}

/// Decoder bound to the LED store.
///
/// LED events update the store before they are handed back, so the store
/// and anything downstream of the event always agree.
#[derive(Debug, Clone)]
pub struct Decoder {
    store: Arc<LedStore>,
}

impl Decoder {
    pub fn new(store: Arc<LedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LedStore> {
        &self.store
    }

    pub fn decode(&self, line: &str) -> Option<Event> {
        let event = decode_line(line)?;
        self.apply(&event);
        Some(event)
    }

    /// Record any LED state carried by `event`
    pub fn apply(&self, event: &Event) {
        match &event.kind {
            EventKind::LedKeypad {
                station,
                button_states,
                ..
            } => self.store.update(*station, button_states),
            EventKind::LedLcd {
                station,
                button,
                state,
                ..
            } => self.store.set_button(*station, *button, *state),
            _ => {}
        }
    }
}
