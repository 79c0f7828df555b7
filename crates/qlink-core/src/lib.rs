//! QLink Core
//!
//! Core types and protocol primitives for the Vantage QLink ASCII protocol.
//!
//! This crate provides:
//! - Outbound commands and level clamping ([`Command`], [`Level`])
//! - Line framing with a configurable terminator ([`codec`], [`Terminator`])
//! - LED bitmask decoding ([`led`])
//! - Event line decoding ([`Event`], [`Decoder`])
//! - The per-station LED state store ([`LedStore`])

pub mod codec;
pub mod error;
pub mod event;
pub mod led;
pub mod state;
pub mod types;

pub use codec::{encode_command, LineDecoder, Terminator};
pub use error::{CoreError, Result};
pub use event::{decode_line, Decoder, Event, EventKind, EventSource};
pub use led::{decode_led_hex, ButtonStates, LedReport, LedState};
pub use state::LedStore;
pub use types::{ButtonAction, Command, Level, Switch};

/// Default controller TCP port for the IP-Enabler
pub const DEFAULT_CONTROLLER_PORT: u16 = 3041;

/// Number of buttons reported per keypad station
pub const BUTTONS_PER_STATION: u8 = 8;
