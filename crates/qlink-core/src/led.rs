//! Keypad LED bitmask decoding
//!
//! Stations report LEDs as two hex bitmasks: one for LEDs that are lit and
//! one for LEDs that are blinking. Bit `n - 1` of each mask belongs to
//! button `n`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CoreError, Result, BUTTONS_PER_STATION};

/// Indicator state of a single button LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedState {
    Off,
    On,
    Blink,
}

impl LedState {
    /// Brightness value reported to UI clients
    pub fn brightness(&self) -> u8 {
        match self {
            LedState::Off => 0,
            LedState::Blink => 128,
            LedState::On => 255,
        }
    }
}

/// Button number (1..=8) to LED state
pub type ButtonStates = BTreeMap<u8, LedState>;

fn parse_mask(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex.trim(), 16).ok()
}

/// Decode an (on, blink) hex pair into per-button states.
///
/// Blink wins over on. Invalid hex yields an empty map.
pub fn decode_led_hex(on_hex: &str, blink_hex: &str) -> ButtonStates {
    let (Some(on), Some(blink)) = (parse_mask(on_hex), parse_mask(blink_hex)) else {
        return ButtonStates::new();
    };

    (1..=BUTTONS_PER_STATION)
        .map(|button| {
            let bit = 1u32 << (button - 1);
            let state = if blink & bit != 0 {
                LedState::Blink
            } else if on & bit != 0 {
                LedState::On
            } else {
                LedState::Off
            };
            (button, state)
        })
        .collect()
}

/// Parsed LED status response for one station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedReport {
    /// Leading tag such as `RLT`, when the controller sent one
    pub tag: Option<String>,
    pub master: Option<u8>,
    pub station: Option<u32>,
    pub on_leds: String,
    pub blink_leds: String,
}

impl LedReport {
    /// Parse `<on> <blink>`, `<master> <station> <on> <blink>` or
    /// `<TAG> <master> <station> <on> <blink>`.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let malformed = || CoreError::MalformedLedResponse(line.to_string());

        let (tag, master, station, on, blink) = match parts.as_slice() {
            [on, blink] => (None, None, None, *on, *blink),
            [master, station, on, blink] => (None, Some(*master), Some(*station), *on, *blink),
            [tag, master, station, on, blink] => {
                (Some(*tag), Some(*master), Some(*station), *on, *blink)
            }
            _ => return Err(malformed()),
        };

        let master = master
            .map(|m| m.parse::<u8>().map_err(|_| malformed()))
            .transpose()?;
        let station = station
            .map(|s| s.parse::<u32>().map_err(|_| malformed()))
            .transpose()?;

        for hex in [on, blink] {
            if parse_mask(hex).is_none() {
                return Err(CoreError::InvalidHex(hex.to_string()));
            }
        }

        Ok(Self {
            tag: tag.map(str::to_string),
            master,
            station,
            on_leds: on.to_string(),
            blink_leds: blink.to_string(),
        })
    }

    pub fn button_states(&self) -> ButtonStates {
        decode_led_hex(&self.on_leds, &self.blink_leds)
    }

    /// Brightness per button, index 0 = button 1
    pub fn brightness(&self) -> [u8; BUTTONS_PER_STATION as usize] {
        let mut leds = [0u8; BUTTONS_PER_STATION as usize];
        for (button, state) in self.button_states() {
            leds[(button - 1) as usize] = state.brightness();
        }
        leds
    }
}
