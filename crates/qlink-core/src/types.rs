//! QLink command and value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Device brightness level, always within 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Level(u8);

impl Level {
    pub const OFF: Level = Level(0);
    pub const FULL: Level = Level(100);

    /// Clamp any caller-supplied value into 0..=100
    pub fn clamped(value: i64) -> Self {
        Level(value.clamp(0, 100) as u8)
    }

    /// Clamp a fractional or out-of-`i64`-range value; fractions truncate
    pub fn clamped_f64(value: f64) -> Self {
        if value.is_nan() {
            return Level::OFF;
        }
        Level(value.clamp(0.0, 100.0) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On/off switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn level(&self) -> Level {
        match self {
            Switch::On => Level::FULL,
            Switch::Off => Level::OFF,
        }
    }
}

impl FromStr for Switch {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            _ => Err(CoreError::InvalidSwitch(s.to_string())),
        }
    }
}

/// Button press/release as reported by `SW` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Pressed,
    Released,
}

/// `VSW@` state argument that simulates a press
const SIMULATE_PRESS: u8 = 4;

/// Outbound controller command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set a load level, optionally with a fade time in seconds
    SetLevel {
        load: u32,
        level: Level,
        fade: Option<String>,
    },
    /// Query a load level
    GetLevel { load: u32 },
    /// Simulate a button press on a station
    PressButton { master: u8, station: u32, button: u8 },
    /// Query the LED bitmasks of a keypad station
    LedStatus { master: u8, station: u32 },
    /// Report button presses (with serial numbers)
    EnableButtonMonitoring,
    /// Report load level changes
    EnableLoadMonitoring,
    /// Report LED changes of all station types
    EnableLedMonitoring,
    /// Passthrough text
    Raw(String),
}

impl Command {
    /// Monitoring-enable sequence sent on every event-stream connect
    pub fn monitoring_sequence() -> [Command; 3] {
        [
            Command::EnableButtonMonitoring,
            Command::EnableLoadMonitoring,
            Command::EnableLedMonitoring,
        ]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetLevel {
                load,
                level,
                fade: None,
            } => write!(f, "VLO@ {} {}", load, level),
            Command::SetLevel {
                load,
                level,
                fade: Some(fade),
            } => write!(f, "VLO {} {} {}", load, level, fade),
            Command::GetLevel { load } => write!(f, "VGL@ {}", load),
            Command::PressButton {
                master,
                station,
                button,
            } => write!(f, "VSW@ {} {} {} {}", master, station, button, SIMULATE_PRESS),
            Command::LedStatus { master, station } => write!(f, "VLT@ {} {}", master, station),
            Command::EnableButtonMonitoring => f.write_str("VOS@ 1 1"),
            Command::EnableLoadMonitoring => f.write_str("VOL@ 1"),
            Command::EnableLedMonitoring => f.write_str("VOD@ 3"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_clamping() {
        assert_eq!(Level::clamped(-5), Level::OFF);
        assert_eq!(Level::clamped(150), Level::FULL);
        assert_eq!(Level::clamped(50).value(), 50);
    }

    #[test]
    fn test_level_clamping_f64() {
        assert_eq!(Level::clamped_f64(50.9).value(), 50);
        assert_eq!(Level::clamped_f64(1e20), Level::FULL);
        assert_eq!(Level::clamped_f64(-1e20), Level::OFF);
        assert_eq!(Level::clamped_f64(f64::NAN), Level::OFF);
    }

    #[test]
    fn test_switch_parse() {
        assert_eq!("ON".parse::<Switch>().unwrap().level(), Level::FULL);
        assert_eq!("off".parse::<Switch>().unwrap().level(), Level::OFF);
        assert!("maybe".parse::<Switch>().is_err());
    }

    #[test]
    fn test_command_text() {
        let set = Command::SetLevel {
            load: 251,
            level: Level::FULL,
            fade: None,
        };
        assert_eq!(set.to_string(), "VLO@ 251 100");

        let fade = Command::SetLevel {
            load: 251,
            level: Level::clamped(40),
            fade: Some("2.3".into()),
        };
        assert_eq!(fade.to_string(), "VLO 251 40 2.3");

        assert_eq!(Command::GetLevel { load: 7 }.to_string(), "VGL@ 7");
        assert_eq!(
            Command::PressButton {
                master: 1,
                station: 23,
                button: 5
            }
            .to_string(),
            "VSW@ 1 23 5 4"
        );
        assert_eq!(
            Command::LedStatus {
                master: 2,
                station: 60
            }
            .to_string(),
            "VLT@ 2 60"
        );
    }

    #[test]
    fn test_monitoring_sequence() {
        let seq: Vec<String> = Command::monitoring_sequence()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(seq, vec!["VOS@ 1 1", "VOL@ 1", "VOD@ 3"]);
    }
}
