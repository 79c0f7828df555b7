//! Bridge settings
//!
//! Settings come from three layers, later ones winning:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. Command line / environment (applied by the binary)
//! 3. The persisted settings file ([`SettingsFile`])
//!
//! Only the keys in [`SettingKey::ALL`] are ever read from or written to the
//! settings file, and the same validation applies to the file and to
//! runtime updates.

use qlink_core::{Terminator, DEFAULT_CONTROLLER_PORT};
use qlink_transport::{ClientOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

/// Largest accepted command timeout, in seconds; larger values are capped
pub const MAX_TIMEOUT_SECS: f64 = 120.0;

/// Largest accepted retry base delay, in seconds; larger values are capped
pub const MAX_RETRY_BASE_SECS: f64 = 30.0;

/// How live device state is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Persistent connection reading the unsolicited event stream
    #[default]
    Events,
    /// Periodic LED status queries per station
    Poll,
    Off,
}

impl FromStr for MonitorMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "events" => Ok(MonitorMode::Events),
            "poll" => Ok(MonitorMode::Poll),
            "off" | "none" | "disabled" => Ok(MonitorMode::Off),
            other => Err(BridgeError::Settings(format!("unknown monitor mode: {}", other))),
        }
    }
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MonitorMode::Events => "events",
            MonitorMode::Poll => "poll",
            MonitorMode::Off => "off",
        };
        f.write_str(name)
    }
}

/// Process-wide bridge settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub vantage_ip: String,
    pub vantage_port: u16,
    pub terminator: Terminator,
    /// Per-call connect and read timeout
    pub timeout: Duration,
    /// Fade time passed to `VLO` when a request asks for the default fade
    pub fade: String,
    /// Total connection attempts per command
    pub max_retries: u32,
    pub retry_base: Duration,
    pub monitor_mode: MonitorMode,
    pub poll_interval: Duration,
    /// Pause between stations within one poll cycle
    pub station_delay: Duration,
    pub bind: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vantage_ip: "192.168.0.180".to_string(),
            vantage_port: DEFAULT_CONTROLLER_PORT,
            terminator: Terminator::Cr,
            timeout: Duration::from_secs(2),
            fade: "2.3".to_string(),
            max_retries: 4,
            retry_base: Duration::from_millis(200),
            monitor_mode: MonitorMode::Events,
            poll_interval: Duration::from_secs(10),
            station_delay: Duration::from_millis(100),
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl Settings {
    /// `host:port` of the controller
    pub fn controller_addr(&self) -> String {
        format!("{}:{}", self.vantage_ip, self.vantage_port)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            terminator: self.terminator,
            timeout: self.timeout,
            retry: RetryPolicy::new(self.max_retries, self.retry_base),
        }
    }

    /// Settings as reported by `GET /settings`
    pub fn view(&self) -> Value {
        json!({
            "vantage_ip": self.vantage_ip,
            "vantage_port": self.vantage_port,
            "qlink_fade": self.fade,
            "qlink_timeout": self.timeout.as_secs_f64(),
            "qlink_eol": self.terminator.name(),
            "qlink_max_retries": self.max_retries,
            "qlink_retry_base": self.retry_base.as_secs_f64(),
            "monitor_mode": self.monitor_mode,
        })
    }

    /// Validate and apply one key.
    ///
    /// Returns the normalized value to persist, or `None` when the value was
    /// rejected (nothing is changed in that case).
    pub fn apply(&mut self, key: SettingKey, value: &Value) -> Option<toml::Value> {
        match key {
            SettingKey::VantageIp => {
                let ip = as_text(value).filter(|s| !s.contains(char::is_whitespace))?;
                self.vantage_ip = ip.clone();
                Some(toml::Value::String(ip))
            }
            SettingKey::VantagePort => {
                let port = as_u64(value).and_then(|p| u16::try_from(p).ok()).filter(|p| *p != 0)?;
                self.vantage_port = port;
                Some(toml::Value::Integer(port.into()))
            }
            SettingKey::Timeout => {
                let secs = as_f64(value).filter(|s| *s > 0.0)?.min(MAX_TIMEOUT_SECS);
                self.timeout = Duration::try_from_secs_f64(secs).ok()?;
                Some(toml::Value::Float(secs))
            }
            SettingKey::Fade => {
                let fade = match value {
                    Value::Number(n) => Some(n.to_string()),
                    _ => as_text(value),
                }?;
                self.fade = fade.clone();
                Some(toml::Value::String(fade))
            }
            SettingKey::Eol => {
                let terminator: Terminator = value.as_str()?.parse().ok()?;
                self.terminator = terminator;
                Some(toml::Value::String(terminator.name().to_string()))
            }
            SettingKey::MaxRetries => {
                let retries = as_u64(value).and_then(|r| u32::try_from(r).ok()).filter(|r| *r >= 1)?;
                self.max_retries = retries;
                Some(toml::Value::Integer(retries.into()))
            }
            SettingKey::RetryBase => {
                let secs = as_f64(value).filter(|s| *s >= 0.0)?.min(MAX_RETRY_BASE_SECS);
                self.retry_base = Duration::try_from_secs_f64(secs).ok()?;
                Some(toml::Value::Float(secs))
            }
        }
    }

    /// Apply every recognized key in `body`; invalid values are skipped
    pub fn apply_update(&mut self, body: &Map<String, Value>) -> UpdateReport {
        let mut report = UpdateReport::default();

        for key in SettingKey::ALL {
            let Some(value) = body.get(key.name()) else {
                continue;
            };
            match self.apply(key, value) {
                Some(normalized) => {
                    report.updated.push(key.name());
                    report.restart_required |= key.requires_restart();
                    report.changes.insert(key.name().to_string(), normalized);
                }
                None => warn!("Ignoring invalid value for {}: {}", key.name(), value),
            }
        }

        for unknown in body.keys().filter(|k| SettingKey::from_name(k).is_none()) {
            debug!("Ignoring unknown setting {}", unknown);
        }

        report
    }
}

/// Keys that may be updated at runtime and persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    VantageIp,
    VantagePort,
    Timeout,
    Fade,
    Eol,
    MaxRetries,
    RetryBase,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::VantageIp,
        SettingKey::VantagePort,
        SettingKey::Timeout,
        SettingKey::Fade,
        SettingKey::Eol,
        SettingKey::MaxRetries,
        SettingKey::RetryBase,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::VantageIp => "vantage_ip",
            SettingKey::VantagePort => "vantage_port",
            SettingKey::Timeout => "qlink_timeout",
            SettingKey::Fade => "qlink_fade",
            SettingKey::Eol => "qlink_eol",
            SettingKey::MaxRetries => "qlink_max_retries",
            SettingKey::RetryBase => "qlink_retry_base",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    /// Controller address changes only take effect on the next start
    pub fn requires_restart(&self) -> bool {
        matches!(self, SettingKey::VantageIp | SettingKey::VantagePort)
    }
}

/// Outcome of [`Settings::apply_update`]
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub updated: Vec<&'static str>,
    pub restart_required: bool,
    /// Normalized values of the accepted keys
    pub changes: toml::Table,
}

impl UpdateReport {
    pub fn message(&self) -> &'static str {
        if self.restart_required {
            "Settings updated. Restart bridge for network changes to take effect."
        } else {
            "Settings updated successfully."
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flat TOML file holding the persisted subset of [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw table; a missing file reads as empty
    pub async fn read(&self) -> Result<toml::Table> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(toml::Table::new()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&text).map_err(|e| {
            BridgeError::Settings(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Overlay the persisted keys onto `settings`, returning the keys applied
    pub async fn load_into(&self, settings: &mut Settings) -> Result<Vec<&'static str>> {
        let table = self.read().await?;
        let mut applied = Vec::new();

        for (name, value) in &table {
            let Some(key) = SettingKey::from_name(name) else {
                warn!("Ignoring unknown key {} in {}", name, self.path.display());
                continue;
            };
            let value = serde_json::to_value(value)?;
            if settings.apply(key, &value).is_some() {
                applied.push(key.name());
            } else {
                warn!(
                    "Ignoring invalid {} in {}: {}",
                    name,
                    self.path.display(),
                    value
                );
            }
        }

        if !applied.is_empty() {
            info!("Loaded settings {:?} from {}", applied, self.path.display());
        }
        Ok(applied)
    }

    /// Merge `changes` into the file, keeping keys not mentioned
    pub async fn merge(&self, changes: &toml::Table) -> Result<()> {
        let mut table = match self.read().await {
            Ok(table) => table,
            Err(e) => {
                warn!("Replacing unreadable settings file: {}", e);
                toml::Table::new()
            }
        };
        table.retain(|name, _| SettingKey::from_name(name).is_some());
        table.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));

        let text = toml::to_string(&table).map_err(|e| BridgeError::Settings(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, text).await?;
        debug!("Wrote {} setting(s) to {}", table.len(), self.path.display());
        Ok(())
    }
}
