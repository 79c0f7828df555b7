//! Shared bridge context
//!
//! Built once at startup and shared as `Arc<BridgeContext>` by the HTTP
//! handlers and the monitor loop. Each part carries its own lock; nothing
//! here is held across a controller call.

use parking_lot::RwLock;
use qlink_core::{Command, Decoder, LedReport, LedStore};
use qlink_transport::{CommandSender, Result as TransportResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::hub::HubHandle;
use crate::monitor::MonitorStatus;
use crate::settings::{Settings, SettingsFile, UpdateReport};
use crate::stations::{LoadsConfig, StationAddress, StationMap};

/// Result of one LED status query
#[derive(Debug, Clone)]
pub struct LedQuery {
    pub address: StationAddress,
    pub raw: String,
    pub report: LedReport,
}

/// Result of a settings update
#[derive(Debug)]
pub struct SettingsOutcome {
    pub report: UpdateReport,
    pub persisted: bool,
}

pub struct BridgeContext {
    settings: RwLock<Settings>,
    /// Controller address fixed at startup; address updates wait for a restart
    controller_addr: String,
    settings_file: Option<SettingsFile>,
    sender: Arc<dyn CommandSender>,
    decoder: Decoder,
    hub: HubHandle,
    stations: StationMap,
    status: MonitorStatus,
    config_dir: Option<PathBuf>,
}

impl BridgeContext {
    pub fn new(settings: Settings, sender: Arc<dyn CommandSender>, hub: HubHandle) -> Self {
        Self {
            controller_addr: settings.controller_addr(),
            settings: RwLock::new(settings),
            settings_file: None,
            sender,
            decoder: Decoder::new(Arc::new(LedStore::new())),
            hub,
            stations: StationMap::default(),
            status: MonitorStatus::default(),
            config_dir: None,
        }
    }

    /// Use `dir` for `loads.json` and the station translation tables
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.stations = StationMap::load(&dir);
        self.config_dir = Some(dir);
        self
    }

    pub fn with_station_map(mut self, stations: StationMap) -> Self {
        self.stations = stations;
        self
    }

    /// Persist runtime settings updates to `file`
    pub fn with_settings_file(mut self, file: SettingsFile) -> Self {
        self.settings_file = Some(file);
        self
    }

    /// Copy of the current settings
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Address every controller connection uses, regardless of later
    /// `vantage_ip`/`vantage_port` updates
    pub fn controller_addr(&self) -> &str {
        &self.controller_addr
    }

    pub fn store(&self) -> &Arc<LedStore> {
        self.decoder.store()
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn stations(&self) -> &StationMap {
        &self.stations
    }

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Send one command through the serialized transport
    pub async fn send(&self, command: &Command) -> TransportResult<String> {
        self.sender.send(&command.to_string(), None).await
    }

    /// Send raw protocol text
    pub async fn send_raw(&self, text: &str) -> TransportResult<String> {
        self.sender.send(text, None).await
    }

    /// Read `loads.json` from the config directory
    pub async fn loads(&self) -> Result<LoadsConfig> {
        let dir = self
            .config_dir
            .as_deref()
            .ok_or_else(|| BridgeError::Config("no config directory".into()))?;
        LoadsConfig::read(dir).await
    }

    /// Query a station's LEDs and merge the result into the store
    pub async fn query_leds(&self, station: u32) -> Result<LedQuery> {
        let address = self.stations.resolve(station);
        let command = Command::LedStatus {
            master: address.master,
            station: address.physical,
        };
        let raw = self.send(&command).await?;
        let report = LedReport::parse(&raw)?;

        let states = report.button_states();
        self.store().update(station, &states);
        debug!(station, raw = %raw, "LED status");

        Ok(LedQuery {
            address,
            raw,
            report,
        })
    }

    /// Apply a settings update, push eligible changes to the transport and
    /// persist the accepted keys.
    pub async fn update_settings(&self, body: &Map<String, Value>) -> SettingsOutcome {
        let (report, options) = {
            let mut settings = self.settings.write();
            let report = settings.apply_update(body);
            (report, settings.client_options())
        };

        if !report.updated.is_empty() {
            self.sender.reconfigure(options);
        }

        let persisted = match &self.settings_file {
            Some(file) if !report.changes.is_empty() => match file.merge(&report.changes).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to persist settings to {}: {}", file.path().display(), e);
                    false
                }
            },
            _ => false,
        };

        SettingsOutcome { report, persisted }
    }
}
