//! Station addressing and site configuration
//!
//! Keypad stations are known by a "virtual" number. Some commands need the
//! master controller the station is wired to and its physical number on
//! that master. Both come from translation tables in the config directory:
//!
//! - `station_masters.json`: `{"<virtual>": <master>}`
//! - `station_physical.json`: `{"<virtual>": <physical>}`
//!
//! Values may be numbers or numeric strings. Stations missing from either
//! table resolve through a fallback heuristic that is known to be wrong for
//! some sites; results carry [`Mapping::Fallback`] so callers can tell.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

pub const MASTERS_FILE: &str = "station_masters.json";
pub const PHYSICAL_FILE: &str = "station_physical.json";
pub const LOADS_FILE: &str = "loads.json";

/// Fallback: stations numbered at or above this sit on master 2
const SECOND_MASTER_FROM: u32 = 51;

/// How a [`StationAddress`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mapping {
    /// Both master and physical number came from the translation tables
    Mapped,
    /// At least one part came from the heuristic
    Fallback,
}

/// Fully resolved station address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StationAddress {
    pub station: u32,
    pub master: u8,
    pub physical: u32,
    pub mapping: Mapping,
}

/// Virtual station number translation tables
#[derive(Debug, Clone, Default)]
pub struct StationMap {
    masters: HashMap<u32, u8>,
    physical: HashMap<u32, u32>,
}

impl StationMap {
    pub fn new(masters: HashMap<u32, u8>, physical: HashMap<u32, u32>) -> Self {
        Self { masters, physical }
    }

    /// Load both tables from `dir`; a missing or invalid table is left empty
    pub fn load(dir: &Path) -> Self {
        let masters = read_table(&dir.join(MASTERS_FILE))
            .into_iter()
            .filter_map(|(station, master)| Some((station, u8::try_from(master).ok()?)))
            .collect::<HashMap<_, _>>();
        let physical = read_table(&dir.join(PHYSICAL_FILE));

        info!(
            "Station map: {} master entries, {} physical entries",
            masters.len(),
            physical.len()
        );
        Self::new(masters, physical)
    }

    pub fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.physical.is_empty()
    }

    pub fn resolve(&self, station: u32) -> StationAddress {
        let master = self.masters.get(&station).copied();
        let physical = self.physical.get(&station).copied();

        let mapping = if master.is_some() && physical.is_some() {
            Mapping::Mapped
        } else {
            Mapping::Fallback
        };

        StationAddress {
            station,
            master: master.unwrap_or_else(|| fallback_master(station)),
            physical: physical.unwrap_or(station),
            mapping,
        }
    }
}

fn fallback_master(station: u32) -> u8 {
    if station >= SECOND_MASTER_FROM {
        2
    } else {
        1
    }
}

fn read_table(path: &Path) -> HashMap<u32, u32> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!("No translation table at {}: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => parse_translation_table(&value),
        Err(e) => {
            warn!("Invalid translation table {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Parse `{"<virtual>": <number>}`, skipping non-numeric keys and values
pub fn parse_translation_table(value: &Value) -> HashMap<u32, u32> {
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| Some((key.trim().parse().ok()?, numeric(value)?)))
        .collect()
}

/// A station number given as a JSON number or numeric string
fn numeric(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Contents of `loads.json`.
///
/// Two layouts exist. The rooms layout:
///
/// ```json
/// {"rooms": [{"name": "Kitchen", "station": 23, "stations": [{"station": 23}], "loads": [...]}]}
/// ```
///
/// and the legacy layout keyed by `station_<n>`.
#[derive(Debug, Clone, Default)]
pub struct LoadsConfig {
    raw: Value,
}

impl LoadsConfig {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// Read `loads.json` from the config directory
    pub async fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(LOADS_FILE);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        let raw = serde_json::from_str(&text)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self { raw })
    }

    /// Room definitions, empty for the legacy layout
    pub fn rooms(&self) -> Vec<Value> {
        self.raw
            .get("rooms")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Every station number mentioned, in ascending order.
    ///
    /// Rooms are read first; the legacy `station_<n>` keys are used when the
    /// rooms yield nothing.
    pub fn stations(&self) -> BTreeSet<u32> {
        if let Some(rooms) = self.raw.get("rooms").and_then(Value::as_array) {
            let mut stations = BTreeSet::new();
            for room in rooms {
                stations.extend(room.get("station").and_then(numeric));
                if let Some(list) = room.get("stations").and_then(Value::as_array) {
                    stations.extend(list.iter().filter_map(|entry| match entry {
                        Value::Object(_) => entry.get("station").and_then(numeric),
                        other => numeric(other),
                    }));
                }
            }
            if !stations.is_empty() {
                return stations;
            }
        }

        self.raw
            .as_object()
            .map(|object| {
                object
                    .keys()
                    .filter_map(|key| key.strip_prefix("station_")?.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_heuristic() {
        let map = StationMap::default();
        assert_eq!(
            map.resolve(23),
            StationAddress {
                station: 23,
                master: 1,
                physical: 23,
                mapping: Mapping::Fallback
            }
        );
        assert_eq!(map.resolve(50).master, 1);
        assert_eq!(map.resolve(51).master, 2);
    }

    #[test]
    fn test_mapped_station() {
        let map = StationMap::new(HashMap::from([(60, 2)]), HashMap::from([(60, 9)]));
        let address = map.resolve(60);
        assert_eq!(address.master, 2);
        assert_eq!(address.physical, 9);
        assert_eq!(address.mapping, Mapping::Mapped);
    }

    #[test]
    fn test_partial_mapping_is_fallback() {
        let map = StationMap::new(HashMap::from([(60, 1)]), HashMap::new());
        let address = map.resolve(60);
        assert_eq!(address.master, 1);
        assert_eq!(address.physical, 60);
        assert_eq!(address.mapping, Mapping::Fallback);
    }

    #[test]
    fn test_translation_table_normalizes() {
        let table = parse_translation_table(&json!({"23": 1, "60": "2", "V7": 1, "8": "two"}));
        assert_eq!(table.len(), 2);
        assert_eq!(table[&23], 1);
        assert_eq!(table[&60], 2);
    }

    #[test]
    fn test_load_tables_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MASTERS_FILE), r#"{"70": 2}"#).unwrap();
        std::fs::write(dir.path().join(PHYSICAL_FILE), r#"{"70": "12"}"#).unwrap();

        let map = StationMap::load(dir.path());
        assert_eq!(map.resolve(70).physical, 12);
        assert_eq!(map.resolve(70).mapping, Mapping::Mapped);
    }

    #[test]
    fn test_missing_tables_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let map = StationMap::load(dir.path());
        assert!(map.is_empty());
        assert_eq!(map.resolve(55).master, 2);
    }

    #[test]
    fn test_rooms_stations() {
        let config = LoadsConfig::from_value(json!({
            "rooms": [
                {"name": "Kitchen", "station": 23, "stations": [{"station": 23}, {"station": "10"}]},
                {"name": "Hall", "stations": [{"station": "V9"}]},
                {"name": "Den", "loads": [{"id": 251}]}
            ]
        }));
        assert_eq!(config.stations().into_iter().collect::<Vec<_>>(), vec![10, 23]);
        assert_eq!(config.rooms().len(), 3);
    }

    #[test]
    fn test_legacy_stations() {
        let config = LoadsConfig::from_value(json!({
            "station_23": {"loads": []},
            "station_5": {"loads": []},
            "station_x": {},
            "version": 1
        }));
        assert_eq!(config.stations().into_iter().collect::<Vec<_>>(), vec![5, 23]);
        assert!(config.rooms().is_empty());
    }

    #[test]
    fn test_empty_rooms_fall_back_to_legacy_keys() {
        let config = LoadsConfig::from_value(json!({
            "rooms": [{"name": "Spare", "loads": []}],
            "station_12": {"loads": []}
        }));
        assert_eq!(config.stations().into_iter().collect::<Vec<_>>(), vec![12]);
        assert_eq!(config.rooms().len(), 1);
    }
}
