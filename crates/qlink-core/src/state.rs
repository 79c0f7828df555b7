//! Per-station LED state store

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::led::{ButtonStates, LedState};

/// Station number to its last known button LED states.
///
/// Entries are created on first observation and never removed. Every call
/// takes the lock once, so readers never see a half-applied merge.
#[derive(Debug, Default)]
pub struct LedStore {
    stations: RwLock<BTreeMap<u32, ButtonStates>>,
}

impl LedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update into a station; buttons absent from `partial` are kept
    pub fn update(&self, station: u32, partial: &ButtonStates) {
        let mut stations = self.stations.write();
        let entry = stations.entry(station).or_default();
        entry.extend(partial.iter().map(|(button, state)| (*button, *state)));
    }

    /// Set a single button
    pub fn set_button(&self, station: u32, button: u8, state: LedState) {
        self.stations
            .write()
            .entry(station)
            .or_default()
            .insert(button, state);
    }

    /// States for one station (empty if never observed)
    pub fn get(&self, station: u32) -> ButtonStates {
        self.stations
            .read()
            .get(&station)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of the full station map
    pub fn snapshot(&self) -> BTreeMap<u32, ButtonStates> {
        self.stations.read().clone()
    }

    /// Number of stations observed
    pub fn len(&self) -> usize {
        self.stations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_non_destructive() {
        let store = LedStore::new();
        store.set_button(23, 1, LedState::Off);

        let mut partial = ButtonStates::new();
        partial.insert(3, LedState::On);
        store.update(23, &partial);

        let states = store.get(23);
        assert_eq!(states.len(), 2);
        assert_eq!(states[&1], LedState::Off);
        assert_eq!(states[&3], LedState::On);
    }

    #[test]
    fn test_unknown_station_is_empty() {
        let store = LedStore::new();
        assert!(store.get(99).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = LedStore::new();
        store.set_button(10, 2, LedState::Blink);
        let snap = store.snapshot();
        store.set_button(10, 2, LedState::Off);

        assert_eq!(snap[&10][&2], LedState::Blink);
        assert_eq!(store.get(10)[&2], LedState::Off);
    }
}
