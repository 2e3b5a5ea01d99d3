// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted entity-state store.
//!
//! Holds the last known consolidated state per device, keyed by network
//! address. The sync gateway reads it to build the live snapshots it replays
//! to newly connected clients. States survive restarts through the JSON file
//! helpers.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde_json::Value;

use crate::device::DeviceAddress;
use crate::error::{ParseError, Result};

/// Store of last-known entity states, keyed by device address.
///
/// # Examples
///
/// ```
/// use meshbridge::device::DeviceAddress;
/// use meshbridge::state::StateStore;
/// use serde_json::json;
///
/// let store = StateStore::new();
/// let address = DeviceAddress::new("0x01");
///
/// store.set(&address, json!({"state": "ON"}));
/// assert_eq!(store.get(&address), Some(json!({"state": "ON"})));
/// ```
pub struct StateStore {
    states: RwLock<HashMap<DeviceAddress, Value>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the last known state for a device.
    #[must_use]
    pub fn get(&self, address: &DeviceAddress) -> Option<Value> {
        self.states.read().get(address).cloned()
    }

    /// Stores the state for a device, replacing any previous value.
    pub fn set(&self, address: &DeviceAddress, state: Value) {
        self.states.write().insert(address.clone(), state);
    }

    /// Removes the state for a device.
    ///
    /// Returns `true` if a state was present.
    pub fn remove(&self, address: &DeviceAddress) -> bool {
        self.states.write().remove(address).is_some()
    }

    /// Returns the number of stored states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns `true` if no states are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Loads states from a JSON file written by [`save`](Self::save).
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }

        let contents = std::fs::read_to_string(path)?;
        let map: HashMap<String, Value> =
            serde_json::from_str(&contents).map_err(ParseError::Json)?;

        let mut states = store.states.write();
        for (address, state) in map {
            states.insert(DeviceAddress::new(address), state);
        }
        drop(states);
        Ok(store)
    }

    /// Writes all states to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let map: HashMap<String, Value> = self
            .states
            .read()
            .iter()
            .map(|(address, state)| (address.to_string(), state.clone()))
            .collect();
        let contents = serde_json::to_string_pretty(&map).map_err(ParseError::Json)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("states", &self.len()).finish()
    }
}
