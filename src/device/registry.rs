// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry: the network-stack handle shared by all extensions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::{CoordinatorEndpoint, Device, DeviceAddress, DeviceKind};

/// Persistence seam for device records.
///
/// The registry writes a device through this trait whenever its `configured`
/// marker changes. The real implementation lives with the external network
/// stack (it owns the device database); tests substitute a recorder.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Persists the given device record.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    async fn save(&self, device: &Device) -> Result<()>;
}

/// Shared handle to the devices known to the mesh.
///
/// `DeviceRegistry` is cheaply cloneable (via `Arc`) and can be shared
/// between extensions. Orchestration components read devices through it and
/// mutate only the `configured` marker; everything else is written by the
/// external network stack.
///
/// # Examples
///
/// ```
/// use meshbridge::device::{Device, DeviceKind, DeviceRegistry};
///
/// let registry = DeviceRegistry::new();
/// registry.upsert(Device::new("0x01", DeviceKind::Router).with_friendly_name("plug"));
///
/// assert!(registry.resolve("plug").is_some());
/// assert!(registry.resolve("0x01").is_some());
/// ```
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    devices: RwLock<HashMap<DeviceAddress, Device>>,
    store: RwLock<Option<Arc<dyn DeviceStore>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry without a persistence store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                devices: RwLock::new(HashMap::new()),
                store: RwLock::new(None),
            }),
        }
    }

    /// Attaches the persistence store used for `configured`-marker writes.
    pub fn set_store(&self, store: Arc<dyn DeviceStore>) {
        *self.inner.store.write() = Some(store);
    }

    /// Inserts or replaces a device record.
    pub fn upsert(&self, device: Device) {
        self.inner
            .devices
            .write()
            .insert(device.address.clone(), device);
    }

    /// Removes a device record.
    ///
    /// Returns `true` if the device was present.
    pub fn remove(&self, address: &DeviceAddress) -> bool {
        self.inner.devices.write().remove(address).is_some()
    }

    /// Returns a snapshot of a device by address.
    #[must_use]
    pub fn get(&self, address: &DeviceAddress) -> Option<Device> {
        self.inner.devices.read().get(address).cloned()
    }

    /// Returns a snapshot of every known device.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.read().values().cloned().collect()
    }

    /// Returns the number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.devices.read().len()
    }

    /// Returns `true` if no devices are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.devices.read().is_empty()
    }

    /// Resolves a device by friendly name or network address.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<Device> {
        let devices = self.inner.devices.read();
        if let Some(device) = devices.get(&DeviceAddress::new(id)) {
            return Some(device.clone());
        }
        devices
            .values()
            .find(|d| d.friendly_name.as_deref() == Some(id))
            .cloned()
    }

    /// Returns the coordinator-facing endpoint configuration routines bind
    /// against.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCoordinator`] when no coordinator device is known.
    pub fn coordinator_endpoint(&self) -> Result<CoordinatorEndpoint> {
        self.inner
            .devices
            .read()
            .values()
            .find(|d| d.kind == DeviceKind::Coordinator)
            .map(|d| CoordinatorEndpoint {
                address: d.address.clone(),
                endpoint: 1,
            })
            .ok_or(Error::NoCoordinator)
    }

    /// Updates a device's `configured` marker and persists the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unknown or the persistence write
    /// fails.
    pub async fn set_configured(
        &self,
        address: &DeviceAddress,
        marker: Option<String>,
    ) -> Result<()> {
        let device = {
            let mut devices = self.inner.devices.write();
            let device = devices
                .get_mut(address)
                .ok_or_else(|| Error::DeviceNotFound(address.to_string()))?;
            device.configured = marker;
            device.clone()
        };

        let store = self.inner.store.read().clone();
        if let Some(store) = store {
            store.save(&device).await?;
        }
        Ok(())
    }

    /// Records that the device was heard from, updating `last_seen` and the
    /// link quality of the received frame.
    pub fn mark_last_seen(
        &self,
        address: &DeviceAddress,
        time: DateTime<Utc>,
        link_quality: Option<u8>,
    ) {
        let mut devices = self.inner.devices.write();
        if let Some(device) = devices.get_mut(address) {
            device.last_seen = Some(time);
            if link_quality.is_some() {
                device.link_quality = link_quality;
            }
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .finish()
    }
}
