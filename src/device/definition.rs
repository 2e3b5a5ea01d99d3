// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device definitions supplied by the external capability catalog.
//!
//! A [`Definition`] describes what a device model can do. The part this
//! library cares about is the optional [`ConfigureRoutine`]: a
//! catalog-supplied procedure that establishes bindings and reporting on a
//! device. Whether a definition carries one is an explicit capability field,
//! checked once, rather than a runtime type inspection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConfigureError;

use super::{Device, DeviceAddress};

/// The coordinator-facing endpoint handed to configuration routines.
///
/// Routines bind device clusters against this endpoint so reports flow back
/// to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorEndpoint {
    /// Network address of the coordinator device.
    pub address: DeviceAddress,
    /// Endpoint number on the coordinator.
    pub endpoint: u8,
}

/// A device-model configuration routine.
///
/// Supplied by the external device-definition catalog; this library only
/// invokes it, it never implements one. Routines receive the device to
/// configure and the coordinator endpoint to bind against.
#[async_trait]
pub trait ConfigureRoutine: Send + Sync {
    /// Establishes bindings/reporting on the device.
    ///
    /// # Errors
    ///
    /// Returns an error when the device could not be configured, e.g. it is
    /// unreachable or rejected a binding request.
    async fn configure(
        &self,
        device: &Device,
        coordinator: &CoordinatorEndpoint,
    ) -> Result<(), ConfigureError>;
}

/// Capability descriptor for a device model.
///
/// # Examples
///
/// ```
/// use meshbridge::device::Definition;
///
/// let definition = Definition::new("TS0121", "TuYa", "Smart plug");
/// assert!(!definition.supports_configure());
/// ```
#[derive(Clone)]
pub struct Definition {
    /// Model identifier as reported by the device.
    pub model: String,
    /// Vendor name.
    pub vendor: String,
    /// Human-readable description.
    pub description: String,
    /// Version key of the configuration routine. Stored as the device's
    /// `configured` marker after a successful run.
    pub configure_key: i64,
    /// Optional configuration routine for this model.
    pub configure: Option<Arc<dyn ConfigureRoutine>>,
}

impl Definition {
    /// Creates a definition without a configuration routine.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        vendor: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            vendor: vendor.into(),
            description: description.into(),
            configure_key: 1,
            configure: None,
        }
    }

    /// Attaches a configuration routine.
    #[must_use]
    pub fn with_configure(mut self, routine: Arc<dyn ConfigureRoutine>) -> Self {
        self.configure = Some(routine);
        self
    }

    /// Sets the configuration version key.
    #[must_use]
    pub fn with_configure_key(mut self, key: i64) -> Self {
        self.configure_key = key;
        self
    }

    /// Returns `true` if this definition supplies a configuration routine.
    #[must_use]
    pub fn supports_configure(&self) -> bool {
        self.configure.is_some()
    }

    /// Returns the marker value recorded after a successful configuration.
    #[must_use]
    pub fn configured_marker(&self) -> String {
        self.configure_key.to_string()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("configure_key", &self.configure_key)
            .field("supports_configure", &self.supports_configure())
            .finish_non_exhaustive()
    }
}
