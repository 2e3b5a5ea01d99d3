// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extension lifecycle contract.
//!
//! Every orchestration component implements [`Extension`]: it is constructed
//! with an immutable [`ExtensionContext`] (the shared collaborators), does
//! all of its subscription registration in `start()`, and revokes every one
//! of its bus subscriptions in `stop()` before releasing anything else. The
//! default `stop()` body performs exactly that revocation; overriders run it
//! first, then their own cleanup.

mod configure;

use std::sync::Arc;

use async_trait::async_trait;

use crate::device::DeviceRegistry;
use crate::error::Result;
use crate::event::EventBus;
use crate::state::StateStore;
use crate::transport::Transport;

pub use configure::Configure;

/// Callback requesting a process restart.
pub type RestartCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback enabling or disabling a sibling extension by name.
pub type ExtensionStateCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Callback registering a new extension at runtime.
pub type AddExtensionCallback = Arc<dyn Fn(Box<dyn Extension>) + Send + Sync>;

/// Callbacks the host process hands to every extension.
#[derive(Clone)]
pub struct ExtensionCallbacks {
    /// Requests a process restart.
    pub restart: RestartCallback,
    /// Enables or disables a sibling extension.
    pub set_extension_enabled: ExtensionStateCallback,
    /// Registers a new extension at runtime.
    pub add_extension: AddExtensionCallback,
}

impl ExtensionCallbacks {
    /// Creates callbacks that do nothing, for hosts (and tests) that do not
    /// wire them up.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            restart: Arc::new(|| {}),
            set_extension_enabled: Arc::new(|_, _| {}),
            add_extension: Arc::new(|_| {}),
        }
    }
}

impl std::fmt::Debug for ExtensionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCallbacks").finish_non_exhaustive()
    }
}

/// Shared collaborators handed to every extension at construction.
///
/// Cheaply cloneable; all clones reference the same collaborators.
#[derive(Clone)]
pub struct ExtensionContext {
    devices: DeviceRegistry,
    transport: Arc<dyn Transport>,
    states: Arc<StateStore>,
    bus: EventBus,
    callbacks: ExtensionCallbacks,
}

impl ExtensionContext {
    /// Bundles the shared collaborators.
    #[must_use]
    pub fn new(
        devices: DeviceRegistry,
        transport: Arc<dyn Transport>,
        states: Arc<StateStore>,
        bus: EventBus,
        callbacks: ExtensionCallbacks,
    ) -> Self {
        Self {
            devices,
            transport,
            states,
            bus,
            callbacks,
        }
    }

    /// Returns the device-network handle.
    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Returns the bus-transport handle.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the persisted entity-state accessor.
    #[must_use]
    pub fn states(&self) -> &Arc<StateStore> {
        &self.states
    }

    /// Returns the event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the host callbacks.
    #[must_use]
    pub fn callbacks(&self) -> &ExtensionCallbacks {
        &self.callbacks
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

/// Lifecycle contract for orchestration components.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable name of the extension; also the owner identity of its bus
    /// subscriptions.
    fn name(&self) -> &'static str;

    /// Returns the shared collaborators.
    fn context(&self) -> &ExtensionContext;

    /// Registers subscriptions and performs startup side effects.
    ///
    /// Must not block the caller beyond a scheduling step: long-running
    /// startup work runs as a spawned task.
    ///
    /// # Errors
    ///
    /// Returns an error when the extension cannot start.
    async fn start(&self) -> Result<()>;

    /// Tears the extension down.
    ///
    /// The default body revokes every bus subscription registered under this
    /// extension's name. Implementations adding resource cleanup must perform
    /// the same revocation before releasing anything else.
    async fn stop(&self) {
        let removed = self.context().event_bus().unsubscribe_all(self.name());
        tracing::debug!(extension = self.name(), removed, "Revoked bus subscriptions");
    }
}
