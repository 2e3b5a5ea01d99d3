// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration manager.
//!
//! Decides, on every relevant event, whether a device must be (re)configured,
//! enforces a bounded-retry policy, and serializes configuration per device.
//! Outcomes are reported over the event bus (`DevicesChanged`) and over the
//! request/response transport channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::device::{DeviceAddress, DeviceKind};
use crate::error::{ConfigureError, Result};
use crate::event::{BridgeEvent, EventKind};
use crate::transport::{OutgoingMessage, Transport as _, namespaced};

use super::{Extension, ExtensionContext};

/// Retry ceiling for non-forced configuration attempts.
const MAX_ATTEMPTS: u32 = 3;

/// Delay between devices during the startup sweep, throttling requests at
/// the network coordinator.
const SWEEP_DELAY: Duration = Duration::from_secs(10);

/// Namespace-relative request topic.
const REQUEST_TOPIC: &str = "bridge/request/device/configure";

/// Namespace-relative response topic.
const RESPONSE_TOPIC: &str = "bridge/response/device/configure";

/// What caused a configuration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Joined,
    InterviewCompleted,
    LastSeen,
    Reconfigure,
    Request,
    Sweep,
}

impl Trigger {
    /// Whether the trigger is a live network event. Sleepy end-devices are
    /// reachable only right after they talked to us, so only live triggers
    /// may configure them.
    fn is_live(self) -> bool {
        matches!(self, Self::LastSeen)
    }
}

/// Per-device attempt bookkeeping. In-memory only; reset by restart.
#[derive(Debug, Default, Clone, Copy)]
struct AttemptState {
    in_flight: bool,
    attempts: u32,
}

/// The configuration manager extension.
///
/// # Examples
///
/// ```no_run
/// use meshbridge::extension::{Configure, Extension, ExtensionContext};
///
/// # async fn example(context: ExtensionContext) -> meshbridge::Result<()> {
/// let configure = Configure::new(context);
/// configure.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Configure {
    inner: Arc<ConfigureInner>,
}

struct ConfigureInner {
    context: ExtensionContext,
    attempts: Mutex<HashMap<DeviceAddress, AttemptState>>,
}

impl Configure {
    /// Creates the extension with the shared collaborators.
    #[must_use]
    pub fn new(context: ExtensionContext) -> Self {
        Self {
            inner: Arc::new(ConfigureInner {
                context,
                attempts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the number of failed attempts recorded for a device.
    #[must_use]
    pub fn attempt_count(&self, address: &DeviceAddress) -> u32 {
        self.inner
            .attempts
            .lock()
            .get(address)
            .map_or(0, |s| s.attempts)
    }
}

#[async_trait]
impl Extension for Configure {
    fn name(&self) -> &'static str {
        "configure"
    }

    fn context(&self) -> &ExtensionContext {
        &self.inner.context
    }

    async fn start(&self) -> Result<()> {
        let bus = self.inner.context.event_bus().clone();
        let name = self.name();

        let inner = Arc::clone(&self.inner);
        bus.subscribe(EventKind::DeviceJoined, name, move |event| {
            if let BridgeEvent::DeviceJoined { address } = event {
                let inner = Arc::clone(&inner);
                let address = address.clone();
                tokio::spawn(async move { inner.on_rejoin(address, Trigger::Joined).await });
            }
            Ok(())
        });

        let inner = Arc::clone(&self.inner);
        bus.subscribe(EventKind::ReconfigureRequested, name, move |event| {
            if let BridgeEvent::ReconfigureRequested { address } = event {
                let inner = Arc::clone(&inner);
                let address = address.clone();
                tokio::spawn(async move { inner.on_rejoin(address, Trigger::Reconfigure).await });
            }
            Ok(())
        });

        let inner = Arc::clone(&self.inner);
        bus.subscribe(EventKind::DeviceInterviewCompleted, name, move |event| {
            if let BridgeEvent::DeviceInterviewCompleted { address } = event {
                let inner = Arc::clone(&inner);
                let address = address.clone();
                tokio::spawn(async move {
                    let _ = inner
                        .try_configure(&address, Trigger::InterviewCompleted, false, false)
                        .await;
                });
            }
            Ok(())
        });

        let inner = Arc::clone(&self.inner);
        bus.subscribe(EventKind::DeviceLastSeenChanged, name, move |event| {
            if let BridgeEvent::DeviceLastSeenChanged { address } = event {
                let inner = Arc::clone(&inner);
                let address = address.clone();
                tokio::spawn(async move {
                    let _ = inner
                        .try_configure(&address, Trigger::LastSeen, false, false)
                        .await;
                });
            }
            Ok(())
        });

        let request_topic = namespaced(self.inner.context.transport().base_topic(), REQUEST_TOPIC);
        let inner = Arc::clone(&self.inner);
        bus.subscribe(EventKind::TransportMessageReceived, name, move |event| {
            if let BridgeEvent::TransportMessageReceived { topic, payload } = event
                && topic == &request_topic
            {
                let inner = Arc::clone(&inner);
                let payload = payload.clone();
                tokio::spawn(async move { inner.handle_request(payload).await });
            }
            Ok(())
        });

        self.inner
            .context
            .transport()
            .subscribe(&namespaced(
                self.inner.context.transport().base_topic(),
                REQUEST_TOPIC,
            ))
            .await?;

        // The sweep serializes itself with a fixed delay; it must not hold
        // up startup or other event handling.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.startup_sweep().await });

        Ok(())
    }
}

impl ConfigureInner {
    /// Configures every Router-class device, one at a time with a fixed
    /// delay in between.
    async fn startup_sweep(&self) {
        let routers: Vec<DeviceAddress> = self
            .context
            .devices()
            .devices()
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Router)
            .map(|d| d.address)
            .collect();

        tracing::debug!(count = routers.len(), "Starting configuration sweep");

        for (index, address) in routers.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(SWEEP_DELAY).await;
            }
            let _ = self
                .try_configure(address, Trigger::Sweep, false, false)
                .await;
        }
    }

    /// Join and reconfigure-request triggers: the device may have unbound
    /// its reporting, so the marker is cleared and persisted before the
    /// configuration path runs.
    async fn on_rejoin(&self, address: DeviceAddress, trigger: Trigger) {
        if self.context.devices().get(&address).is_some() {
            if let Err(e) = self.context.devices().set_configured(&address, None).await {
                tracing::warn!(device = %address, error = %e, "Failed to clear configured marker");
            }
        }
        let _ = self.try_configure(&address, trigger, false, false).await;
    }

    /// The configuration path: eligibility gates, concurrency gate, attempt.
    async fn try_configure(
        &self,
        address: &DeviceAddress,
        trigger: Trigger,
        force: bool,
        throw_error: bool,
    ) -> std::result::Result<(), ConfigureError> {
        let Some(device) = self.context.devices().get(address) else {
            return Ok(());
        };
        let Some(definition) = device.definition.clone() else {
            return Ok(());
        };
        let Some(routine) = definition.configure.clone() else {
            return Ok(());
        };

        if !force {
            if device.disabled || !device.interview_completed() {
                return Ok(());
            }
            // A device configured once stays configured until the marker is
            // cleared by a rejoin or an explicit reconfigure trigger.
            if device.configured.is_some() {
                return Ok(());
            }
        }

        // Not overridden by force: a forced request still cannot reach a
        // sleeping device.
        if device.kind == DeviceKind::EndDevice && !trigger.is_live() {
            return Ok(());
        }

        let coordinator = match self.context.devices().coordinator_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(device = %device.display_name(), error = %e, "Cannot configure device");
                return Ok(());
            }
        };

        {
            let mut attempts = self.attempts.lock();
            let state = attempts.entry(address.clone()).or_default();
            if state.in_flight {
                return Ok(());
            }
            if state.attempts >= MAX_ATTEMPTS && !force {
                return Ok(());
            }
            state.in_flight = true;
        }

        tracing::info!(device = %device.display_name(), "Configuring device");

        let outcome = match routine.configure(&device, &coordinator).await {
            Ok(()) => {
                if let Err(e) = self
                    .context
                    .devices()
                    .set_configured(address, Some(definition.configured_marker()))
                    .await
                {
                    tracing::warn!(device = %device.display_name(), error = %e, "Failed to persist configured marker");
                }
                self.context.event_bus().publish(&BridgeEvent::DevicesChanged);
                tracing::info!(device = %device.display_name(), "Successfully configured device");
                Ok(())
            }
            Err(e) => Err(e),
        };

        // in_flight is cleared whatever the attempt did.
        {
            let mut attempts = self.attempts.lock();
            if let Some(state) = attempts.get_mut(address) {
                state.in_flight = false;
            }
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                let attempt = {
                    let mut attempts = self.attempts.lock();
                    let state = attempts.entry(address.clone()).or_default();
                    state.attempts += 1;
                    state.attempts
                };
                tracing::error!(
                    device = %device.display_name(),
                    attempt,
                    error = %e,
                    "Failed to configure device"
                );
                if throw_error { Err(e) } else { Ok(()) }
            }
        }
    }

    /// Handles a message on the configure request topic and always publishes
    /// a response.
    async fn handle_request(&self, payload: String) {
        let (echo_id, target) = parse_request(&payload);

        let result = match &target {
            Some(id) => self.configure_by_id(id).await,
            None => Err(ConfigureError::Routine("Invalid payload".to_string())),
        };

        let mut response = serde_json::Map::new();
        if let Some(id) = echo_id {
            response.insert("id".to_string(), Value::String(id));
        }
        match result {
            Ok(()) => {
                response.insert("status".to_string(), json!("ok"));
            }
            Err(e) => {
                response.insert("status".to_string(), json!("error"));
                response.insert("error".to_string(), Value::String(e.to_string()));
            }
        }

        let topic = namespaced(self.context.transport().base_topic(), RESPONSE_TOPIC);
        let message = OutgoingMessage::new(topic, Value::Object(response).to_string());
        if let Err(e) = self.context.transport().publish(message).await {
            tracing::error!(error = %e, "Failed to publish configure response");
        }
    }

    async fn configure_by_id(&self, id: &str) -> std::result::Result<(), ConfigureError> {
        let device = self
            .context
            .devices()
            .resolve(id)
            .ok_or_else(|| ConfigureError::DeviceNotFound(id.to_string()))?;

        if !device
            .definition
            .as_ref()
            .is_some_and(crate::device::Definition::supports_configure)
        {
            return Err(ConfigureError::NotConfigurable(id.to_string()));
        }

        self.try_configure(&device.address, Trigger::Request, true, true)
            .await
    }
}

/// Parses a configure request payload.
///
/// Accepts a bare device identifier or a JSON object `{"id": ...}`. Returns
/// `(echo_id, target)`: `echo_id` is set only when the payload carried an
/// `id` field, and `target` is the identifier to resolve (or `None` when the
/// payload is unusable).
fn parse_request(payload: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::String(id)) => (None, Some(id)),
        Ok(Value::Object(map)) => match map.get("id").and_then(Value::as_str) {
            Some(id) => (Some(id.to_string()), Some(id.to_string())),
            None => (None, None),
        },
        // Anything else is taken verbatim as the identifier.
        _ => (None, Some(payload.to_string())),
    }
}
