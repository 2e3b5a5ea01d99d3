// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus-transport facade.
//!
//! The wire transport (connection handling, QoS, persistence of retained
//! messages) is an external collaborator; this module defines the seam the
//! orchestration layer talks through. [`MqttTransport`] is the production
//! implementation over an MQTT broker; [`InMemoryTransport`] backs tests and
//! examples.
//!
//! All traffic is scoped under a base topic namespace. Publishing raises a
//! [`BridgeEvent::TransportMessagePublished`](crate::event::BridgeEvent)
//! on the event bus; inbound messages on subscribed topics raise
//! [`BridgeEvent::TransportMessageReceived`](crate::event::BridgeEvent).

mod memory;
#[cfg(feature = "mqtt")]
mod mqtt;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::TransportError;
use crate::event::{BridgeEvent, EventBus};

pub use memory::InMemoryTransport;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttTransport, MqttTransportBuilder};

/// Metadata attached to an outgoing bus message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// Whether this message carries a consolidated entity state.
    ///
    /// The sync gateway skips these on the transport-publish path because
    /// they are delivered through the entity-state event instead.
    pub entity_state: bool,
}

/// An outgoing bus message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Full topic (already namespaced).
    pub topic: String,
    /// Payload text.
    pub payload: String,
    /// Whether the broker should retain the message.
    pub retained: bool,
    /// Message metadata.
    pub meta: MessageMeta,
}

impl OutgoingMessage {
    /// Creates a non-retained message without metadata flags.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
            meta: MessageMeta::default(),
        }
    }

    /// Marks the message as retained.
    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }

    /// Flags the message as carrying a consolidated entity state.
    #[must_use]
    pub fn entity_state(mut self) -> Self {
        self.meta.entity_state = true;
        self
    }
}

/// Hook observing (and possibly transforming) a message about to be
/// published.
///
/// Hooks run before the wire dispatch. They may rewrite the payload, e.g. to
/// redact fields from outgoing entity states, but cannot veto the publish.
pub type PublishHook = Arc<dyn Fn(&mut OutgoingMessage) + Send + Sync>;

/// The bus-transport seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the base topic namespace all traffic is scoped under.
    fn base_topic(&self) -> &str;

    /// Publishes a message, running publish hooks first.
    ///
    /// # Errors
    ///
    /// Returns an error when the wire dispatch fails.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Subscribes to a topic so inbound messages raise bus events.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker rejects the subscription.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Returns a snapshot of the retained topic→payload mapping.
    #[must_use]
    fn retained_messages(&self) -> Vec<(String, String)>;

    /// Registers a publish-inspection hook.
    fn add_publish_hook(&self, hook: PublishHook);
}

/// Joins the base namespace and a namespace-relative topic.
#[must_use]
pub fn namespaced(base_topic: &str, topic: &str) -> String {
    format!("{base_topic}/{topic}")
}

/// Plumbing shared by transport implementations: the retained cache, the
/// publish-hook list, and bus-event emission.
pub(crate) struct TransportShared {
    base_topic: String,
    bus: EventBus,
    retained: RwLock<HashMap<String, String>>,
    hooks: RwLock<Vec<PublishHook>>,
}

impl TransportShared {
    pub(crate) fn new(base_topic: impl Into<String>, bus: EventBus) -> Self {
        Self {
            base_topic: base_topic.into(),
            bus,
            retained: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub(crate) fn add_hook(&self, hook: PublishHook) {
        self.hooks.write().push(hook);
    }

    /// Runs every registered hook over the message, in registration order.
    pub(crate) fn apply_hooks(&self, message: &mut OutgoingMessage) {
        let hooks: Vec<PublishHook> = self.hooks.read().iter().cloned().collect();
        for hook in hooks {
            hook(message);
        }
    }

    /// Records the retained mapping entry for a message, if retained.
    ///
    /// An empty retained payload clears the topic, mirroring broker
    /// semantics.
    pub(crate) fn record_retained(&self, topic: &str, payload: &str, retained: bool) {
        if !retained {
            return;
        }
        let mut map = self.retained.write();
        if payload.is_empty() {
            map.remove(topic);
        } else {
            map.insert(topic.to_string(), payload.to_string());
        }
    }

    pub(crate) fn retained_snapshot(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .retained
            .read()
            .iter()
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub(crate) fn emit_published(&self, message: &OutgoingMessage) {
        self.bus.publish(&BridgeEvent::TransportMessagePublished {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            meta: message.meta,
        });
    }

    pub(crate) fn emit_received(&self, topic: &str, payload: &str) {
        self.bus.publish(&BridgeEvent::TransportMessageReceived {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_joins_with_slash() {
        assert_eq!(namespaced("meshbridge", "bridge/state"), "meshbridge/bridge/state");
    }

    #[test]
    fn outgoing_message_builders() {
        let message = OutgoingMessage::new("meshbridge/plug", "{}").retained().entity_state();
        assert!(message.retained);
        assert!(message.meta.entity_state);
    }

    #[test]
    fn record_retained_ignores_non_retained() {
        let shared = TransportShared::new("meshbridge", EventBus::new());
        shared.record_retained("meshbridge/plug", "{}", false);
        assert!(shared.retained_snapshot().is_empty());
    }

    #[test]
    fn record_retained_empty_payload_clears_topic() {
        let shared = TransportShared::new("meshbridge", EventBus::new());
        shared.record_retained("meshbridge/plug", "{}", true);
        assert_eq!(shared.retained_snapshot().len(), 1);

        shared.record_retained("meshbridge/plug", "", true);
        assert!(shared.retained_snapshot().is_empty());
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let shared = TransportShared::new("meshbridge", EventBus::new());
        shared.add_hook(Arc::new(|message| message.payload.push('a')));
        shared.add_hook(Arc::new(|message| message.payload.push('b')));

        let mut message = OutgoingMessage::new("t", "");
        shared.apply_hooks(&mut message);
        assert_eq!(message.payload, "ab");
    }
}
