// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory bus transport for tests and examples.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::TransportError;
use crate::event::EventBus;

use super::{OutgoingMessage, PublishHook, Transport, TransportShared};

/// An in-memory [`Transport`] implementation.
///
/// Behaves like the real client as far as the orchestration layer can tell:
/// it keeps a retained-message cache, runs publish hooks, and raises the
/// published/received bus events. Published messages are recorded for
/// inspection, and inbound traffic is simulated with
/// [`inject`](Self::inject).
pub struct InMemoryTransport {
    shared: TransportShared,
    published: Mutex<Vec<OutgoingMessage>>,
    subscriptions: RwLock<Vec<String>>,
}

impl InMemoryTransport {
    /// Creates a transport scoped under the given base topic.
    #[must_use]
    pub fn new(base_topic: impl Into<String>, bus: EventBus) -> Self {
        Self {
            shared: TransportShared::new(base_topic, bus),
            published: Mutex::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Simulates an inbound broker message.
    ///
    /// Updates the retained cache when `retained` is set and raises the
    /// received bus event if the topic matches a subscription.
    pub fn inject(&self, topic: &str, payload: &str, retained: bool) {
        self.shared.record_retained(topic, payload, retained);
        if self.is_subscribed(topic) {
            self.shared.emit_received(topic, payload);
        }
    }

    /// Seeds the retained cache directly, without raising events.
    pub fn seed_retained(&self, topic: &str, payload: &str) {
        self.shared.record_retained(topic, payload, true);
    }

    /// Returns every message published so far.
    #[must_use]
    pub fn published(&self) -> Vec<OutgoingMessage> {
        self.published.lock().clone()
    }

    /// Returns the most recent message published on the given topic.
    #[must_use]
    pub fn last_published_on(&self, topic: &str) -> Option<OutgoingMessage> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|m| m.topic == topic)
            .cloned()
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
    }
}

/// Matches a topic against a subscription pattern with the `#` wildcard.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/#") {
        topic == prefix || topic.starts_with(&format!("{prefix}/"))
    } else {
        pattern == topic
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn base_topic(&self) -> &str {
        self.shared.base_topic()
    }

    async fn publish(&self, mut message: OutgoingMessage) -> Result<(), TransportError> {
        self.shared.apply_hooks(&mut message);
        self.shared
            .record_retained(&message.topic, &message.payload, message.retained);
        self.published.lock().push(message.clone());
        self.shared.emit_published(&message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.write().push(topic.to_string());
        Ok(())
    }

    fn retained_messages(&self) -> Vec<(String, String)> {
        self.shared.retained_snapshot()
    }

    fn add_publish_hook(&self, hook: PublishHook) {
        self.shared.add_hook(hook);
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("base_topic", &self.base_topic())
            .field("published", &self.published.lock().len())
            .finish()
    }
}
