// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting bridge events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::Result;

use super::{BridgeEvent, EventKind};

/// Handler invoked for every published event of a subscribed kind.
pub type EventHandler = Arc<dyn Fn(&BridgeEvent) -> Result<()> + Send + Sync>;

/// Unique identifier for a subscription.
///
/// Returned by [`EventBus::subscribe`] and usable to remove that single
/// subscription later. IDs are unique within a bus's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

struct SubscriptionEntry {
    id: SubscriptionId,
    owner: String,
    handler: EventHandler,
}

/// Event bus for broadcasting bridge events to multiple subscribers.
///
/// Subscriptions are keyed by [`EventKind`] and tagged with an owner
/// identity so a component can revoke everything it registered in one call
/// ([`EventBus::unsubscribe_all`]), which is how extensions tear down.
///
/// Handlers run on the publisher's task, in registration order (best-effort
/// FIFO). A failing handler is logged and never prevents later handlers from
/// running. Handlers that need to do asynchronous work spawn it; `publish`
/// never waits for such work to finish, so publishers must not assume
/// subscriber side effects are visible once `publish` returns.
///
/// # Examples
///
/// ```
/// use meshbridge::event::{BridgeEvent, EventBus, EventKind};
///
/// let bus = EventBus::new();
///
/// bus.subscribe(EventKind::DevicesChanged, "example", |_event| {
///     println!("devices changed");
///     Ok(())
/// });
///
/// bus.publish(&BridgeEvent::DevicesChanged);
/// bus.unsubscribe_all("example");
/// ```
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<SubscriptionEntry>>>,
}

impl EventBus {
    /// Creates a new empty event bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes a handler to one event kind.
    ///
    /// The `owner` identity groups subscriptions for batch revocation via
    /// [`unsubscribe_all`](Self::unsubscribe_all). A subscriber may hold
    /// subscriptions across any number of event kinds under the same owner.
    pub fn subscribe<F>(&self, kind: EventKind, owner: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .push(SubscriptionEntry {
                id,
                owner: owner.into(),
                handler: Arc::new(handler),
            });
        id
    }

    /// Removes a single subscription.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        for entries in handlers.values_mut() {
            if let Some(index) = entries.iter().position(|e| e.id == id) {
                entries.remove(index);
                return true;
            }
        }
        false
    }

    /// Removes every subscription registered under the given owner identity.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut handlers = self.inner.handlers.write();
        let mut removed = 0;
        for entries in handlers.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.owner != owner);
            removed += before - entries.len();
        }
        removed
    }

    /// Publishes an event to all subscribers of its kind.
    ///
    /// Handlers run on the calling task in registration order. A handler
    /// failure is logged against its owner and does not stop delivery to the
    /// remaining handlers. If there are no subscribers, the event is silently
    /// discarded.
    pub fn publish(&self, event: &BridgeEvent) {
        // Clone the handlers out so a handler can (un)subscribe without
        // deadlocking against the registry lock.
        let entries: Vec<(String, EventHandler)> = {
            let handlers = self.inner.handlers.read();
            handlers
                .get(&event.kind())
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| (e.owner.clone(), Arc::clone(&e.handler)))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (owner, handler) in entries {
            if let Err(e) = handler(event) {
                tracing::error!(owner = %owner, error = %e, kind = ?event.kind(), "Event handler failed");
            }
        }
    }

    /// Returns the number of subscriptions for an event kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Returns the total number of subscriptions across all event kinds.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.inner.handlers.read().values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.total_subscriptions())
            .finish()
    }
}
