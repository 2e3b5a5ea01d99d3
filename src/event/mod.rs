// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system decoupling device-network events from the components that
//! react to them.
//!
//! The [`EventBus`] is a typed pub/sub hub: subscriptions are keyed by
//! [`EventKind`] and tagged with an owner identity, and handlers receive
//! [`BridgeEvent`] values. Every orchestration component subscribes in its
//! `start()` and revokes all of its subscriptions in `stop()`.
//!
//! # Examples
//!
//! ```
//! use meshbridge::event::{BridgeEvent, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//!
//! bus.subscribe(EventKind::DeviceJoined, "logger", |event| {
//!     println!("joined: {:?}", event.device_address());
//!     Ok(())
//! });
//!
//! bus.publish(&BridgeEvent::device_joined("0x00124b0001"));
//! ```

mod bridge_event;
mod event_bus;

pub use bridge_event::{BridgeEvent, EventKind};
pub use event_bus::{EventBus, EventHandler, SubscriptionId};
