// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `meshbridge` - bridging a mesh of networked devices to an MQTT bus and to
//! live browser clients.
//!
//! This library implements the event-driven orchestration core of a device
//! bridge:
//!
//! - **Event bus**: a typed, multi-subscriber pub/sub hub decoupling
//!   device-network events from the components reacting to them.
//! - **Configuration manager**: a per-device state machine that decides when
//!   a device must be (re)configured, enforces a bounded-retry policy, and
//!   serializes configuration attempts per device.
//! - **Realtime sync gateway**: an HTTP/WebSocket server that replays
//!   retained bus state and live device snapshots to new clients and mirrors
//!   bus traffic to all of them in real time.
//!
//! The radio protocol stack, the device-definition catalog, and the MQTT
//! wire transport are external collaborators reached through the seams in
//! [`device`] and [`transport`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use meshbridge::config::GatewayConfig;
//! use meshbridge::device::DeviceRegistry;
//! use meshbridge::event::EventBus;
//! use meshbridge::extension::{Configure, Extension, ExtensionCallbacks, ExtensionContext};
//! use meshbridge::gateway::SyncGateway;
//! use meshbridge::state::StateStore;
//! use meshbridge::transport::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> meshbridge::Result<()> {
//!     let bus = EventBus::new();
//!     let transport = MqttTransport::builder()
//!         .host("192.168.1.50")
//!         .base_topic("meshbridge")
//!         .connect(bus.clone())
//!         .await?;
//!
//!     let context = ExtensionContext::new(
//!         DeviceRegistry::new(),
//!         Arc::new(transport),
//!         Arc::new(StateStore::new()),
//!         bus,
//!         ExtensionCallbacks::noop(),
//!     );
//!
//!     let configure = Configure::new(context.clone());
//!     configure.start().await?;
//!
//!     let gateway = SyncGateway::new(context, GatewayConfig::default().with_port(8080));
//!     gateway.start().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod extension;
pub mod gateway;
pub mod state;
pub mod transport;

pub use config::{GatewayConfig, LastSeenFormat};
pub use device::{Device, DeviceAddress, DeviceKind, DeviceRegistry, InterviewState};
pub use error::{ConfigureError, Error, GatewayError, ParseError, Result, TransportError};
pub use event::{BridgeEvent, EventBus, EventKind, SubscriptionId};
pub use extension::{Configure, Extension, ExtensionCallbacks, ExtensionContext};
pub use gateway::SyncGateway;
pub use state::StateStore;
pub use transport::{InMemoryTransport, OutgoingMessage, Transport};
#[cfg(feature = "mqtt")]
pub use transport::{MqttTransport, MqttTransportBuilder};
