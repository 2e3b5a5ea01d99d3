// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT bus transport.
//!
//! Production [`Transport`] implementation over an MQTT broker. The
//! connection is persistent; a background task drives the client event loop,
//! feeding inbound messages and the retained cache.
//!
//! # Examples
//!
//! ```no_run
//! use meshbridge::event::EventBus;
//! use meshbridge::transport::{MqttTransport, Transport};
//!
//! # async fn example() -> meshbridge::Result<()> {
//! let bus = EventBus::new();
//! let transport = MqttTransport::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .base_topic("meshbridge")
//!     .connect(bus)
//!     .await?;
//!
//! transport.subscribe("meshbridge/bridge/request/#").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::error::TransportError;
use crate::event::EventBus;

use super::{OutgoingMessage, PublishHook, Transport, TransportShared};

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Builder for an [`MqttTransport`] connection.
#[derive(Debug, Clone)]
pub struct MqttTransportBuilder {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    base_topic: String,
    keep_alive: Duration,
}

impl Default for MqttTransportBuilder {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            credentials: None,
            base_topic: "meshbridge".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl MqttTransportBuilder {
    /// Sets the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the broker credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the base topic namespace.
    #[must_use]
    pub fn base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = base_topic.into();
        self
    }

    /// Sets the MQTT keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Connects to the broker and spawns the event-loop task.
    ///
    /// # Errors
    ///
    /// Returns an error when the host is empty.
    pub async fn connect(self, bus: EventBus) -> Result<MqttTransport, TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "broker host must not be empty".to_string(),
            ));
        }

        let client_id = format!(
            "meshbridge-{}",
            CLIENT_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let inner = Arc::new(MqttInner {
            shared: TransportShared::new(self.base_topic, bus),
            client,
            connected: AtomicBool::new(false),
        });

        spawn_event_loop(Arc::clone(&inner), event_loop);

        Ok(MqttTransport { inner })
    }
}

struct MqttInner {
    shared: TransportShared,
    client: AsyncClient,
    connected: AtomicBool,
}

/// MQTT-backed bus transport.
///
/// Cheaply cloneable (via `Arc`); all clones share one broker connection.
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttInner>,
}

impl MqttTransport {
    /// Creates a new builder for configuring the transport.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }
}

fn spawn_event_loop(inner: Arc<MqttInner>, mut event_loop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    inner.connected.store(true, Ordering::Release);
                    tracing::info!("Connected to MQTT broker");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    inner
                        .shared
                        .record_retained(&publish.topic, &payload, publish.retain);
                    inner.shared.emit_received(&publish.topic, &payload);
                }
                Ok(_) => {}
                Err(e) => {
                    if inner.connected.swap(false, Ordering::AcqRel) {
                        tracing::warn!(error = %e, "Lost connection to MQTT broker");
                    }
                    // The event loop reconnects on the next poll; back off so
                    // an unreachable broker does not spin.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });
}

#[async_trait]
impl Transport for MqttTransport {
    fn base_topic(&self) -> &str {
        self.inner.shared.base_topic()
    }

    async fn publish(&self, mut message: OutgoingMessage) -> Result<(), TransportError> {
        self.inner.shared.apply_hooks(&mut message);
        self.inner
            .client
            .publish(
                message.topic.as_str(),
                QoS::AtLeastOnce,
                message.retained,
                message.payload.as_bytes().to_vec(),
            )
            .await?;
        self.inner
            .shared
            .record_retained(&message.topic, &message.payload, message.retained);
        self.inner.shared.emit_published(&message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.inner.client.subscribe(topic, QoS::AtLeastOnce).await?;
        tracing::debug!(topic = %topic, "Subscribed to transport topic");
        Ok(())
    }

    fn retained_messages(&self) -> Vec<(String, String)> {
        self.inner.shared.retained_snapshot()
    }

    fn add_publish_hook(&self, hook: PublishHook) {
        self.inner.shared.add_hook(hook);
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("base_topic", &self.base_topic())
            .field("connected", &self.is_connected())
            .finish()
    }
}
