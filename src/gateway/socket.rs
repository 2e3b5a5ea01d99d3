// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! WebSocket session handling for the sync gateway.
//!
//! Each accepted connection gets an outbound queue; broadcast writes only
//! ever touch open connections and no per-client acknowledgment or
//! backpressure bookkeeping is kept. On connect the retained bus state and
//! the live device snapshots are replayed, then the session mirrors bus
//! traffic until either side closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::device::DeviceKind;
use crate::extension::ExtensionContext;
use crate::transport::{OutgoingMessage, Transport as _, namespaced};

/// Close code sent on upgrades with a bad token.
const UNAUTHORIZED_CLOSE_CODE: u16 = 4401;

/// State shared between the HTTP layer and every client session.
pub(super) struct GatewayShared {
    pub(super) context: ExtensionContext,
    pub(super) config: GatewayConfig,
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_client_id: AtomicU64,
}

impl GatewayShared {
    pub(super) fn new(context: ExtensionContext, config: GatewayConfig) -> Self {
        Self {
            context,
            config,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Checks an upgrade's query-string token against the configured one.
    pub(super) fn authorize(&self, token: Option<&str>) -> bool {
        match &self.config.auth_token {
            None => true,
            Some(expected) => token == Some(expected.as_str()),
        }
    }

    /// Sends a `{topic, payload}` frame to every open client.
    pub(super) fn broadcast(&self, topic: &str, payload: Value) {
        let message = frame(topic, &payload);
        let clients = self.clients.lock();
        for tx in clients.values() {
            let _ = tx.send(message.clone());
        }
    }

    /// Returns the number of connected clients.
    pub(super) fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Sends the final offline notification to every client and drops them.
    pub(super) fn shutdown_clients(&self) {
        let offline = frame("bridge/state", &json!({"state": "offline"}));
        let clients: Vec<_> = {
            let mut map = self.clients.lock();
            map.drain().collect()
        };
        for (_, tx) in clients {
            let _ = tx.send(offline.clone());
            let _ = tx.send(Message::Close(None));
        }
    }

    fn register_client(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(id, tx);
        id
    }

    fn remove_client(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    /// Replays retained bus state (pass 1) and live device snapshots
    /// (pass 2) into a freshly connected client's queue.
    fn replay(&self, tx: &mpsc::UnboundedSender<Message>) {
        let prefix = format!("{}/", self.context.transport().base_topic());

        for (topic, payload) in self.context.transport().retained_messages() {
            if let Some(stripped) = topic.strip_prefix(&prefix) {
                let _ = tx.send(frame(stripped, &decode_payload(&payload)));
            }
        }

        for device in self.context.devices().devices() {
            if device.kind == DeviceKind::Coordinator {
                continue;
            }
            let mut state = match self.context.states().get(&device.address) {
                Some(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            if let Some(last_seen) = device.last_seen
                && let Some(value) = self.config.last_seen.format(last_seen)
            {
                state.insert("last_seen".to_string(), value);
            }
            if let Some(lqi) = device.link_quality {
                state.insert("linkquality".to_string(), Value::from(lqi));
            }
            let _ = tx.send(frame(device.display_name(), &Value::Object(state)));
        }
    }
}

impl std::fmt::Debug for GatewayShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayShared")
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

/// Builds a `{topic, payload}` text frame.
pub(super) fn frame(topic: &str, payload: &Value) -> Message {
    let body = json!({"topic": topic, "payload": payload});
    Message::Text(body.to_string().into())
}

/// Decodes a bus payload: JSON-shaped payloads are parsed, everything else
/// passes through verbatim as a string.
pub(super) fn decode_payload(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()))
}

/// WebSocket upgrade handler.
pub(super) async fn ws_handler(
    State(shared): State<Arc<GatewayShared>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let authorized = shared.authorize(params.get("token").map(String::as_str));
    ws.on_upgrade(move |socket| handle_socket(socket, shared, authorized))
}

async fn handle_socket(mut socket: WebSocket, shared: Arc<GatewayShared>, authorized: bool) {
    if !authorized {
        tracing::warn!("Rejecting WebSocket client with invalid token");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: UNAUTHORIZED_CLOSE_CODE,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client_id = shared.register_client(tx.clone());
    tracing::info!(client_id, "WebSocket client connected");

    // Queue the replay before the writer starts so it precedes any live
    // broadcast for this client.
    shared.replay(&tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_client_message(&shared, text.as_str()).await,
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary and pong frames carry no bus messages.
            Ok(_) => {}
        }
    }

    shared.remove_client(client_id);
    drop(tx);
    let _ = writer.await;
    tracing::info!(client_id, "WebSocket client disconnected");
}

/// Bridges a client `{topic, payload}` message back into the bus transport,
/// exactly as if a local bus client had published it.
async fn handle_client_message(shared: &GatewayShared, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("Ignoring malformed client message");
        return;
    };
    let Some(topic) = value.get("topic").and_then(Value::as_str) else {
        tracing::debug!("Ignoring client message without topic");
        return;
    };
    let Some(payload) = value.get("payload") else {
        tracing::debug!("Ignoring client message without payload");
        return;
    };

    let body = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let full_topic = namespaced(shared.context.transport().base_topic(), topic);

    if let Err(e) = shared
        .context
        .transport()
        .publish(OutgoingMessage::new(full_topic, body))
        .await
    {
        tracing::error!(error = %e, "Failed to publish client message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceRegistry};
    use crate::event::EventBus;
    use crate::extension::ExtensionCallbacks;
    use crate::state::StateStore;
    use crate::transport::InMemoryTransport;

    fn shared_with(config: GatewayConfig) -> GatewayShared {
        let bus = EventBus::new();
        let context = ExtensionContext::new(
            DeviceRegistry::new(),
            Arc::new(InMemoryTransport::new("meshbridge", bus.clone())),
            Arc::new(StateStore::new()),
            bus,
            ExtensionCallbacks::noop(),
        );
        GatewayShared::new(context, config)
    }

    #[test]
    fn authorize_without_configured_token() {
        let shared = shared_with(GatewayConfig::default());
        assert!(shared.authorize(None));
        assert!(shared.authorize(Some("anything")));
    }

    #[test]
    fn authorize_with_configured_token() {
        let shared = shared_with(GatewayConfig::default().with_auth_token("secret"));
        assert!(shared.authorize(Some("secret")));
        assert!(!shared.authorize(Some("wrong")));
        assert!(!shared.authorize(None));
    }

    #[test]
    fn decode_payload_json_and_verbatim() {
        assert_eq!(decode_payload(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_payload("42"), json!(42));
        assert_eq!(decode_payload("online"), json!("online"));
    }

    #[test]
    fn frame_shape() {
        let message = frame("bridge/state", &json!({"state": "online"}));
        let Message::Text(text) = message else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["topic"], "bridge/state");
        assert_eq!(value["payload"]["state"], "online");
    }

    #[test]
    fn replay_strips_namespace_and_skips_foreign_topics() {
        let bus = EventBus::new();
        let memory = Arc::new(InMemoryTransport::new("meshbridge", bus.clone()));
        memory.seed_retained("meshbridge/bridge/info", r#"{"version":"1.0"}"#);
        memory.seed_retained("other/bridge/info", "x");

        let context = ExtensionContext::new(
            DeviceRegistry::new(),
            memory,
            Arc::new(StateStore::new()),
            bus,
            ExtensionCallbacks::noop(),
        );
        let shared = GatewayShared::new(context, GatewayConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.replay(&tx);
        drop(tx);

        let mut topics = Vec::new();
        while let Ok(message) = rx.try_recv() {
            let Message::Text(text) = message else { continue };
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            topics.push(value["topic"].as_str().unwrap().to_string());
        }
        assert_eq!(topics, vec!["bridge/info".to_string()]);
    }

    #[test]
    fn replay_skips_coordinator_snapshot() {
        let shared = shared_with(GatewayConfig::default());
        shared
            .context
            .devices()
            .upsert(Device::new("0x00", DeviceKind::Coordinator));
        shared
            .context
            .devices()
            .upsert(Device::new("0x01", DeviceKind::Router).with_friendly_name("plug"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.replay(&tx);
        drop(tx);

        let mut topics = Vec::new();
        while let Ok(message) = rx.try_recv() {
            let Message::Text(text) = message else { continue };
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            topics.push(value["topic"].as_str().unwrap().to_string());
        }
        assert_eq!(topics, vec!["plug".to_string()]);
    }

    #[test]
    fn broadcast_reaches_all_clients() {
        let shared = shared_with(GatewayConfig::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        shared.register_client(tx1);
        shared.register_client(tx2);

        shared.broadcast("plug", json!({"state": "ON"}));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn shutdown_clients_sends_offline_then_close() {
        let shared = shared_with(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.register_client(tx);

        shared.shutdown_clients();
        assert_eq!(shared.client_count(), 0);

        let Message::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected offline frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["topic"], "bridge/state");
        assert_eq!(value["payload"]["state"], "offline");

        assert!(matches!(rx.try_recv(), Ok(Message::Close(None))));
    }
}
