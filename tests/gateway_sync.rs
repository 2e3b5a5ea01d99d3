// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests for the realtime sync gateway, over real sockets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use meshbridge::config::{GatewayConfig, LastSeenFormat};
use meshbridge::device::{Device, DeviceAddress, DeviceKind, DeviceRegistry};
use meshbridge::event::{BridgeEvent, EventBus};
use meshbridge::extension::{Extension, ExtensionCallbacks, ExtensionContext};
use meshbridge::gateway::SyncGateway;
use meshbridge::state::StateStore;
use meshbridge::transport::{InMemoryTransport, OutgoingMessage, Transport};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

struct Harness {
    bus: EventBus,
    transport: Arc<InMemoryTransport>,
    registry: DeviceRegistry,
    states: Arc<StateStore>,
    gateway: Arc<SyncGateway>,
    // Keeps the asset directories alive for the gateway's lifetime.
    _assets: tempfile::TempDir,
}

async fn start_gateway(configure: impl FnOnce(GatewayConfig) -> GatewayConfig) -> Harness {
    let assets = tempfile::tempdir().unwrap();
    let asset_root = assets.path().join("dist");
    let icon_root = assets.path().join("icons");
    std::fs::create_dir_all(&asset_root).unwrap();
    std::fs::create_dir_all(&icon_root).unwrap();
    std::fs::write(asset_root.join("index.html"), "<html>bridge</html>").unwrap();
    std::fs::write(asset_root.join("app.3f9c2b.js"), "console.log(1)").unwrap();
    std::fs::write(icon_root.join("plug.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let bus = EventBus::new();
    let transport = Arc::new(InMemoryTransport::new("meshbridge", bus.clone()));
    let registry = DeviceRegistry::new();
    let states = Arc::new(StateStore::new());

    let context = ExtensionContext::new(
        registry.clone(),
        transport.clone(),
        states.clone(),
        bus.clone(),
        ExtensionCallbacks::noop(),
    );

    let config = configure(
        GatewayConfig::default()
            .with_host("127.0.0.1")
            .with_port(0)
            .with_asset_root(&asset_root)
            .with_icon_root(&icon_root),
    );

    let gateway = Arc::new(SyncGateway::new(context, config));
    gateway.start().await.unwrap();

    Harness {
        bus,
        transport,
        registry,
        states,
        gateway,
        _assets: assets,
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(harness: &Harness, path_and_query: &str) -> WsClient {
    let addr = harness.gateway.local_addr().expect("gateway should be bound");
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path_and_query}"))
        .await
        .expect("WebSocket upgrade should succeed");
    client
}

async fn next_message(client: &mut WsClient) -> Message {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended unexpectedly")
        .expect("frame should be readable")
}

async fn next_json(client: &mut WsClient) -> Value {
    let message = next_message(client).await;
    let text = message.to_text().expect("expected a text frame");
    serde_json::from_str(text).expect("frame should be JSON")
}

/// Minimal HTTP/1.1 GET over a raw socket, for the static asset surface.
async fn http_get(harness: &Harness, path: &str) -> (u16, String, String) {
    let addr = harness.gateway.local_addr().unwrap();
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let response = String::from_utf8_lossy(&raw).to_string();

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let (head, body) = response.split_once("\r\n\r\n").unwrap_or((response.as_str(), ""));
    let cache_control = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("cache-control")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    (status, cache_control, body.to_string())
}

mod authorization {
    use super::*;

    #[tokio::test]
    async fn wrong_token_closes_with_4401_and_no_traffic() {
        let harness = start_gateway(|c| c.with_auth_token("secret")).await;
        // Retained state that an authorized client would receive.
        harness.transport.seed_retained("meshbridge/bridge/info", "{}");

        let mut client = connect(&harness, "/api?token=wrong").await;
        let message = next_message(&mut client).await;
        let Message::Close(Some(frame)) = message else {
            panic!("expected an immediate close, got {message:?}");
        };
        assert_eq!(u16::from(frame.code), 4401);
        assert_eq!(harness.gateway.client_count(), 0);
    }

    #[tokio::test]
    async fn matching_token_is_accepted() {
        let harness = start_gateway(|c| c.with_auth_token("secret")).await;
        harness.transport.seed_retained("meshbridge/bridge/info", "{}");

        let mut client = connect(&harness, "/api?token=secret").await;
        let frame = next_json(&mut client).await;
        assert_eq!(frame["topic"], "bridge/info");
    }
}

mod replay {
    use super::*;

    #[tokio::test]
    async fn retained_state_then_device_snapshots() {
        let harness = start_gateway(|c| c.with_last_seen(LastSeenFormat::EpochMillis)).await;

        harness
            .transport
            .seed_retained("meshbridge/bridge/info", r#"{"version":"2.1.0"}"#);
        harness
            .transport
            .seed_retained("meshbridge/bridge/state", "online");
        // Topics outside the namespace are not replayed.
        harness.transport.seed_retained("homeassistant/status", "online");

        let address = DeviceAddress::new("0x00124b0001");
        harness.registry.upsert(
            Device::new("0x00124b0001", DeviceKind::Router).with_friendly_name("hallway_plug"),
        );
        harness.registry.upsert(Device::new("0x0000", DeviceKind::Coordinator));
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        harness.registry.mark_last_seen(&address, seen, Some(84));
        harness
            .states
            .set(&address, json!({"state": "ON", "brightness": 120}));

        let mut client = connect(&harness, "/api").await;

        // Pass 1: retained messages, JSON decoded or passed through.
        let first = next_json(&mut client).await;
        let second = next_json(&mut client).await;
        let mut retained: Vec<(String, Value)> = vec![
            (first["topic"].as_str().unwrap().to_string(), first["payload"].clone()),
            (second["topic"].as_str().unwrap().to_string(), second["payload"].clone()),
        ];
        retained.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(retained[0].0, "bridge/info");
        assert_eq!(retained[0].1, json!({"version": "2.1.0"}));
        assert_eq!(retained[1].0, "bridge/state");
        assert_eq!(retained[1].1, json!("online"));

        // Pass 2: one snapshot per non-coordinator device.
        let snapshot = next_json(&mut client).await;
        assert_eq!(snapshot["topic"], "hallway_plug");
        assert_eq!(snapshot["payload"]["state"], "ON");
        assert_eq!(snapshot["payload"]["brightness"], 120);
        assert_eq!(snapshot["payload"]["linkquality"], 84);
        assert_eq!(
            snapshot["payload"]["last_seen"],
            json!(seen.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn last_seen_omitted_when_disabled() {
        let harness = start_gateway(|c| c).await;

        let address = DeviceAddress::new("0x01");
        harness
            .registry
            .upsert(Device::new("0x01", DeviceKind::Router).with_friendly_name("plug"));
        harness.registry.mark_last_seen(&address, Utc::now(), None);
        harness.states.set(&address, json!({"state": "OFF"}));

        let mut client = connect(&harness, "/api").await;
        let snapshot = next_json(&mut client).await;
        assert_eq!(snapshot["topic"], "plug");
        assert!(snapshot["payload"].get("last_seen").is_none());
    }
}

mod bridging {
    use super::*;

    #[tokio::test]
    async fn client_message_is_republished_into_the_bus() {
        let harness = start_gateway(|c| c).await;
        let mut client = connect(&harness, "/api").await;

        client
            .send(Message::Text(
                json!({"topic": "t", "payload": {"a": 1}}).to_string().into(),
            ))
            .await
            .unwrap();

        // The transport publish happens on the connection task; poll for it.
        let mut published = None;
        for _ in 0..50 {
            if let Some(message) = harness.transport.last_published_on("meshbridge/t") {
                published = Some(message);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let published = published.expect("client message should reach the transport");
        assert_eq!(published.payload, r#"{"a":1}"#);

        // The mirror loop echoes the publish back to the client.
        let echoed = next_json(&mut client).await;
        assert_eq!(echoed["topic"], "t");
        assert_eq!(echoed["payload"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn mirrors_bus_traffic_with_filtering() {
        let harness = start_gateway(|c| c).await;
        let mut client = connect(&harness, "/api").await;

        // Entity-state-flagged publishes are skipped on this path.
        harness
            .transport
            .publish(
                OutgoingMessage::new("meshbridge/hallway_plug", r#"{"state":"ON"}"#).entity_state(),
            )
            .await
            .unwrap();
        // Foreign-namespace topics are skipped.
        harness
            .transport
            .publish(OutgoingMessage::new("homeassistant/status", "online"))
            .await
            .unwrap();
        // This one is mirrored, namespace stripped.
        harness
            .transport
            .publish(OutgoingMessage::new("meshbridge/bridge/state", "online"))
            .await
            .unwrap();

        let frame = next_json(&mut client).await;
        assert_eq!(frame["topic"], "bridge/state");
        assert_eq!(frame["payload"], json!("online"));
    }

    #[tokio::test]
    async fn entity_states_are_forwarded_under_display_name() {
        let harness = start_gateway(|c| c).await;
        let mut client = connect(&harness, "/api").await;

        harness.bus.publish(&BridgeEvent::EntityStatePublished {
            address: DeviceAddress::new("0x01"),
            name: "hallway_plug".to_string(),
            state: json!({"state": "ON", "brightness": 200}),
        });

        let frame = next_json(&mut client).await;
        assert_eq!(frame["topic"], "hallway_plug");
        assert_eq!(frame["payload"], json!({"state": "ON", "brightness": 200}));
    }
}

mod shutdown {
    use super::*;

    #[tokio::test]
    async fn all_clients_receive_offline_before_termination() {
        let harness = start_gateway(|c| c).await;
        let mut first = connect(&harness, "/api").await;
        let mut second = connect(&harness, "/api").await;
        assert_eq!(harness.gateway.client_count(), 2);

        let gateway = Arc::clone(&harness.gateway);
        let stop = tokio::spawn(async move { gateway.stop().await });

        for client in [&mut first, &mut second] {
            let frame = next_json(client).await;
            assert_eq!(frame, json!({"topic": "bridge/state", "payload": {"state": "offline"}}));
            let message = next_message(client).await;
            assert!(matches!(message, Message::Close(_)), "got {message:?}");
        }

        stop.await.unwrap();
        assert_eq!(harness.gateway.client_count(), 0);
        assert!(harness.gateway.local_addr().is_none());
    }
}

mod http_surface {
    use super::*;

    #[tokio::test]
    async fn base_path_scoping_and_cache_headers() {
        let harness = start_gateway(|c| c.with_base_url("/bridge")).await;

        let (status, cache, body) = http_get(&harness, "/bridge/").await;
        assert_eq!(status, 200);
        assert_eq!(cache, "no-cache");
        assert!(body.contains("bridge"));

        let (status, cache, _) = http_get(&harness, "/bridge/app.3f9c2b.js").await;
        assert_eq!(status, 200);
        assert_eq!(cache, "public, max-age=31536000, immutable");

        let (status, _, _) = http_get(&harness, "/bridge/device_icons/plug.png").await;
        assert_eq!(status, 200);

        // Outside the base path: generic not-found.
        let (status, _, _) = http_get(&harness, "/").await;
        assert_eq!(status, 404);
        let (status, _, _) = http_get(&harness, "/api").await;
        assert_eq!(status, 404);

        // The WebSocket endpoint lives under the base path too.
        let mut client = connect(&harness, "/bridge/api").await;
        harness
            .transport
            .publish(OutgoingMessage::new("meshbridge/bridge/state", "online"))
            .await
            .unwrap();
        let frame = next_json(&mut client).await;
        assert_eq!(frame["topic"], "bridge/state");
    }

    #[tokio::test]
    async fn missing_tls_material_degrades_to_plain_http() {
        let harness = start_gateway(|c| {
            c.with_ssl("/nonexistent/cert.pem", "/nonexistent/key.pem")
        })
        .await;

        let (status, _, _) = http_get(&harness, "/").await;
        assert_eq!(status, 200);
    }
}
