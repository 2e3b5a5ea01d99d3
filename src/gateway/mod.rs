// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Realtime sync gateway.
//!
//! An HTTP server (optionally TLS) that serves the frontend assets and
//! upgrades `{base}/api` to a WebSocket endpoint. Connected clients get the
//! retained bus state and live device snapshots replayed, then bus traffic
//! is mirrored both ways: transport publishes and entity states flow to
//! every client, and client `{topic, payload}` messages are re-published
//! into the bus transport.

mod socket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::event::{BridgeEvent, EventKind};
use crate::extension::{Extension, ExtensionContext};
use crate::transport::Transport as _;

use socket::GatewayShared;

/// How long a graceful shutdown may take before remaining connections are
/// terminated forcibly.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The realtime sync gateway extension.
///
/// # Examples
///
/// ```no_run
/// use meshbridge::config::GatewayConfig;
/// use meshbridge::extension::{Extension, ExtensionContext};
/// use meshbridge::gateway::SyncGateway;
///
/// # async fn example(context: ExtensionContext) -> meshbridge::Result<()> {
/// let gateway = SyncGateway::new(context, GatewayConfig::default().with_port(8081));
/// gateway.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncGateway {
    shared: Arc<GatewayShared>,
    context: ExtensionContext,
    server: Mutex<Option<ServerTask>>,
}

struct ServerTask {
    join: JoinHandle<()>,
    shutdown: ShutdownSignal,
    local_addr: Option<SocketAddr>,
}

enum ShutdownSignal {
    Notify(Arc<Notify>),
    Handle(Handle),
}

impl SyncGateway {
    /// Creates the extension with the shared collaborators.
    #[must_use]
    pub fn new(context: ExtensionContext, config: GatewayConfig) -> Self {
        Self {
            shared: Arc::new(GatewayShared::new(context.clone(), config)),
            context,
            server: Mutex::new(None),
        }
    }

    /// Returns the bound TCP address, once started.
    ///
    /// `None` before `start()`, after `stop()`, and for Unix socket
    /// listeners.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().and_then(|s| s.local_addr)
    }

    /// Returns the number of connected WebSocket clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.client_count()
    }

    fn subscribe_bus(&self) {
        let bus = self.context.event_bus();
        let name = self.name();

        let shared = Arc::clone(&self.shared);
        bus.subscribe(EventKind::TransportMessagePublished, name, move |event| {
            if let BridgeEvent::TransportMessagePublished {
                topic,
                payload,
                meta,
            } = event
            {
                // Entity states arrive via the entity-state event; mirroring
                // them here too would deliver every state twice.
                if meta.entity_state {
                    return Ok(());
                }
                let prefix = format!("{}/", shared.context.transport().base_topic());
                if let Some(stripped) = topic.strip_prefix(&prefix) {
                    shared.broadcast(stripped, socket::decode_payload(payload));
                }
            }
            Ok(())
        });

        let shared = Arc::clone(&self.shared);
        bus.subscribe(EventKind::EntityStatePublished, name, move |event| {
            if let BridgeEvent::EntityStatePublished { name, state, .. } = event {
                shared.broadcast(name, state.clone());
            }
            Ok(())
        });
    }

    /// Resolves the TLS configuration, degrading to plain HTTP with a
    /// warning when the material is incomplete or missing on disk.
    async fn tls_config(&self) -> Result<Option<RustlsConfig>> {
        let config = &self.shared.config;
        match (&config.ssl_cert, &config.ssl_key) {
            (Some(cert), Some(key)) => {
                if cert.exists() && key.exists() {
                    let tls = RustlsConfig::from_pem_file(cert, key)
                        .await
                        .map_err(GatewayError::Tls)?;
                    Ok(Some(tls))
                } else {
                    tracing::warn!(
                        cert = %cert.display(),
                        key = %key.display(),
                        "TLS certificate or key not found on disk, serving without TLS"
                    );
                    Ok(None)
                }
            }
            (None, None) => Ok(None),
            _ => {
                tracing::warn!(
                    "Both ssl_cert and ssl_key must be configured to enable TLS, serving without TLS"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Extension for SyncGateway {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn context(&self) -> &ExtensionContext {
        &self.context
    }

    async fn start(&self) -> Result<()> {
        if self.server.lock().is_some() {
            return Err(GatewayError::AlreadyRunning.into());
        }

        let base_url = self.shared.config.normalized_base_url()?;
        let app = build_router(Arc::clone(&self.shared), &base_url);

        self.subscribe_bus();

        if let Some(path) = self.shared.config.unix_socket_path() {
            #[cfg(unix)]
            {
                let path = path.to_string();
                if self.shared.config.ssl_cert.is_some() || self.shared.config.ssl_key.is_some() {
                    tracing::warn!("TLS is not applied to Unix socket listeners");
                }
                // A stale socket file from a previous run blocks the bind.
                let _ = std::fs::remove_file(&path);
                let listener = tokio::net::UnixListener::bind(&path).map_err(|e| {
                    GatewayError::Bind {
                        address: path.clone(),
                        source: e,
                    }
                })?;

                let notify = Arc::new(Notify::new());
                let signal = Arc::clone(&notify);
                let join = tokio::spawn(async move {
                    let serve = axum::serve(listener, app)
                        .with_graceful_shutdown(async move { signal.notified().await });
                    if let Err(e) = serve.await {
                        tracing::error!(error = %e, "Gateway server failed");
                    }
                });

                *self.server.lock() = Some(ServerTask {
                    join,
                    shutdown: ShutdownSignal::Notify(notify),
                    local_addr: None,
                });
                tracing::info!(path = %path, "Gateway listening on Unix socket");
                return Ok(());
            }
            #[cfg(not(unix))]
            {
                return Err(GatewayError::Bind {
                    address: path.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix sockets are not supported on this platform",
                    ),
                }
                .into());
            }
        }

        let host = self
            .shared
            .config
            .host
            .clone()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let address = format!("{host}:{}", self.shared.config.port);

        let std_listener = std::net::TcpListener::bind(&address).map_err(|e| GatewayError::Bind {
            address: address.clone(),
            source: e,
        })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| GatewayError::Bind {
                address: address.clone(),
                source: e,
            })?;
        let local_addr = std_listener.local_addr().ok();

        let task = if let Some(tls) = self.tls_config().await? {
            let handle = Handle::new();
            let server_handle = handle.clone();
            let join = tokio::spawn(async move {
                let serve = axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(server_handle)
                    .serve(app.into_make_service());
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "Gateway server failed");
                }
            });
            tracing::info!(address = %address, "Gateway listening (TLS)");
            ServerTask {
                join,
                shutdown: ShutdownSignal::Handle(handle),
                local_addr,
            }
        } else {
            let listener = tokio::net::TcpListener::from_std(std_listener).map_err(|e| {
                GatewayError::Bind {
                    address: address.clone(),
                    source: e,
                }
            })?;
            let notify = Arc::new(Notify::new());
            let signal = Arc::clone(&notify);
            let join = tokio::spawn(async move {
                let serve = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { signal.notified().await });
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "Gateway server failed");
                }
            });
            tracing::info!(address = %address, "Gateway listening");
            ServerTask {
                join,
                shutdown: ShutdownSignal::Notify(notify),
                local_addr,
            }
        };

        *self.server.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        // Base revocation first, then resource cleanup.
        let removed = self.context.event_bus().unsubscribe_all(self.name());
        tracing::debug!(removed, "Revoked gateway bus subscriptions");

        self.shared.shutdown_clients();

        let Some(server) = self.server.lock().take() else {
            return;
        };
        match server.shutdown {
            ShutdownSignal::Notify(notify) => notify.notify_one(),
            ShutdownSignal::Handle(handle) => handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT)),
        }

        let mut join = server.join;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut join).await.is_err() {
            tracing::warn!("Gateway connections did not drain, terminating");
            join.abort();
            let _ = join.await;
        }
        tracing::info!("Gateway stopped");
    }
}

/// Builds the gateway router: the WebSocket endpoint plus the two static
/// asset sources, all scoped under the base URL. Requests outside the base
/// fall through to the default not-found handler.
fn build_router(shared: Arc<GatewayShared>, base_url: &str) -> Router {
    let static_routes = Router::new()
        .nest_service("/device_icons", ServeDir::new(&shared.config.icon_root))
        .fallback_service(ServeDir::new(&shared.config.asset_root))
        .layer(middleware::from_fn(cache_control));

    let app = Router::new()
        .route("/api", get(socket::ws_handler))
        .merge(static_routes)
        .with_state(shared);

    if base_url == "/" {
        app
    } else {
        Router::new().nest(base_url, app)
    }
}

/// Index documents must always revalidate; every other asset is
/// content-addressed by the frontend build and may be cached forever.
async fn cache_control(request: Request, next: Next) -> Response {
    let no_cache = is_index_path(request.uri().path());
    let mut response = next.run(request).await;
    let value = if no_cache {
        HeaderValue::from_static("no-cache")
    } else {
        HeaderValue::from_static("public, max-age=31536000, immutable")
    };
    response.headers_mut().insert(header::CACHE_CONTROL, value);
    response
}

fn is_index_path(path: &str) -> bool {
    path.is_empty() || path.ends_with('/') || path.ends_with("index.html")
}
