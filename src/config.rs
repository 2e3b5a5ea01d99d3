// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for the sync gateway.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::GatewayError;

/// Rendering mode for the `last_seen` value merged into device snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastSeenFormat {
    /// Do not include `last_seen` in snapshots.
    #[default]
    Disable,
    /// ISO 8601 / RFC 3339 timestamp string.
    Iso8601,
    /// Milliseconds since the Unix epoch.
    EpochMillis,
}

impl LastSeenFormat {
    /// Formats a timestamp according to this mode.
    ///
    /// Returns `None` when last-seen reporting is disabled.
    #[must_use]
    pub fn format(&self, time: DateTime<Utc>) -> Option<Value> {
        match self {
            Self::Disable => None,
            Self::Iso8601 => Some(Value::String(time.to_rfc3339())),
            Self::EpochMillis => Some(Value::from(time.timestamp_millis())),
        }
    }
}

/// Configuration for the realtime sync gateway.
///
/// # Examples
///
/// ```
/// use meshbridge::config::GatewayConfig;
///
/// let config = GatewayConfig::default()
///     .with_port(8081)
///     .with_auth_token("secret")
///     .with_base_url("/bridge");
/// assert_eq!(config.port, 8081);
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen port.
    pub port: u16,
    /// Listen host. `None` binds all interfaces; a value starting with `/`
    /// or `.` is treated as a Unix socket path instead of a TCP bind.
    pub host: Option<String>,
    /// Token WebSocket upgrades must present; `None` disables authorization.
    pub auth_token: Option<String>,
    /// URL prefix all gateway routes are scoped under.
    pub base_url: String,
    /// Path to the TLS certificate file.
    pub ssl_cert: Option<PathBuf>,
    /// Path to the TLS key file.
    pub ssl_key: Option<PathBuf>,
    /// Root directory of the primary (frontend) static assets.
    pub asset_root: PathBuf,
    /// Root directory of the device icon assets.
    pub icon_root: PathBuf,
    /// Rendering mode for `last_seen` in device snapshots.
    pub last_seen: LastSeenFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: None,
            auth_token: None,
            base_url: "/".to_string(),
            ssl_cert: None,
            ssl_key: None,
            asset_root: PathBuf::from("dist"),
            icon_root: PathBuf::from("device_icons"),
            last_seen: LastSeenFormat::default(),
        }
    }
}

impl GatewayConfig {
    /// Sets the listen port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the listen host or Unix socket path.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the WebSocket authorization token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the URL prefix.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the TLS certificate and key file paths.
    #[must_use]
    pub fn with_ssl(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.ssl_cert = Some(cert.into());
        self.ssl_key = Some(key.into());
        self
    }

    /// Sets the primary static asset root.
    #[must_use]
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    /// Sets the device icon asset root.
    #[must_use]
    pub fn with_icon_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.icon_root = root.into();
        self
    }

    /// Sets the last-seen rendering mode.
    #[must_use]
    pub fn with_last_seen(mut self, format: LastSeenFormat) -> Self {
        self.last_seen = format;
        self
    }

    /// Returns the base URL normalized to a nestable path prefix: leading
    /// slash required, trailing slash stripped, `"/"` meaning the root.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured base URL does not start with `/`.
    pub fn normalized_base_url(&self) -> Result<String, GatewayError> {
        if !self.base_url.starts_with('/') {
            return Err(GatewayError::InvalidBaseUrl(self.base_url.clone()));
        }
        let trimmed = self.base_url.trim_end_matches('/');
        if trimmed.is_empty() {
            Ok("/".to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }

    /// Returns the Unix socket path when the host is path-like.
    #[must_use]
    pub fn unix_socket_path(&self) -> Option<&str> {
        self.host
            .as_deref()
            .filter(|h| h.starts_with('/') || h.starts_with('.'))
    }
}
