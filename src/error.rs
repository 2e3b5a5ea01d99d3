// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `meshbridge` library.
//!
//! This module provides a comprehensive error hierarchy for handling failures
//! across the library: device configuration, bus-transport communication,
//! gateway I/O, and payload parsing.

use thiserror::Error;

/// The main error type for this library.
///
/// This enum encompasses all possible errors that can occur while bridging
/// the device mesh to the message bus and to connected clients.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while configuring a device.
    #[error("configure error: {0}")]
    Configure(#[from] ConfigureError),

    /// Error occurred during bus-transport communication.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error occurred in the realtime sync gateway.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Error occurred while parsing a payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device was not found in the registry.
    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    /// No coordinator is known to the device registry.
    #[error("no coordinator device is known")]
    NoCoordinator,
}

/// Errors related to device configuration attempts.
///
/// The request/response bus channel surfaces these as error strings; all
/// other trigger paths absorb and log them.
#[derive(Debug, Error)]
pub enum ConfigureError {
    /// The requested device does not exist.
    #[error("Device '{0}' does not exist")]
    DeviceNotFound(String),

    /// The device's definition supplies no configuration routine.
    #[error("Device '{0}' cannot be configured")]
    NotConfigurable(String),

    /// The device's configuration routine failed.
    #[error("{0}")]
    Routine(String),
}

/// Errors related to bus-transport communication.
#[derive(Debug, Error)]
pub enum TransportError {
    /// MQTT connection or communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Persisting a device record failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// Errors related to the HTTP/WebSocket gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Binding the listen socket failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The address that could not be bound.
        address: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Loading the TLS certificate or key failed.
    #[error("failed to load TLS material: {0}")]
    Tls(std::io::Error),

    /// The configured base URL is not a valid path prefix.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    /// The gateway was started twice without an intervening stop.
    #[error("gateway is already running")]
    AlreadyRunning,
}

/// Errors related to parsing payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
