// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge event types.

use serde_json::Value;

use crate::device::DeviceAddress;
use crate::transport::MessageMeta;

/// Events carried by the [`EventBus`](super::EventBus).
///
/// These events decouple the device network and the bus transport from the
/// components reacting to them. Device lifecycle variants originate in the
/// external network stack; transport variants originate in the bus-transport
/// implementation.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A device joined (or rejoined) the mesh.
    DeviceJoined {
        /// Address of the joined device.
        address: DeviceAddress,
    },

    /// A device finished its interview.
    DeviceInterviewCompleted {
        /// Address of the interviewed device.
        address: DeviceAddress,
    },

    /// A device was heard from on the network.
    ///
    /// This is the only trigger that counts as a live network event for the
    /// sleepy-device rules of the configuration manager.
    DeviceLastSeenChanged {
        /// Address of the device.
        address: DeviceAddress,
    },

    /// An external trigger requested that a device be reconfigured.
    ReconfigureRequested {
        /// Address of the device.
        address: DeviceAddress,
    },

    /// The set of devices (or a device record) changed.
    DevicesChanged,

    /// The bus transport received a message on a subscribed topic.
    TransportMessageReceived {
        /// Full topic the message arrived on.
        topic: String,
        /// Raw payload.
        payload: String,
    },

    /// The bus transport finished publishing a message.
    TransportMessagePublished {
        /// Full topic the message was published on.
        topic: String,
        /// Published payload.
        payload: String,
        /// Message metadata.
        meta: MessageMeta,
    },

    /// A consolidated entity state was published for a device.
    EntityStatePublished {
        /// Address of the device.
        address: DeviceAddress,
        /// Display name of the device, used as the client-facing topic.
        name: String,
        /// The consolidated state payload.
        state: Value,
    },
}

/// Discriminant used to key event subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`BridgeEvent::DeviceJoined`].
    DeviceJoined,
    /// [`BridgeEvent::DeviceInterviewCompleted`].
    DeviceInterviewCompleted,
    /// [`BridgeEvent::DeviceLastSeenChanged`].
    DeviceLastSeenChanged,
    /// [`BridgeEvent::ReconfigureRequested`].
    ReconfigureRequested,
    /// [`BridgeEvent::DevicesChanged`].
    DevicesChanged,
    /// [`BridgeEvent::TransportMessageReceived`].
    TransportMessageReceived,
    /// [`BridgeEvent::TransportMessagePublished`].
    TransportMessagePublished,
    /// [`BridgeEvent::EntityStatePublished`].
    EntityStatePublished,
}

impl BridgeEvent {
    /// Returns the subscription key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceJoined { .. } => EventKind::DeviceJoined,
            Self::DeviceInterviewCompleted { .. } => EventKind::DeviceInterviewCompleted,
            Self::DeviceLastSeenChanged { .. } => EventKind::DeviceLastSeenChanged,
            Self::ReconfigureRequested { .. } => EventKind::ReconfigureRequested,
            Self::DevicesChanged => EventKind::DevicesChanged,
            Self::TransportMessageReceived { .. } => EventKind::TransportMessageReceived,
            Self::TransportMessagePublished { .. } => EventKind::TransportMessagePublished,
            Self::EntityStatePublished { .. } => EventKind::EntityStatePublished,
        }
    }

    /// Returns the device address associated with this event, if any.
    #[must_use]
    pub fn device_address(&self) -> Option<&DeviceAddress> {
        match self {
            Self::DeviceJoined { address }
            | Self::DeviceInterviewCompleted { address }
            | Self::DeviceLastSeenChanged { address }
            | Self::ReconfigureRequested { address }
            | Self::EntityStatePublished { address, .. } => Some(address),
            Self::DevicesChanged
            | Self::TransportMessageReceived { .. }
            | Self::TransportMessagePublished { .. } => None,
        }
    }

    /// Creates a device joined event.
    #[must_use]
    pub fn device_joined(address: impl Into<DeviceAddress>) -> Self {
        Self::DeviceJoined {
            address: address.into(),
        }
    }

    /// Creates a device interview completed event.
    #[must_use]
    pub fn interview_completed(address: impl Into<DeviceAddress>) -> Self {
        Self::DeviceInterviewCompleted {
            address: address.into(),
        }
    }

    /// Creates a last seen changed event.
    #[must_use]
    pub fn last_seen_changed(address: impl Into<DeviceAddress>) -> Self {
        Self::DeviceLastSeenChanged {
            address: address.into(),
        }
    }

    /// Creates a reconfigure requested event.
    #[must_use]
    pub fn reconfigure_requested(address: impl Into<DeviceAddress>) -> Self {
        Self::ReconfigureRequested {
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            BridgeEvent::device_joined("0x01").kind(),
            EventKind::DeviceJoined
        );
        assert_eq!(BridgeEvent::DevicesChanged.kind(), EventKind::DevicesChanged);
        assert_eq!(
            BridgeEvent::last_seen_changed("0x01").kind(),
            EventKind::DeviceLastSeenChanged
        );
    }

    #[test]
    fn device_address_extraction() {
        let event = BridgeEvent::reconfigure_requested("0x01");
        assert_eq!(event.device_address().unwrap().as_str(), "0x01");

        assert!(BridgeEvent::DevicesChanged.device_address().is_none());
    }

    #[test]
    fn transport_events_have_no_device() {
        let event = BridgeEvent::TransportMessageReceived {
            topic: "meshbridge/bridge/request/device/configure".to_string(),
            payload: "{}".to_string(),
        };
        assert!(event.device_address().is_none());
        assert_eq!(event.kind(), EventKind::TransportMessageReceived);
    }
}
