// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device model and registry.
//!
//! A [`Device`] is this library's view of a mesh participant: its stable
//! [`DeviceAddress`], its classification, its interview progress, and the
//! optional [`Definition`] the capability catalog resolved for it. Devices
//! are owned by the [`DeviceRegistry`], which stands in for the external
//! network stack; orchestration components only read devices and mutate the
//! `configured` marker through the registry.

mod address;
mod definition;
mod registry;

use chrono::{DateTime, Utc};

pub use address::DeviceAddress;
pub use definition::{ConfigureRoutine, CoordinatorEndpoint, Definition};
pub use registry::{DeviceRegistry, DeviceStore};

/// Classification of a mesh participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceKind {
    /// The network coordinator itself.
    Coordinator,
    /// Mains-powered device that relays traffic; always reachable.
    Router,
    /// Battery-powered, often-sleeping leaf; reachable only in wake windows.
    EndDevice,
}

/// Interview progress for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InterviewState {
    /// The device joined but the interview has not started.
    Pending,
    /// The interview is running.
    InProgress,
    /// The interview completed successfully.
    Successful,
    /// The interview failed.
    Failed,
}

/// A device known to the mesh.
///
/// # Examples
///
/// ```
/// use meshbridge::device::{Device, DeviceKind};
///
/// let device = Device::new("0x00124b0001", DeviceKind::Router)
///     .with_friendly_name("hallway_plug");
/// assert_eq!(device.display_name(), "hallway_plug");
/// ```
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable network address.
    pub address: DeviceAddress,
    /// Optional user-assigned name.
    pub friendly_name: Option<String>,
    /// Device classification.
    pub kind: DeviceKind,
    /// Interview progress.
    pub interview: InterviewState,
    /// Capability descriptor resolved by the external catalog, if any.
    pub definition: Option<Definition>,
    /// Marker recording the configuration version applied to the device.
    /// Absent until the first successful configuration.
    pub configured: Option<String>,
    /// Whether the device is disabled by configuration.
    pub disabled: bool,
    /// When the device was last heard from.
    pub last_seen: Option<DateTime<Utc>>,
    /// Link quality of the last received frame, if known.
    pub link_quality: Option<u8>,
}

impl Device {
    /// Creates a device with the given address and kind.
    ///
    /// The device starts uninterviewed, without a definition, and without a
    /// `configured` marker.
    #[must_use]
    pub fn new(address: impl Into<DeviceAddress>, kind: DeviceKind) -> Self {
        Self {
            address: address.into(),
            friendly_name: None,
            kind,
            interview: InterviewState::Pending,
            definition: None,
            configured: None,
            disabled: false,
            last_seen: None,
            link_quality: None,
        }
    }

    /// Sets the friendly name.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    /// Sets the interview state.
    #[must_use]
    pub fn with_interview(mut self, interview: InterviewState) -> Self {
        self.interview = interview;
        self
    }

    /// Sets the definition.
    #[must_use]
    pub fn with_definition(mut self, definition: Definition) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Marks the device as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Returns the friendly name if set, otherwise the network address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .unwrap_or_else(|| self.address.as_str())
    }

    /// Returns `true` if the device completed its interview.
    #[must_use]
    pub fn interview_completed(&self) -> bool {
        self.interview == InterviewState::Successful
    }

    /// Returns the configuration routine, if the definition supplies one.
    #[must_use]
    pub fn configure_routine(&self) -> Option<std::sync::Arc<dyn ConfigureRoutine>> {
        self.definition.as_ref().and_then(|d| d.configure.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_defaults() {
        let device = Device::new("0x01", DeviceKind::Router);

        assert_eq!(device.interview, InterviewState::Pending);
        assert!(device.definition.is_none());
        assert!(device.configured.is_none());
        assert!(!device.disabled);
    }

    #[test]
    fn display_name_uses_friendly_name() {
        let device = Device::new("0x01", DeviceKind::Router).with_friendly_name("hallway_plug");
        assert_eq!(device.display_name(), "hallway_plug");
    }

    #[test]
    fn display_name_falls_back_to_address() {
        let device = Device::new("0x00124b0001", DeviceKind::EndDevice);
        assert_eq!(device.display_name(), "0x00124b0001");
    }

    #[test]
    fn interview_completed_only_when_successful() {
        let device = Device::new("0x01", DeviceKind::Router);
        assert!(!device.interview_completed());

        let device = device.with_interview(InterviewState::Successful);
        assert!(device.interview_completed());
    }

    #[test]
    fn configure_routine_requires_definition() {
        let device = Device::new("0x01", DeviceKind::Router);
        assert!(device.configure_routine().is_none());

        let device = device.with_definition(Definition::new("m", "v", "d"));
        assert!(device.configure_routine().is_none());
    }
}
