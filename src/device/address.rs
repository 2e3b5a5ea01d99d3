// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device address type.

use std::fmt;

/// Stable network address of a mesh device.
///
/// This is a wrapper around the device's permanent network address (the
/// `0x`-prefixed hexadecimal form in practice) that provides a distinct type
/// for device identification, preventing accidental confusion with topics or
/// friendly names.
///
/// # Examples
///
/// ```
/// use meshbridge::device::DeviceAddress;
///
/// let address = DeviceAddress::new("0x00124b0001");
/// println!("Device: {}", address);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Creates a device address from its stable string form.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceAddress({})", self.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_from_str() {
        let address = DeviceAddress::new("0x00124b0001");
        assert_eq!(address.as_str(), "0x00124b0001");
    }

    #[test]
    fn equality() {
        let a = DeviceAddress::new("0x01");
        let b = DeviceAddress::new("0x01");
        let c = DeviceAddress::new("0x02");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_format() {
        let address = DeviceAddress::new("0x00124b0001");
        assert_eq!(address.to_string(), "0x00124b0001");
    }

    #[test]
    fn debug_format() {
        let address = DeviceAddress::new("0x01");
        assert_eq!(format!("{address:?}"), "DeviceAddress(0x01)");
    }

    #[test]
    fn hashable() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        let address = DeviceAddress::new("0x01");
        set.insert(address.clone());
        assert!(set.contains(&address));
    }

    #[test]
    fn string_round_trip() {
        let address = DeviceAddress::from("0x03".to_string());
        let back: String = address.into();
        assert_eq!(back, "0x03");
    }
}
