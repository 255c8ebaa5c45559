//! Memory residency strategies for the benchmark arrays.
//!
//! The strategy is picked once per run and fixed for the lifetime of the
//! stream. Backends branch on it when allocating and when reading back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Where A, B and C live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Residency {
    /// Device-exclusive memory. Host visibility needs an explicit transfer.
    #[default]
    DeviceOnly,
    /// Unified memory visible to host and device. Host access needs a barrier.
    Managed,
    /// Ordinary host memory the device reaches through page faults.
    /// Host access needs a barrier; no device allocation is made.
    HostPagefault,
}

impl Residency {
    /// All strategies, in reporting order.
    pub const ALL: [Residency; 3] = [
        Residency::DeviceOnly,
        Residency::Managed,
        Residency::HostPagefault,
    ];

    /// Readback requires an explicit bulk transfer.
    #[inline]
    pub fn requires_explicit_transfer(&self) -> bool {
        matches!(self, Residency::DeviceOnly)
    }

    /// Host may touch the arrays directly, after a synchronization barrier.
    #[inline]
    pub fn is_host_visible(&self) -> bool {
        !self.requires_explicit_transfer()
    }

    /// Arrays are carved out of device memory and count against its capacity.
    #[inline]
    pub fn uses_device_allocation(&self) -> bool {
        !matches!(self, Residency::HostPagefault)
    }

    /// Label printed in run headers.
    pub fn label(&self) -> &'static str {
        match self {
            Residency::DeviceOnly => "DEFAULT",
            Residency::Managed => "MANAGED",
            Residency::HostPagefault => "PAGEFAULT",
        }
    }
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Residency {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "device" | "device-only" | "default" => Ok(Residency::DeviceOnly),
            "managed" | "unified" => Ok(Residency::Managed),
            "pagefault" | "host-pagefault" | "host" => Ok(Residency::HostPagefault),
            other => Err(StreamError::InvalidConfig(format!(
                "Unknown residency '{}'. Valid options: device, managed, pagefault",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("device".parse::<Residency>().unwrap(), Residency::DeviceOnly);
        assert_eq!("MANAGED".parse::<Residency>().unwrap(), Residency::Managed);
        assert_eq!(
            "pagefault".parse::<Residency>().unwrap(),
            Residency::HostPagefault
        );
        assert!("pinned".parse::<Residency>().is_err());
    }

    #[test]
    fn test_properties() {
        assert!(Residency::DeviceOnly.requires_explicit_transfer());
        assert!(Residency::Managed.is_host_visible());
        assert!(Residency::Managed.uses_device_allocation());
        assert!(!Residency::HostPagefault.uses_device_allocation());
        assert_eq!(Residency::default(), Residency::DeviceOnly);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Residency::HostPagefault).unwrap();
        assert_eq!(json, "\"host-pagefault\"");
    }
}
