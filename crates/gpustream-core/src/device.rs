//! Device description shared by all backends.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::launch::dot_num_blocks;

/// Static properties of an enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Index in enumeration order.
    pub index: usize,
    /// Device name.
    pub name: String,
    /// Parallel processor count (SMs, CUs, or host worker threads).
    pub compute_units: usize,
    /// Total device memory in bytes.
    pub total_memory: u64,
}

impl DeviceInfo {
    /// Number of groups used by the dot-product reduction on this device.
    pub fn dot_num_blocks(&self) -> usize {
        dot_num_blocks(self.compute_units)
    }

    /// Ensure three arrays of `array_size` elements of `element_size` bytes fit.
    ///
    /// Returns the number of bytes the three arrays occupy.
    pub fn check_capacity(&self, array_size: usize, element_size: usize) -> Result<u64> {
        let required = (array_size as u128) * (element_size as u128) * 3;
        if required > self.total_memory as u128 {
            return Err(StreamError::InsufficientMemory {
                required: u64::try_from(required).unwrap_or(u64::MAX),
                available: self.total_memory,
            });
        }
        Ok(required as u64)
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.index, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(total_memory: u64) -> DeviceInfo {
        DeviceInfo {
            index: 0,
            name: "test".to_string(),
            compute_units: 4,
            total_memory,
        }
    }

    #[test]
    fn test_capacity_fits_exactly() {
        assert_eq!(info(3 * 8 * 100).check_capacity(100, 8).unwrap(), 2400);
    }

    #[test]
    fn test_capacity_exceeded() {
        let err = info(2399).check_capacity(100, 8).unwrap_err();
        assert_eq!(
            err,
            StreamError::InsufficientMemory {
                required: 2400,
                available: 2399
            }
        );
    }

    #[test]
    fn test_capacity_no_overflow() {
        assert!(info(u64::MAX).check_capacity(usize::MAX, 8).is_err());
    }

    #[test]
    fn test_dot_blocks() {
        assert_eq!(info(0).dot_num_blocks(), 16);
        assert_eq!(info(0).to_string(), "0: test");
    }
}
