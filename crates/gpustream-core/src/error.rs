//! Error types for gpustream.

use thiserror::Error;

/// Result type alias for gpustream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised while constructing or driving a benchmark stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Requested device index is outside the enumerated range.
    #[error("Invalid device index {index} ({count} device(s) available)")]
    InvalidDevice {
        /// Requested index.
        index: usize,
        /// Number of enumerated devices.
        count: usize,
    },

    /// The three arrays do not fit into device memory.
    #[error(
        "Device does not have enough memory for all 3 buffers: {required} bytes required, {available} bytes available"
    )]
    InsufficientMemory {
        /// Bytes needed for A, B and C together.
        required: u64,
        /// Total device memory.
        available: u64,
    },

    /// An allocation, dispatch, synchronization or transfer failed on the device.
    #[error("Device operation failed: {0}")]
    DeviceOperationFailed(String),

    /// Invalid run or launch configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Host slice length does not match the configured array size.
    #[error("Array length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Configured array size.
        expected: usize,
        /// Length of the host slice supplied.
        actual: usize,
    },

    /// Backend compiled out or not present on this machine.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),
}

impl StreamError {
    /// Shorthand for a [`StreamError::DeviceOperationFailed`].
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceOperationFailed(msg.into())
    }

    /// Whether the error invalidates the remainder of a run.
    ///
    /// Device errors leave the arrays in an unknown state, so any measurement
    /// taken afterwards is meaningless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceOperationFailed(_))
    }

    /// Whether the error was raised while constructing a stream.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDevice { .. }
                | Self::InsufficientMemory { .. }
                | Self::InvalidConfig(_)
                | Self::BackendUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StreamError::InvalidDevice { index: 3, count: 1 };
        assert_eq!(
            err.to_string(),
            "Invalid device index 3 (1 device(s) available)"
        );

        let err = StreamError::device("launch failed");
        assert_eq!(err.to_string(), "Device operation failed: launch failed");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StreamError::device("sync").is_fatal());
        assert!(!StreamError::InvalidDevice { index: 1, count: 0 }.is_fatal());
        assert!(StreamError::InsufficientMemory {
            required: 10,
            available: 1
        }
        .is_construction_error());
        assert!(!StreamError::LengthMismatch {
            expected: 4,
            actual: 3
        }
        .is_construction_error());
    }
}
