//! Run configuration.
//!
//! A run is bound to one device, one array length and one residency strategy.
//! [`StreamConfigBuilder`] validates the combination before any device is
//! touched.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::residency::Residency;

/// Default number of elements per array (2^25).
pub const DEFAULT_ARRAY_SIZE: usize = 33_554_432;

/// Parameters fixed for the lifetime of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Elements per array.
    pub array_size: usize,
    /// Index of the device in enumeration order.
    pub device_index: usize,
    /// Residency strategy for A, B and C.
    pub residency: Residency,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            array_size: DEFAULT_ARRAY_SIZE,
            device_index: 0,
            residency: Residency::DeviceOnly,
        }
    }
}

impl StreamConfig {
    /// Start building a configuration.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Check the configuration without touching a device.
    pub fn validate(&self) -> Result<()> {
        if self.array_size == 0 {
            return Err(StreamError::InvalidConfig(
                "array size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes used by one array of `element_size`-byte elements.
    pub fn array_bytes(&self, element_size: usize) -> u64 {
        self.array_size as u64 * element_size as u64
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug, Clone, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Set elements per array.
    pub fn array_size(mut self, array_size: usize) -> Self {
        self.config.array_size = array_size;
        self
    }

    /// Set device index.
    pub fn device_index(mut self, device_index: usize) -> Self {
        self.config.device_index = device_index;
        self
    }

    /// Set residency strategy.
    pub fn residency(mut self, residency: Residency) -> Self {
        self.config.residency = residency;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
