//! # gpustream
//!
//! Sustained memory bandwidth benchmark for accelerators.
//!
//! A run owns three equal-length arrays on one device and times a fixed
//! kernel suite over them: copy, mul, add, triad, nstream and dot. The arrays
//! can live in device-only memory, in managed (unified) memory, or in
//! ordinary host memory the device reads through page faults.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gpustream::prelude::*;
//!
//! let mut stream = StreamBuilder::new()
//!     .backend(Backend::Auto)
//!     .array_size(1 << 25)
//!     .residency(Residency::Managed)
//!     .build::<f64>()?;
//!
//! let report = run_benchmark(stream.as_mut(), &BenchConfig::default())?;
//! assert!(check_solution(&report, &BenchConfig::default()).passed());
//! ```
//!
//! ## Backends
//!
//! - **CPU** - Host-simulated device (always available)
//! - **CUDA** - NVIDIA GPUs (requires `cuda` feature)
//!
//! ```toml
//! [dependencies]
//! gpustream = { version = "0.1", features = ["cuda"] }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub mod bench;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

// Re-export core types
pub use gpustream_core::*;

// Re-export backends
pub use gpustream_cpu::CpuStream;
pub use gpustream_cuda::CudaStream;

use gpustream_cuda::CudaScalar;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bench::{
        run_benchmark, run_benchmark_with, BandwidthUnit, BenchConfig, BenchMode, BenchReport,
        KernelStats,
    };
    pub use crate::validation::{check_solution, SolutionCheck};
    pub use crate::{Backend, DeviceScalar, StreamBuilder};
    pub use gpustream_core::prelude::*;
}

/// Element types every compiled-in backend can run.
pub trait DeviceScalar: CudaScalar {}

impl<T: CudaScalar> DeviceScalar for T {}

/// Device backend a stream runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// CUDA when a device is present, otherwise CPU.
    #[default]
    Auto,
    /// Host-simulated device.
    Cpu,
    /// NVIDIA GPU.
    Cuda,
}

impl Backend {
    /// Resolve `Auto` to the backend that would be used.
    pub fn resolve(self) -> Backend {
        match self {
            Backend::Auto if gpustream_cuda::is_cuda_available() => Backend::Cuda,
            Backend::Auto => Backend::Cpu,
            other => other,
        }
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::Cpu => "cpu",
            Backend::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "cpu" | "host" => Ok(Backend::Cpu),
            "cuda" | "nvidia" => Ok(Backend::Cuda),
            other => Err(StreamError::InvalidConfig(format!(
                "unknown backend '{}' (expected auto, cpu or cuda)",
                other
            ))),
        }
    }
}

/// Builder for a benchmark stream on a chosen backend.
#[derive(Debug, Clone, Default)]
pub struct StreamBuilder {
    backend: Backend,
    config: StreamConfig,
}

impl StreamBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: StreamConfig) -> Self {
        Self {
            backend: Backend::default(),
            config,
        }
    }

    /// Set the backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of elements per array.
    pub fn array_size(mut self, array_size: usize) -> Self {
        self.config.array_size = array_size;
        self
    }

    /// Set the device index.
    pub fn device(mut self, index: usize) -> Self {
        self.config.device_index = index;
        self
    }

    /// Set the residency strategy.
    pub fn residency(mut self, residency: Residency) -> Self {
        self.config.residency = residency;
        self
    }

    /// Configuration the stream will be built from.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Build the stream.
    pub fn build<T: DeviceScalar>(self) -> Result<Box<dyn Stream<T>>> {
        self.config.validate()?;

        let backend = self.backend.resolve();
        if self.backend == Backend::Auto {
            info!("Auto-selected {} backend", backend);
        }

        let stream: Box<dyn Stream<T>> = match backend {
            Backend::Cuda => Box::new(CudaStream::<T>::from_config(&self.config)?),
            Backend::Cpu | Backend::Auto => Box::new(CpuStream::<T>::from_config(&self.config)?),
        };
        Ok(stream)
    }
}

/// List the devices of `backend`.
pub fn list_devices(backend: Backend) -> Result<Vec<DeviceInfo>> {
    match backend.resolve() {
        Backend::Cuda => gpustream_cuda::list_devices(),
        Backend::Cpu | Backend::Auto => gpustream_cpu::list_devices(),
    }
}

/// Driver version string of device `index` on `backend`.
pub fn device_driver(backend: Backend, index: usize) -> Result<String> {
    match backend.resolve() {
        Backend::Cuda => gpustream_cuda::device_driver(index),
        Backend::Cpu | Backend::Auto => gpustream_cpu::device_driver(index),
    }
}

/// Check availability of backends at runtime.
pub mod availability {
    use super::Backend;

    /// Check if CUDA is available.
    pub fn cuda() -> bool {
        gpustream_cuda::is_cuda_available()
    }

    /// Get list of available backends.
    pub fn available_backends() -> Vec<Backend> {
        let mut backends = vec![Backend::Cpu];
        if cuda() {
            backends.push(Backend::Cuda);
        }
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("CUDA".parse::<Backend>().unwrap(), Backend::Cuda);
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);
        assert!(matches!(
            "metal".parse::<Backend>(),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resolve_never_auto() {
        assert_ne!(Backend::Auto.resolve(), Backend::Auto);
        assert_eq!(Backend::Cpu.resolve(), Backend::Cpu);
    }

    #[test]
    fn test_builder_cpu() {
        let stream = StreamBuilder::new()
            .backend(Backend::Cpu)
            .array_size(4096)
            .residency(Residency::HostPagefault)
            .build::<f32>()
            .unwrap();
        assert_eq!(stream.array_size(), 4096);
        assert_eq!(stream.residency(), Residency::HostPagefault);
    }

    #[test]
    fn test_builder_rejects_zero_size() {
        let result = StreamBuilder::new()
            .backend(Backend::Cpu)
            .array_size(0)
            .build::<f64>();
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_unavailable_without_feature() {
        let result = StreamBuilder::new()
            .backend(Backend::Cuda)
            .array_size(16)
            .build::<f32>();
        assert!(matches!(result, Err(StreamError::BackendUnavailable(_))));
    }

    #[test]
    fn test_cpu_devices_listed() {
        let devices = list_devices(Backend::Cpu).unwrap();
        assert!(!devices.is_empty());
        assert_eq!(devices[0].index, 0);
        assert!(device_driver(Backend::Cpu, 0).is_ok());
        assert!(device_driver(Backend::Cpu, devices.len()).is_err());
    }

    #[test]
    fn test_available_backends() {
        assert!(availability::available_backends().contains(&Backend::Cpu));
    }
}
