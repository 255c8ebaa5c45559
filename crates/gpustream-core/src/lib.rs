//! # gpustream core
//!
//! Core traits and types for the gpustream memory bandwidth benchmark.
//!
//! A benchmark run owns three equal-length arrays (A, B, C) on one device and
//! drives a fixed kernel suite over them: copy, mul, add, triad, nstream and
//! dot. Backends (CPU simulation, CUDA) implement [`Stream`] and share the
//! launch geometry, residency strategies and error taxonomy defined here.
//!
//! ## Core Abstractions
//!
//! - [`Stream`] - The kernel suite and array manager contract
//! - [`StreamScalar`] - Element types a run can be instantiated for (`f32`, `f64`)
//! - [`Residency`] - Where the arrays live and how the host sees them
//! - [`LaunchConfig`] - Group/grid geometry plus the grid-stride iterator
//! - [`StreamError`] - Construction and device error taxonomy
//!
//! ## Example
//!
//! ```ignore
//! use gpustream_core::prelude::*;
//!
//! fn run<S: Stream<f64> + ?Sized>(stream: &mut S) -> Result<f64> {
//!     stream.init_arrays(0.1, 0.2, 0.0)?;
//!     stream.copy()?;
//!     stream.mul()?;
//!     stream.add()?;
//!     stream.triad()?;
//!     stream.dot()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod device;
pub mod error;
pub mod launch;
pub mod residency;
pub mod scalar;
pub mod stream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{StreamConfig, StreamConfigBuilder, DEFAULT_ARRAY_SIZE};
    pub use crate::device::DeviceInfo;
    pub use crate::error::{Result, StreamError};
    pub use crate::launch::{ceil_div, grid_stride, GridStride, LaunchConfig, GROUP_SIZE};
    pub use crate::residency::Residency;
    pub use crate::scalar::{Precision, StreamScalar};
    pub use crate::stream::{Kernel, Stream};
}

// Re-exports for convenience
pub use config::{StreamConfig, StreamConfigBuilder};
pub use device::DeviceInfo;
pub use error::{Result, StreamError};
pub use launch::{LaunchConfig, GROUP_SIZE};
pub use residency::Residency;
pub use scalar::{Precision, StreamScalar};
pub use stream::{Kernel, Stream};
