//! CPU Backend for gpustream
//!
//! A host-simulated accelerator. It is always available and runs the same
//! kernels, launch geometry and residency rules as the GPU backends, which
//! makes it the reference for correctness tests.
//!
//! # Model
//!
//! - Parallel processors are the threads of a per-device rayon pool
//! - Groups of a launch run in parallel; workers of a group run in lock-step
//!   regions separated by barriers
//! - Device memory is a byte budget; device-only arrays are only reachable
//!   through explicit transfers, managed and pagefault arrays only after the
//!   device queue has been synchronized
//!
//! # Example
//!
//! ```ignore
//! use gpustream_core::prelude::*;
//! use gpustream_cpu::CpuStream;
//!
//! let mut stream = CpuStream::<f64>::new(1 << 20, 0, Residency::Managed)?;
//! stream.init_arrays(0.1, 0.2, 0.0)?;
//! stream.triad()?;
//! let sum = stream.dot()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod device;
pub mod grid;
pub mod kernels;
pub mod memory;
mod stream;

pub use device::{
    device_driver, list_devices, CpuDevice, CpuDeviceProperties, CpuPlatform,
    DEFAULT_TOTAL_MEMORY,
};
pub use grid::{Group, LaunchStats, Worker};
pub use memory::{DevicePtr, MemoryLedger, PinnedMemory, ResidentArray};
pub use stream::CpuStream;
