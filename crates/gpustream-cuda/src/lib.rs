//! CUDA Backend for gpustream
//!
//! Runs the benchmark kernel suite on NVIDIA GPUs through the CUDA driver
//! API (via cudarc). Kernels are compiled at stream construction with NVRTC
//! for the selected element type.
//!
//! # Feature Flags
//!
//! - `cuda` - Enables the backend (requires the CUDA toolkit). Without it the
//!   crate still builds, and every entry point reports
//!   [`StreamError::BackendUnavailable`](gpustream_core::StreamError).
//!
//! # Example
//!
//! ```ignore
//! use gpustream_core::prelude::*;
//! use gpustream_cuda::CudaStream;
//!
//! let mut stream = CudaStream::<f32>::new(1 << 25, 0, Residency::DeviceOnly)?;
//! stream.init_arrays(0.1, 0.2, 0.0)?;
//! stream.copy()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "cuda")]
mod device;
#[cfg(feature = "cuda")]
pub mod kernels;
#[cfg(feature = "cuda")]
mod memory;
#[cfg(feature = "cuda")]
mod stream;

use gpustream_core::scalar::StreamScalar;

#[cfg(feature = "cuda")]
pub use device::{device_driver, list_devices, CudaDevice};
#[cfg(feature = "cuda")]
pub use memory::{DeviceArray, MappedSums};
#[cfg(feature = "cuda")]
pub use stream::CudaStream;

/// Element types the CUDA kernels can be instantiated for.
#[cfg(feature = "cuda")]
pub trait CudaScalar: StreamScalar + cudarc::driver::DeviceRepr {}

/// Element types the CUDA kernels can be instantiated for.
#[cfg(not(feature = "cuda"))]
pub trait CudaScalar: StreamScalar {}

impl CudaScalar for f32 {}
impl CudaScalar for f64 {}

// Placeholder implementations when CUDA is not available
#[cfg(not(feature = "cuda"))]
mod stub {
    use std::marker::PhantomData;

    use gpustream_core::config::StreamConfig;
    use gpustream_core::device::DeviceInfo;
    use gpustream_core::error::{Result, StreamError};
    use gpustream_core::residency::Residency;
    use gpustream_core::stream::Stream;

    use crate::CudaScalar;

    fn unavailable() -> StreamError {
        StreamError::BackendUnavailable("CUDA feature not enabled".to_string())
    }

    /// Stub CUDA stream when the `cuda` feature is disabled.
    ///
    /// It can never be constructed.
    pub struct CudaStream<T: CudaScalar> {
        info: DeviceInfo,
        _marker: PhantomData<T>,
    }

    impl<T: CudaScalar> CudaStream<T> {
        /// Construction fails when CUDA is not available.
        pub fn new(_array_size: usize, _device_index: usize, _residency: Residency) -> Result<Self> {
            Err(unavailable())
        }

        /// Construction fails when CUDA is not available.
        pub fn from_config(_config: &StreamConfig) -> Result<Self> {
            Err(unavailable())
        }
    }

    impl<T: CudaScalar> Stream<T> for CudaStream<T> {
        fn init_arrays(&mut self, _a: T, _b: T, _c: T) -> Result<()> {
            Err(unavailable())
        }

        fn read_arrays(&mut self, _a: &mut [T], _b: &mut [T], _c: &mut [T]) -> Result<()> {
            Err(unavailable())
        }

        fn write_arrays(&mut self, _a: &[T], _b: &[T], _c: &[T]) -> Result<()> {
            Err(unavailable())
        }

        fn copy(&mut self) -> Result<()> {
            Err(unavailable())
        }

        fn mul(&mut self) -> Result<()> {
            Err(unavailable())
        }

        fn add(&mut self) -> Result<()> {
            Err(unavailable())
        }

        fn triad(&mut self) -> Result<()> {
            Err(unavailable())
        }

        fn nstream(&mut self) -> Result<()> {
            Err(unavailable())
        }

        fn dot(&mut self) -> Result<T> {
            Err(unavailable())
        }

        fn array_size(&self) -> usize {
            0
        }

        fn residency(&self) -> Residency {
            Residency::default()
        }

        fn dot_num_blocks(&self) -> usize {
            0
        }

        fn device_info(&self) -> &DeviceInfo {
            &self.info
        }
    }

    /// Device listing fails when CUDA is not available.
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        Err(unavailable())
    }

    /// Driver query fails when CUDA is not available.
    pub fn device_driver(_index: usize) -> Result<String> {
        Err(unavailable())
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub::{device_driver, list_devices, CudaStream};

/// Check if CUDA is available at runtime.
///
/// Returns false when the `cuda` feature is off, the driver library is
/// missing, or no device is present.
pub fn is_cuda_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        // cudarc panics if CUDA libraries are not found
        std::panic::catch_unwind(|| {
            cudarc::driver::CudaContext::device_count()
                .map(|c| c > 0)
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_stub_reports_unavailable() {
        use gpustream_core::error::StreamError;
        use gpustream_core::residency::Residency;

        assert!(!is_cuda_available());
        assert!(matches!(
            CudaStream::<f32>::new(1024, 0, Residency::DeviceOnly),
            Err(StreamError::BackendUnavailable(_))
        ));
        assert!(matches!(
            list_devices(),
            Err(StreamError::BackendUnavailable(_))
        ));
        assert!(device_driver(0).is_err());
    }
}
