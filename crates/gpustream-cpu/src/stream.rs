//! Array manager and kernel suite on a simulated device.

use std::sync::Arc;

use tracing::{debug, info};

use gpustream_core::config::StreamConfig;
use gpustream_core::device::DeviceInfo;
use gpustream_core::error::{Result, StreamError};
use gpustream_core::launch::{LaunchConfig, GROUP_SIZE};
use gpustream_core::residency::Residency;
use gpustream_core::scalar::StreamScalar;
use gpustream_core::stream::{check_host_lengths, Stream};

use crate::device::{CpuDevice, CpuPlatform};
use crate::kernels;
use crate::memory::{PinnedMemory, ResidentArray};

/// Benchmark stream running on a [`CpuDevice`].
pub struct CpuStream<T: StreamScalar> {
    device: Arc<CpuDevice>,
    array_size: usize,
    residency: Residency,
    dot_num_blocks: usize,
    a: ResidentArray<T>,
    b: ResidentArray<T>,
    c: ResidentArray<T>,
    sums: PinnedMemory<T>,
}

impl<T: StreamScalar> CpuStream<T> {
    /// Create a stream on device `device_index` of the default platform.
    pub fn new(array_size: usize, device_index: usize, residency: Residency) -> Result<Self> {
        Self::with_platform(&CpuPlatform::new(), array_size, device_index, residency)
    }

    /// Create a stream from a validated configuration.
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::new(config.array_size, config.device_index, config.residency)
    }

    /// Create a stream on device `device_index` of `platform`.
    pub fn with_platform(
        platform: &CpuPlatform,
        array_size: usize,
        device_index: usize,
        residency: Residency,
    ) -> Result<Self> {
        if array_size == 0 {
            return Err(StreamError::InvalidConfig(
                "array size must be at least 1".to_string(),
            ));
        }

        let device = platform.open(device_index)?;
        info!("Using CPU device {}", device.info().name);
        info!("Driver: {}", platform.driver_version(device_index)?);
        info!("Memory: {}", residency);

        let array_bytes = device.info().check_capacity(array_size, T::size_bytes())?;
        let dot_num_blocks = device.info().dot_num_blocks();

        let sums = PinnedMemory::new(&device, dot_num_blocks)?;
        let a = ResidentArray::allocate(&device, array_size, residency)?;
        let b = ResidentArray::allocate(&device, array_size, residency)?;
        let c = ResidentArray::allocate(&device, array_size, residency)?;

        debug!(
            "CPU stream ready: {} elements of {} ({} bytes total), dot grid={}",
            array_size,
            T::PRECISION,
            array_bytes,
            dot_num_blocks
        );

        Ok(Self {
            device,
            array_size,
            residency,
            dot_num_blocks,
            a,
            b,
            c,
            sums,
        })
    }

    /// Device the stream runs on.
    pub fn device(&self) -> &Arc<CpuDevice> {
        &self.device
    }

    fn elementwise(&self) -> LaunchConfig {
        LaunchConfig::elementwise(self.array_size, GROUP_SIZE)
    }

    fn reduction(&self) -> LaunchConfig {
        LaunchConfig::reduction(self.dot_num_blocks, GROUP_SIZE)
    }
}

impl<T: StreamScalar> Stream<T> for CpuStream<T> {
    fn init_arrays(&mut self, a: T, b: T, c: T) -> Result<()> {
        let config = self.elementwise();
        kernels::init(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.c.device_ptr(),
            (a, b, c),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn read_arrays(&mut self, a: &mut [T], b: &mut [T], c: &mut [T]) -> Result<()> {
        check_host_lengths(self.array_size, [a.len(), b.len(), c.len()])?;

        if self.residency.requires_explicit_transfer() {
            self.a.copy_to_host(&self.device, a)?;
            self.b.copy_to_host(&self.device, b)?;
            self.c.copy_to_host(&self.device, c)?;
        } else {
            self.device.synchronize()?;
            a.copy_from_slice(self.a.host_slice(&self.device)?);
            b.copy_from_slice(self.b.host_slice(&self.device)?);
            c.copy_from_slice(self.c.host_slice(&self.device)?);
        }
        Ok(())
    }

    fn write_arrays(&mut self, a: &[T], b: &[T], c: &[T]) -> Result<()> {
        check_host_lengths(self.array_size, [a.len(), b.len(), c.len()])?;

        if self.residency.requires_explicit_transfer() {
            self.a.copy_from_host(&self.device, a)?;
            self.b.copy_from_host(&self.device, b)?;
            self.c.copy_from_host(&self.device, c)?;
        } else {
            self.device.synchronize()?;
            self.a.host_slice_mut(&self.device)?.copy_from_slice(a);
            self.b.host_slice_mut(&self.device)?.copy_from_slice(b);
            self.c.host_slice_mut(&self.device)?.copy_from_slice(c);
        }
        Ok(())
    }

    fn copy(&mut self) -> Result<()> {
        let config = self.elementwise();
        kernels::copy(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.c.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn mul(&mut self) -> Result<()> {
        let config = self.elementwise();
        kernels::mul(
            &self.device,
            &config,
            self.b.device_ptr(),
            self.c.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn add(&mut self) -> Result<()> {
        let config = self.elementwise();
        kernels::add(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.c.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn triad(&mut self) -> Result<()> {
        let config = self.elementwise();
        kernels::triad(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.c.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn nstream(&mut self) -> Result<()> {
        let config = self.elementwise();
        kernels::nstream(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.c.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()
    }

    fn dot(&mut self) -> Result<T> {
        let config = self.reduction();
        kernels::dot(
            &self.device,
            &config,
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.sums.device_ptr(),
            self.array_size,
        )?;
        self.device.synchronize()?;

        let mut sum = T::ZERO;
        for &partial in self.sums.host_slice(&self.device)? {
            sum += partial;
        }
        Ok(sum)
    }

    fn array_size(&self) -> usize {
        self.array_size
    }

    fn residency(&self) -> Residency {
        self.residency
    }

    fn dot_num_blocks(&self) -> usize {
        self.dot_num_blocks
    }

    fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDeviceProperties;

    fn platform(compute_units: usize, total_memory: u64) -> CpuPlatform {
        CpuPlatform::with_devices(vec![CpuDeviceProperties::detect()
            .with_compute_units(compute_units)
            .with_total_memory(total_memory)])
    }

    #[test]
    fn test_construction_geometry() {
        let stream =
            CpuStream::<f32>::with_platform(&platform(3, 1 << 30), 5000, 0, Residency::Managed)
                .unwrap();
        assert_eq!(stream.array_size(), 5000);
        assert_eq!(stream.dot_num_blocks(), 12);
        assert_eq!(stream.residency(), Residency::Managed);
        assert_eq!(stream.device().allocated_device_bytes(), 3 * 5000 * 4);
        assert_eq!(stream.device().allocated_pinned_bytes(), 12 * 4);
    }

    #[test]
    fn test_invalid_device() {
        let err = CpuStream::<f64>::with_platform(&platform(2, 1 << 30), 10, 1, Residency::DeviceOnly)
            .err()
            .unwrap();
        assert_eq!(err, StreamError::InvalidDevice { index: 1, count: 1 });
    }

    #[test]
    fn test_insufficient_memory() {
        let err = CpuStream::<f64>::with_platform(&platform(2, 2399), 100, 0, Residency::DeviceOnly)
            .err()
            .unwrap();
        assert_eq!(
            err,
            StreamError::InsufficientMemory {
                required: 2400,
                available: 2399
            }
        );
    }

    #[test]
    fn test_pagefault_still_checks_capacity() {
        let result =
            CpuStream::<f32>::with_platform(&platform(2, 100), 100, 0, Residency::HostPagefault);
        assert!(matches!(result, Err(StreamError::InsufficientMemory { .. })));
    }

    #[test]
    fn test_zero_array_size() {
        let result = CpuStream::<f32>::with_platform(&platform(2, 1 << 20), 0, 0, Residency::Managed);
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
    }

    #[test]
    fn test_release_on_drop() {
        let stream =
            CpuStream::<f64>::with_platform(&platform(2, 1 << 30), 4096, 0, Residency::DeviceOnly)
                .unwrap();
        let device = Arc::clone(stream.device());
        assert_eq!(device.ledger().live_allocations(), 4);

        drop(stream);
        assert_eq!(device.allocated_device_bytes(), 0);
        assert_eq!(device.allocated_pinned_bytes(), 0);
        assert_eq!(device.ledger().live_allocations(), 0);
    }

    #[test]
    fn test_each_operation_synchronizes() {
        let mut stream =
            CpuStream::<f32>::with_platform(&platform(2, 1 << 30), 3000, 0, Residency::Managed)
                .unwrap();
        stream.init_arrays(1.0, 2.0, 0.0).unwrap();
        assert!(stream.device().is_idle());
        stream.triad().unwrap();
        assert!(stream.device().is_idle());
        assert_eq!(stream.dot().unwrap(), 2.0 * 2.0 * 3000.0);
        assert_eq!(stream.device().total_launches(), 3);
    }

    #[test]
    fn test_read_length_mismatch() {
        let mut stream =
            CpuStream::<f32>::with_platform(&platform(2, 1 << 30), 10, 0, Residency::DeviceOnly)
                .unwrap();
        let mut a = vec![0.0; 10];
        let mut b = vec![0.0; 9];
        let mut c = vec![0.0; 10];
        assert_eq!(
            stream.read_arrays(&mut a, &mut b, &mut c),
            Err(StreamError::LengthMismatch {
                expected: 10,
                actual: 9
            })
        );
    }
}
