//! Array manager and kernel suite on a CUDA device.

use tracing::{debug, info};

use gpustream_core::config::StreamConfig;
use gpustream_core::device::DeviceInfo;
use gpustream_core::error::{Result, StreamError};
use gpustream_core::launch::{LaunchConfig, GROUP_SIZE};
use gpustream_core::residency::Residency;
use gpustream_core::stream::{check_host_lengths, Stream};

use crate::device::{device_driver, CudaDevice};
use crate::kernels::StreamKernels;
use crate::memory::{DeviceArray, MappedSums};
use crate::CudaScalar;

/// Benchmark stream running on a CUDA device.
///
/// Buffers are declared before the device so they are released while the
/// context is still current.
pub struct CudaStream<T: CudaScalar> {
    array_size: usize,
    residency: Residency,
    dot_num_blocks: usize,
    a: DeviceArray<T>,
    b: DeviceArray<T>,
    c: DeviceArray<T>,
    sums: MappedSums<T>,
    kernels: StreamKernels,
    device: CudaDevice,
}

impl<T: CudaScalar> CudaStream<T> {
    /// Create a stream on CUDA device `device_index`.
    pub fn new(array_size: usize, device_index: usize, residency: Residency) -> Result<Self> {
        if array_size == 0 {
            return Err(StreamError::InvalidConfig(
                "array size must be at least 1".to_string(),
            ));
        }

        let device = CudaDevice::open(device_index)?;
        device.bind()?;
        info!("Using CUDA device {}", device.info().name);
        info!("Driver: {}", device_driver(device_index)?);
        info!("Memory: {}", residency);

        let array_bytes = device.info().check_capacity(array_size, T::size_bytes())?;
        let dot_num_blocks = device.info().dot_num_blocks();

        let kernels = StreamKernels::load::<T>(&device, GROUP_SIZE)?;
        let sums = MappedSums::new(device.context(), dot_num_blocks)?;
        let a = DeviceArray::allocate(device.context(), array_size, residency)?;
        let b = DeviceArray::allocate(device.context(), array_size, residency)?;
        let c = DeviceArray::allocate(device.context(), array_size, residency)?;

        debug!(
            "CUDA stream ready: {} elements of {} ({} bytes total), dot grid={}",
            array_size,
            T::PRECISION,
            array_bytes,
            dot_num_blocks
        );

        Ok(Self {
            array_size,
            residency,
            dot_num_blocks,
            a,
            b,
            c,
            sums,
            kernels,
            device,
        })
    }

    /// Create a stream from a validated configuration.
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::new(config.array_size, config.device_index, config.residency)
    }

    /// Device the stream runs on.
    pub fn device(&self) -> &CudaDevice {
        &self.device
    }

    fn elementwise(&self) -> LaunchConfig {
        LaunchConfig::elementwise(self.array_size, GROUP_SIZE)
    }

    fn abc(&mut self) -> [u64; 3] {
        [
            self.a.device_ptr(),
            self.b.device_ptr(),
            self.c.device_ptr(),
        ]
    }
}

impl<T: CudaScalar> Stream<T> for CudaStream<T> {
    fn init_arrays(&mut self, a: T, b: T, c: T) -> Result<()> {
        let config = self.elementwise();
        let ptrs = self.abc();
        self.kernels.init(&config, ptrs, (a, b, c), self.array_size)?;
        self.device.synchronize()
    }

    fn read_arrays(&mut self, a: &mut [T], b: &mut [T], c: &mut [T]) -> Result<()> {
        check_host_lengths(self.array_size, [a.len(), b.len(), c.len()])?;
        self.device.synchronize()?;
        self.a.copy_to_host(a)?;
        self.b.copy_to_host(b)?;
        self.c.copy_to_host(c)
    }

    fn write_arrays(&mut self, a: &[T], b: &[T], c: &[T]) -> Result<()> {
        check_host_lengths(self.array_size, [a.len(), b.len(), c.len()])?;
        self.device.synchronize()?;
        self.a.copy_from_host(a)?;
        self.b.copy_from_host(b)?;
        self.c.copy_from_host(c)
    }

    fn copy(&mut self) -> Result<()> {
        let config = self.elementwise();
        let (a, c) = (self.a.device_ptr(), self.c.device_ptr());
        self.kernels.copy(&config, a, c, self.array_size)?;
        self.device.synchronize()
    }

    fn mul(&mut self) -> Result<()> {
        let config = self.elementwise();
        let (b, c) = (self.b.device_ptr(), self.c.device_ptr());
        self.kernels.mul(&config, b, c, self.array_size)?;
        self.device.synchronize()
    }

    fn add(&mut self) -> Result<()> {
        let config = self.elementwise();
        let ptrs = self.abc();
        self.kernels.add(&config, ptrs, self.array_size)?;
        self.device.synchronize()
    }

    fn triad(&mut self) -> Result<()> {
        let config = self.elementwise();
        let ptrs = self.abc();
        self.kernels.triad(&config, ptrs, self.array_size)?;
        self.device.synchronize()
    }

    fn nstream(&mut self) -> Result<()> {
        let config = self.elementwise();
        let ptrs = self.abc();
        self.kernels.nstream(&config, ptrs, self.array_size)?;
        self.device.synchronize()
    }

    fn dot(&mut self) -> Result<T> {
        let config = LaunchConfig::reduction(self.dot_num_blocks, GROUP_SIZE);
        let (a, b) = (self.a.device_ptr(), self.b.device_ptr());
        self.kernels
            .dot(&config, a, b, self.sums.device_ptr(), self.array_size)?;
        self.device.synchronize()?;

        let mut sum = T::ZERO;
        // SAFETY: the device was synchronized after the dot launch.
        for &partial in unsafe { self.sums.host_slice() } {
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

    #[test]
    #[ignore] // Requires CUDA hardware
    fn test_triad_and_dot_on_device() {
        for residency in Residency::ALL {
            let n = 10_000;
            let mut stream = CudaStream::<f64>::new(n, 0, residency).unwrap();
            stream.init_arrays(0.1, 0.2, 0.0).unwrap();
            stream.copy().unwrap();
            stream.mul().unwrap();
            stream.add().unwrap();
            stream.triad().unwrap();

            let mut a = vec![0.0; n];
            let mut b = vec![0.0; n];
            let mut c = vec![0.0; n];
            stream.read_arrays(&mut a, &mut b, &mut c).unwrap();
            assert!((a[0] - 1.5).abs() < 1e-12);
            assert!((b[n - 1] - 0.3).abs() < 1e-12);
            assert!((c[n / 2] - 0.4).abs() < 1e-12);

            let dot = stream.dot().unwrap();
            assert!((dot - 1.5 * 0.3 * n as f64).abs() < 1e-6);
        }
    }

    #[test]
    #[ignore] // Requires CUDA hardware
    fn test_zero_array_size() {
        assert!(matches!(
            CudaStream::<f32>::new(0, 0, Residency::Managed),
            Err(StreamError::InvalidConfig(_))
        ));
    }
}
