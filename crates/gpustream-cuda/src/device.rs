//! CUDA device management.

use std::sync::Arc;

use cudarc::driver::sys as cuda_sys;
use cudarc::driver::{CudaContext, CudaStream as StreamHandle};
use tracing::warn;

use gpustream_core::device::DeviceInfo;
use gpustream_core::error::{Result, StreamError};

/// A selected CUDA device with its context and default queue.
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    stream: Arc<StreamHandle>,
    info: DeviceInfo,
}

impl CudaDevice {
    /// Open device `index`, failing with `InvalidDevice` when out of range.
    pub fn open(index: usize) -> Result<Self> {
        let count = device_count()?;
        if index >= count {
            return Err(StreamError::InvalidDevice { index, count });
        }

        let ctx = CudaContext::new(index).map_err(|e| {
            StreamError::device(format!("failed to create CUDA context {}: {}", index, e))
        })?;
        let info = query_info(&ctx, index)?;
        let stream = ctx.default_stream();

        Ok(Self { ctx, stream, info })
    }

    /// Static properties of the device.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The underlying context.
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// The queue kernels are launched on.
    pub fn stream(&self) -> &Arc<StreamHandle> {
        &self.stream
    }

    /// Make the context current on the calling thread.
    pub fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| StreamError::device(format!("failed to bind CUDA context: {}", e)))
    }

    /// Block until every launch issued on the device has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| StreamError::device(format!("CUDA synchronize failed: {}", e)))
    }
}

fn device_count() -> Result<usize> {
    let count = CudaContext::device_count()
        .map_err(|e| StreamError::device(format!("failed to count CUDA devices: {}", e)))?;
    Ok(count.max(0) as usize)
}

fn query_info(ctx: &Arc<CudaContext>, index: usize) -> Result<DeviceInfo> {
    let name = ctx
        .name()
        .map_err(|e| StreamError::device(format!("failed to get device name: {}", e)))?;

    let compute_units = ctx
        .attribute(cuda_sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)
        .map_err(|e| StreamError::device(format!("failed to query multiprocessors: {}", e)))?;

    let mut total_memory: usize = 0;
    let result = unsafe { cuda_sys::cuDeviceTotalMem_v2(&mut total_memory, ctx.cu_device()) };
    if result != cuda_sys::CUresult::CUDA_SUCCESS {
        return Err(StreamError::device(format!(
            "cuDeviceTotalMem failed: {:?}",
            result
        )));
    }

    Ok(DeviceInfo {
        index,
        name,
        compute_units: compute_units.max(1) as usize,
        total_memory: total_memory as u64,
    })
}

/// Enumerate all CUDA devices.
///
/// Devices whose properties cannot be read are skipped with a warning.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let count = device_count()?;
    let mut devices = Vec::with_capacity(count);
    for index in 0..count {
        let info = CudaContext::new(index)
            .map_err(|e| StreamError::device(e.to_string()))
            .and_then(|ctx| query_info(&ctx, index));
        match info {
            Ok(info) => devices.push(info),
            Err(e) => warn!("Failed to enumerate CUDA device {}: {}", index, e),
        }
    }
    Ok(devices)
}

/// Driver version string, e.g. `12.4`.
///
/// The driver is shared by every device, so `index` is only range-checked.
pub fn device_driver(index: usize) -> Result<String> {
    let count = device_count()?;
    if index >= count {
        return Err(StreamError::InvalidDevice { index, count });
    }

    let mut version: i32 = 0;
    let result = unsafe { cuda_sys::cuDriverGetVersion(&mut version) };
    if result != cuda_sys::CUresult::CUDA_SUCCESS {
        return Err(StreamError::device(format!(
            "cuDriverGetVersion failed: {:?}",
            result
        )));
    }
    Ok(format!("{}.{}", version / 1000, (version % 1000) / 10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires CUDA hardware
    fn test_device_enumeration() {
        let devices = list_devices().unwrap();
        for (i, device) in devices.iter().enumerate() {
            assert_eq!(device.index, i);
            assert!(device.compute_units > 0);
            assert!(device.total_memory > 0);
        }
    }

    #[test]
    #[ignore] // Requires CUDA hardware
    fn test_open_out_of_range() {
        let count = list_devices().unwrap().len();
        assert!(matches!(
            CudaDevice::open(count),
            Err(StreamError::InvalidDevice { .. })
        ));
    }

    #[test]
    #[ignore] // Requires CUDA hardware
    fn test_driver_version_format() {
        let version = device_driver(0).unwrap();
        assert!(version.contains('.'));
    }
}
