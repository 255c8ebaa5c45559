//! Host-simulated devices.
//!
//! A [`CpuDevice`] stands in for an accelerator: its parallel processors are
//! the threads of a dedicated rayon pool, its global memory is a byte budget
//! tracked by a [`MemoryLedger`], and its queue records whether dispatched work
//! has been retired by [`CpuDevice::synchronize`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::ThreadPool;
use tracing::{debug, info, trace};

use gpustream_core::device::DeviceInfo;
use gpustream_core::error::{Result, StreamError};

use crate::memory::MemoryLedger;

/// Memory budget of a detected device (16 GiB).
pub const DEFAULT_TOTAL_MEMORY: u64 = 16 * 1024 * 1024 * 1024;

/// Version string reported as the device driver.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Properties used to instantiate a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuDeviceProperties {
    /// Device name.
    pub name: String,
    /// Parallel processors (pool threads).
    pub compute_units: usize,
    /// Global memory budget in bytes.
    pub total_memory: u64,
}

impl CpuDeviceProperties {
    /// Properties of the host this process runs on.
    pub fn detect() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            name: format!("{} host ({} threads)", std::env::consts::ARCH, compute_units),
            compute_units,
            total_memory: DEFAULT_TOTAL_MEMORY,
        }
    }

    /// Override the processor count.
    pub fn with_compute_units(mut self, compute_units: usize) -> Self {
        self.compute_units = compute_units.max(1);
        self
    }

    /// Override the memory budget.
    pub fn with_total_memory(mut self, total_memory: u64) -> Self {
        self.total_memory = total_memory;
        self
    }

    /// Override the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for CpuDeviceProperties {
    fn default() -> Self {
        Self::detect()
    }
}

/// Set of simulated devices that can be enumerated and opened.
#[derive(Debug, Clone)]
pub struct CpuPlatform {
    devices: Vec<CpuDeviceProperties>,
}

impl CpuPlatform {
    /// Platform with a single device describing the host.
    pub fn new() -> Self {
        Self::with_devices(vec![CpuDeviceProperties::detect()])
    }

    /// Platform with explicit device properties.
    pub fn with_devices(devices: Vec<CpuDeviceProperties>) -> Self {
        Self { devices }
    }

    /// Number of enumerated devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Describe every device.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, props)| describe(index, props))
            .collect()
    }

    /// Driver version of device `index`.
    pub fn driver_version(&self, index: usize) -> Result<String> {
        self.properties(index)?;
        Ok(DRIVER_VERSION.to_string())
    }

    /// Open device `index`, spinning up its worker pool.
    pub fn open(&self, index: usize) -> Result<Arc<CpuDevice>> {
        let props = self.properties(index)?;
        CpuDevice::new(index, props).map(Arc::new)
    }

    fn properties(&self, index: usize) -> Result<&CpuDeviceProperties> {
        self.devices.get(index).ok_or(StreamError::InvalidDevice {
            index,
            count: self.devices.len(),
        })
    }
}

impl Default for CpuPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(index: usize, props: &CpuDeviceProperties) -> DeviceInfo {
    DeviceInfo {
        index,
        name: props.name.clone(),
        compute_units: props.compute_units.max(1),
        total_memory: props.total_memory,
    }
}

/// An opened simulated device.
pub struct CpuDevice {
    /// Static description.
    info: DeviceInfo,
    /// Worker threads standing in for parallel processors.
    pool: ThreadPool,
    /// Device and pinned memory accounting.
    ledger: Arc<MemoryLedger>,
    /// Launches not yet retired by a synchronize.
    in_flight: AtomicU64,
    /// Total launches issued.
    total_launches: AtomicU64,
}

impl CpuDevice {
    fn new(index: usize, props: &CpuDeviceProperties) -> Result<Self> {
        let info = describe(index, props);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(info.compute_units)
            .thread_name(move |i| format!("gpustream-cpu{}-{}", index, i))
            .build()
            .map_err(|e| {
                StreamError::device(format!("Failed to create worker pool for device {}: {}", index, e))
            })?;

        info!(
            "Opened CPU device {} '{}' ({} compute units, {} MiB)",
            index,
            info.name,
            info.compute_units,
            info.total_memory / (1024 * 1024)
        );

        Ok(Self {
            ledger: Arc::new(MemoryLedger::new(info.total_memory)),
            info,
            pool,
            in_flight: AtomicU64::new(0),
            total_launches: AtomicU64::new(0),
        })
    }

    /// Static description.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Device index.
    pub fn index(&self) -> usize {
        self.info.index
    }

    /// Parallel processor count.
    pub fn compute_units(&self) -> usize {
        self.info.compute_units
    }

    /// Memory accounting shared with the buffers allocated on this device.
    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// Bytes of device memory currently allocated.
    pub fn allocated_device_bytes(&self) -> u64 {
        self.ledger.device_bytes()
    }

    /// Bytes of pinned host memory currently allocated.
    pub fn allocated_pinned_bytes(&self) -> u64 {
        self.ledger.pinned_bytes()
    }

    /// Total launches issued.
    pub fn total_launches(&self) -> u64 {
        self.total_launches.load(Ordering::Relaxed)
    }

    /// Run `op` inside the device's worker pool.
    pub(crate) fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Record a dispatch on the device queue.
    pub(crate) fn begin_launch(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.total_launches.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether all dispatched work has been retired.
    pub fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    /// Block until every dispatched launch has completed.
    pub fn synchronize(&self) -> Result<()> {
        let retired = self.in_flight.swap(0, Ordering::AcqRel);
        if retired > 0 {
            trace!("Device {} synchronized ({} launches retired)", self.info.index, retired);
        }
        Ok(())
    }

    /// Fail unless the host may touch shared memory right now.
    pub fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(StreamError::device(format!(
                "host access before synchronization ({})",
                operation
            )))
        }
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        debug!(
            "Closing CPU device {} after {} launches",
            self.info.index,
            self.total_launches()
        );
    }
}

/// Enumerate the devices of the default platform.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    Ok(CpuPlatform::new().list_devices())
}

/// Driver version of a device on the default platform.
pub fn device_driver(index: usize) -> Result<String> {
    CpuPlatform::new().driver_version(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_platform() {
        let platform = CpuPlatform::new();
        assert_eq!(platform.device_count(), 1);

        let devices = platform.list_devices();
        assert_eq!(devices[0].index, 0);
        assert!(devices[0].compute_units >= 1);
        assert_eq!(devices[0].total_memory, DEFAULT_TOTAL_MEMORY);
    }

    #[test]
    fn test_open_out_of_range() {
        let platform = CpuPlatform::new();
        let err = platform.open(1).err().unwrap();
        assert_eq!(err, StreamError::InvalidDevice { index: 1, count: 1 });
        assert!(platform.driver_version(5).is_err());
    }

    #[test]
    fn test_driver_version() {
        assert_eq!(device_driver(0).unwrap(), DRIVER_VERSION);
    }

    #[test]
    fn test_queue_tracking() {
        let platform =
            CpuPlatform::with_devices(vec![CpuDeviceProperties::detect().with_compute_units(2)]);
        let device = platform.open(0).unwrap();
        assert!(device.is_idle());

        device.begin_launch();
        assert!(!device.is_idle());
        assert!(device.ensure_idle("read").is_err());

        device.synchronize().unwrap();
        assert!(device.ensure_idle("read").is_ok());
        assert_eq!(device.total_launches(), 1);
    }

    #[test]
    fn test_properties_builder() {
        let props = CpuDeviceProperties::detect()
            .with_name("sim")
            .with_compute_units(0)
            .with_total_memory(1024);
        assert_eq!(props.name, "sim");
        assert_eq!(props.compute_units, 1);
        assert_eq!(props.total_memory, 1024);
    }
}
