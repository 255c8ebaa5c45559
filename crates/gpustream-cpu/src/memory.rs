//! Simulated device memory.
//!
//! This module provides RAII wrappers for the three residency strategies and
//! for the pinned partial-sum buffer, plus the raw pointers kernels use to
//! address them from many workers at once.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use gpustream_core::error::{Result, StreamError};
use gpustream_core::residency::Residency;
use gpustream_core::scalar::StreamScalar;

use crate::device::CpuDevice;

#[derive(Debug, Default)]
struct LedgerState {
    device_bytes: u64,
    pinned_bytes: u64,
    live_allocations: usize,
}

/// Byte accounting for one device.
#[derive(Debug)]
pub struct MemoryLedger {
    total: u64,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Ledger for a device with `total` bytes of global memory.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Reserve device memory, failing when the budget is exhausted.
    pub fn reserve_device(&self, bytes: u64) -> Result<()> {
        let mut state = self.state.lock();
        let available = self.total.saturating_sub(state.device_bytes);
        if bytes > available {
            return Err(StreamError::device(format!(
                "out of device memory: requested {} bytes, {} available",
                bytes, available
            )));
        }
        state.device_bytes += bytes;
        state.live_allocations += 1;
        Ok(())
    }

    /// Return device memory.
    pub fn release_device(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.device_bytes = state.device_bytes.saturating_sub(bytes);
        state.live_allocations = state.live_allocations.saturating_sub(1);
    }

    /// Record a pinned host allocation.
    pub fn reserve_pinned(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.pinned_bytes += bytes;
        state.live_allocations += 1;
    }

    /// Return a pinned host allocation.
    pub fn release_pinned(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.pinned_bytes = state.pinned_bytes.saturating_sub(bytes);
        state.live_allocations = state.live_allocations.saturating_sub(1);
    }

    /// Device bytes in use.
    pub fn device_bytes(&self) -> u64 {
        self.state.lock().device_bytes
    }

    /// Pinned bytes in use.
    pub fn pinned_bytes(&self) -> u64 {
        self.state.lock().pinned_bytes
    }

    /// Allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations
    }
}

/// Zero-initialized heap block of `len` elements.
struct RawBuffer<T: Copy> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

impl<T: Copy> RawBuffer<T> {
    fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(StreamError::InvalidConfig(
                "Cannot allocate zero-sized buffer".to_string(),
            ));
        }

        let layout = Layout::array::<T>(len).map_err(|_| {
            StreamError::device(format!(
                "allocation of {} elements overflows the address space",
                len
            ))
        })?;

        // SAFETY: layout has non-zero size because len > 0 and T is a float.
        let ptr = unsafe { alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            StreamError::device(format!("host allocation of {} bytes failed", layout.size()))
        })?;

        Ok(Self { ptr, len, layout })
    }

    fn size_bytes(&self) -> u64 {
        self.layout.size() as u64
    }

    fn as_slice(&self) -> &[T] {
        // SAFETY: ptr is valid for len initialized elements for our lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn device_ptr(&mut self) -> DevicePtr<T> {
        DevicePtr {
            ptr: self.ptr.as_ptr(),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

impl<T: Copy> Drop for RawBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe {
            dealloc(self.ptr.as_ptr() as *mut u8, self.layout);
        }
    }
}

// SAFETY: RawBuffer exclusively owns its allocation.
unsafe impl<T: Copy + Send> Send for RawBuffer<T> {}
unsafe impl<T: Copy + Sync> Sync for RawBuffer<T> {}

/// Device address of a buffer, shared by every worker of a launch.
///
/// Workers of one launch may hold copies concurrently; each index must be
/// written by at most one worker per launch and not read by others.
#[derive(Debug)]
pub struct DevicePtr<T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePtr<T> {}

// SAFETY: launches uphold the disjoint-write contract documented above.
unsafe impl<T: Send> Send for DevicePtr<T> {}
unsafe impl<T: Sync> Sync for DevicePtr<T> {}

impl<T: Copy> DevicePtr<T> {
    /// Elements addressable through this pointer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Load element `i`.
    ///
    /// # Safety
    ///
    /// The buffer must outlive the launch and no other worker may write `i`
    /// during the same launch.
    #[inline]
    pub unsafe fn read(self, i: usize) -> T {
        assert!(i < self.len, "device read out of bounds: {} >= {}", i, self.len);
        // SAFETY: in bounds; caller guarantees liveness and no racing write.
        unsafe { self.ptr.add(i).read() }
    }

    /// Store `value` at element `i`.
    ///
    /// # Safety
    ///
    /// The buffer must outlive the launch and `i` must be owned by the calling
    /// worker for the duration of the launch.
    #[inline]
    pub unsafe fn write(self, i: usize, value: T) {
        assert!(i < self.len, "device write out of bounds: {} >= {}", i, self.len);
        // SAFETY: in bounds; caller guarantees exclusive ownership of `i`.
        unsafe { self.ptr.add(i).write(value) }
    }
}

/// One of A, B or C, allocated under a residency strategy.
pub struct ResidentArray<T: StreamScalar> {
    storage: RawBuffer<T>,
    residency: Residency,
    /// Present when the array counts against device memory.
    ledger: Option<Arc<MemoryLedger>>,
}

impl<T: StreamScalar> ResidentArray<T> {
    /// Allocate `len` elements on `device`.
    pub fn allocate(device: &CpuDevice, len: usize, residency: Residency) -> Result<Self> {
        let storage = RawBuffer::new(len)?;
        let ledger = if residency.uses_device_allocation() {
            device.ledger().reserve_device(storage.size_bytes())?;
            Some(Arc::clone(device.ledger()))
        } else {
            None
        };

        debug!(
            "Allocated {} bytes ({}) on CPU device {}",
            storage.size_bytes(),
            residency,
            device.index()
        );

        Ok(Self {
            storage,
            residency,
            ledger,
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.storage.len
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.len == 0
    }

    /// Residency strategy.
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.storage.size_bytes()
    }

    /// Address handed to kernels.
    pub fn device_ptr(&mut self) -> DevicePtr<T> {
        self.storage.device_ptr()
    }

    /// Direct host view of a host-visible array.
    ///
    /// Fails for device-only memory and while device work is in flight.
    pub fn host_slice(&self, device: &CpuDevice) -> Result<&[T]> {
        self.check_host_access(device, "read")?;
        Ok(self.storage.as_slice())
    }

    /// Mutable host view of a host-visible array.
    pub fn host_slice_mut(&mut self, device: &CpuDevice) -> Result<&mut [T]> {
        self.check_host_access(device, "write")?;
        Ok(self.storage.as_mut_slice())
    }

    /// Explicit device-to-host transfer.
    ///
    /// Ordered after all previously dispatched work, like a blocking copy on
    /// the default queue.
    pub fn copy_to_host(&self, device: &CpuDevice, dst: &mut [T]) -> Result<()> {
        self.check_transfer_len(dst.len())?;
        device.synchronize()?;
        dst.copy_from_slice(self.storage.as_slice());
        Ok(())
    }

    /// Explicit host-to-device transfer.
    pub fn copy_from_host(&mut self, device: &CpuDevice, src: &[T]) -> Result<()> {
        self.check_transfer_len(src.len())?;
        device.synchronize()?;
        self.storage.as_mut_slice().copy_from_slice(src);
        Ok(())
    }

    fn check_host_access(&self, device: &CpuDevice, operation: &str) -> Result<()> {
        if self.residency.requires_explicit_transfer() {
            return Err(StreamError::device(format!(
                "device-only memory is not host accessible ({})",
                operation
            )));
        }
        device.ensure_idle(operation)
    }

    fn check_transfer_len(&self, len: usize) -> Result<()> {
        if len != self.len() {
            return Err(StreamError::LengthMismatch {
                expected: self.len(),
                actual: len,
            });
        }
        Ok(())
    }
}

impl<T: StreamScalar> Drop for ResidentArray<T> {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.release_device(self.storage.size_bytes());
        }
    }
}

/// Page-locked host memory that kernels can write directly.
///
/// Holds the per-group partial sums of the dot product. Host reads require
/// the device queue to be drained first.
pub struct PinnedMemory<T: StreamScalar> {
    storage: RawBuffer<T>,
    ledger: Arc<MemoryLedger>,
}

impl<T: StreamScalar> PinnedMemory<T> {
    /// Allocate pinned memory for `count` elements.
    pub fn new(device: &CpuDevice, count: usize) -> Result<Self> {
        let storage = RawBuffer::new(count)?;
        device.ledger().reserve_pinned(storage.size_bytes());
        Ok(Self {
            storage,
            ledger: Arc::clone(device.ledger()),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.storage.len
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.len == 0
    }

    /// Address handed to kernels.
    pub fn device_ptr(&mut self) -> DevicePtr<T> {
        self.storage.device_ptr()
    }

    /// Host view, valid once the device has been synchronized.
    pub fn host_slice(&self, device: &CpuDevice) -> Result<&[T]> {
        device.ensure_idle("partial sums")?;
        Ok(self.storage.as_slice())
    }
}

impl<T: StreamScalar> Drop for PinnedMemory<T> {
    fn drop(&mut self) {
        self.ledger.release_pinned(self.storage.size_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuDeviceProperties, CpuPlatform};

    fn device(total_memory: u64) -> Arc<CpuDevice> {
        CpuPlatform::with_devices(vec![CpuDeviceProperties::detect()
            .with_compute_units(2)
            .with_total_memory(total_memory)])
        .open(0)
        .unwrap()
    }

    #[test]
    fn test_ledger_budget() {
        let ledger = MemoryLedger::new(100);
        ledger.reserve_device(60).unwrap();
        assert!(ledger.reserve_device(41).is_err());
        ledger.reserve_device(40).unwrap();
        ledger.release_device(60);
        ledger.release_device(40);
        assert_eq!(ledger.device_bytes(), 0);
        assert_eq!(ledger.live_allocations(), 0);
    }

    #[test]
    fn test_device_array_accounting() {
        let device = device(1 << 20);
        {
            let array = ResidentArray::<f64>::allocate(&device, 1000, Residency::DeviceOnly).unwrap();
            assert_eq!(array.size_bytes(), 8000);
            assert_eq!(device.allocated_device_bytes(), 8000);
        }
        assert_eq!(device.allocated_device_bytes(), 0);
    }

    #[test]
    fn test_pagefault_array_not_counted() {
        let device = device(1 << 20);
        let _array = ResidentArray::<f32>::allocate(&device, 1000, Residency::HostPagefault).unwrap();
        assert_eq!(device.allocated_device_bytes(), 0);
    }

    #[test]
    fn test_device_only_not_host_accessible() {
        let device = device(1 << 20);
        let array = ResidentArray::<f32>::allocate(&device, 16, Residency::DeviceOnly).unwrap();
        assert!(array.host_slice(&device).is_err());

        let mut host = vec![1.0f32; 16];
        array.copy_to_host(&device, &mut host).unwrap();
        assert!(host.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_managed_requires_sync() {
        let device = device(1 << 20);
        let array = ResidentArray::<f32>::allocate(&device, 16, Residency::Managed).unwrap();
        assert!(array.host_slice(&device).is_ok());

        device.begin_launch();
        assert!(array.host_slice(&device).is_err());
        device.synchronize().unwrap();
        assert_eq!(array.host_slice(&device).unwrap().len(), 16);
    }

    #[test]
    fn test_transfer_roundtrip() {
        let device = device(1 << 20);
        let mut array = ResidentArray::<f64>::allocate(&device, 4, Residency::DeviceOnly).unwrap();
        array.copy_from_host(&device, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        let mut out = vec![0.0; 4];
        array.copy_to_host(&device, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);

        let mut short = vec![0.0; 3];
        assert!(matches!(
            array.copy_to_host(&device, &mut short),
            Err(StreamError::LengthMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_pinned_memory() {
        let device = device(1 << 20);
        {
            let mut sums = PinnedMemory::<f64>::new(&device, 8).unwrap();
            assert_eq!(device.allocated_pinned_bytes(), 64);

            let ptr = sums.device_ptr();
            unsafe { ptr.write(3, 42.0) };
            assert_eq!(sums.host_slice(&device).unwrap()[3], 42.0);
        }
        assert_eq!(device.allocated_pinned_bytes(), 0);
    }

    #[test]
    fn test_zero_sized_rejected() {
        let device = device(1 << 20);
        assert!(ResidentArray::<f32>::allocate(&device, 0, Residency::Managed).is_err());
    }

    #[test]
    fn test_out_of_device_memory() {
        let device = device(100);
        let err = ResidentArray::<f64>::allocate(&device, 100, Residency::Managed).err().unwrap();
        assert!(err.is_fatal());
    }
}
