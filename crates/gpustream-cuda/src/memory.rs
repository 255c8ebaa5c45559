//! Array storage for each residency policy, and the mapped partial-sum buffer.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use cudarc::driver::sys as cuda_sys;
use cudarc::driver::CudaContext;
use tracing::error;

use gpustream_core::error::{Result, StreamError};
use gpustream_core::residency::Residency;

use crate::CudaScalar;

enum Storage<T> {
    /// `cuMemAlloc` or `cuMemAllocManaged`, freed with `cuMemFree`.
    Driver(cuda_sys::CUdeviceptr),
    /// Ordinary pageable host memory handed to kernels directly.
    Host(Vec<T>),
}

/// One benchmark array, placed according to a [`Residency`].
pub struct DeviceArray<T: CudaScalar> {
    ctx: Arc<CudaContext>,
    storage: Storage<T>,
    len: usize,
    residency: Residency,
}

impl<T: CudaScalar> DeviceArray<T> {
    /// Allocate `len` elements in the memory `residency` selects.
    pub fn allocate(ctx: &Arc<CudaContext>, len: usize, residency: Residency) -> Result<Self> {
        let bytes = len * std::mem::size_of::<T>();
        let storage = match residency {
            Residency::DeviceOnly => {
                let mut dptr: cuda_sys::CUdeviceptr = 0;
                check(
                    unsafe { cuda_sys::cuMemAlloc_v2(&mut dptr, bytes) },
                    "cuMemAlloc",
                )?;
                Storage::Driver(dptr)
            }
            Residency::Managed => {
                let mut dptr: cuda_sys::CUdeviceptr = 0;
                check(
                    unsafe {
                        cuda_sys::cuMemAllocManaged(
                            &mut dptr,
                            bytes,
                            cuda_sys::CUmemAttach_flags::CU_MEM_ATTACH_GLOBAL as u32,
                        )
                    },
                    "cuMemAllocManaged",
                )?;
                Storage::Driver(dptr)
            }
            Residency::HostPagefault => Storage::Host(vec![T::ZERO; len]),
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            storage,
            len,
            residency,
        })
    }

    /// Elements in the array.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Placement of the array.
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Address kernels use for this array.
    pub fn device_ptr(&mut self) -> u64 {
        match &mut self.storage {
            Storage::Driver(dptr) => *dptr,
            Storage::Host(data) => data.as_mut_ptr() as u64,
        }
    }

    /// Copy the array into `dst`.
    ///
    /// The caller synchronizes the device first when the array is host
    /// visible.
    pub fn copy_to_host(&self, dst: &mut [T]) -> Result<()> {
        self.check_len(dst.len())?;
        match &self.storage {
            Storage::Driver(dptr) if self.residency.requires_explicit_transfer() => check(
                unsafe {
                    cuda_sys::cuMemcpyDtoH_v2(
                        dst.as_mut_ptr() as *mut c_void,
                        *dptr,
                        self.len * std::mem::size_of::<T>(),
                    )
                },
                "cuMemcpyDtoH",
            ),
            Storage::Driver(dptr) => {
                // SAFETY: managed memory is host addressable once the device is idle.
                let src = unsafe { std::slice::from_raw_parts(*dptr as *const T, self.len) };
                dst.copy_from_slice(src);
                Ok(())
            }
            Storage::Host(data) => {
                dst.copy_from_slice(data);
                Ok(())
            }
        }
    }

    /// Overwrite the array from `src`.
    pub fn copy_from_host(&mut self, src: &[T]) -> Result<()> {
        self.check_len(src.len())?;
        let explicit = self.residency.requires_explicit_transfer();
        match &mut self.storage {
            Storage::Driver(dptr) if explicit => check(
                unsafe {
                    cuda_sys::cuMemcpyHtoD_v2(
                        *dptr,
                        src.as_ptr() as *const c_void,
                        self.len * std::mem::size_of::<T>(),
                    )
                },
                "cuMemcpyHtoD",
            ),
            Storage::Driver(dptr) => {
                // SAFETY: managed memory is host addressable once the device is idle.
                let dst = unsafe { std::slice::from_raw_parts_mut(*dptr as *mut T, self.len) };
                dst.copy_from_slice(src);
                Ok(())
            }
            Storage::Host(data) => {
                data.copy_from_slice(src);
                Ok(())
            }
        }
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.len {
            return Err(StreamError::LengthMismatch {
                expected: self.len,
                actual,
            });
        }
        Ok(())
    }
}

impl<T: CudaScalar> Drop for DeviceArray<T> {
    fn drop(&mut self) {
        if let Storage::Driver(dptr) = self.storage {
            if let Err(e) = self.ctx.bind_to_thread() {
                error!("failed to bind CUDA context before cuMemFree: {}", e);
            }
            let result = unsafe { cuda_sys::cuMemFree_v2(dptr) };
            if result != cuda_sys::CUresult::CUDA_SUCCESS {
                error!("cuMemFree failed: {:?}", result);
            }
        }
    }
}

/// Host-pinned buffer mapped into the device address space.
///
/// The dot kernel writes one partial sum per block here; the host reads them
/// back after synchronizing without an explicit copy.
pub struct MappedSums<T: CudaScalar> {
    ctx: Arc<CudaContext>,
    host_ptr: *mut T,
    device_ptr: u64,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: the buffer is owned exclusively and only touched by kernels
// launched from the owning stream.
unsafe impl<T: CudaScalar> Send for MappedSums<T> {}

impl<T: CudaScalar> MappedSums<T> {
    /// Allocate `len` mapped slots.
    pub fn new(ctx: &Arc<CudaContext>, len: usize) -> Result<Self> {
        let size_bytes = len.max(1) * std::mem::size_of::<T>();
        let mut host_ptr: *mut c_void = ptr::null_mut();

        check(
            unsafe {
                cuda_sys::cuMemHostAlloc(
                    &mut host_ptr,
                    size_bytes,
                    cuda_sys::CU_MEMHOSTALLOC_DEVICEMAP | cuda_sys::CU_MEMHOSTALLOC_PORTABLE,
                )
            },
            "cuMemHostAlloc",
        )?;

        let mut device_ptr: u64 = 0;
        let result = unsafe { cuda_sys::cuMemHostGetDevicePointer_v2(&mut device_ptr, host_ptr, 0) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            unsafe {
                let _ = cuda_sys::cuMemFreeHost(host_ptr);
            }
            return Err(StreamError::device(format!(
                "cuMemHostGetDevicePointer failed: {:?}",
                result
            )));
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            host_ptr: host_ptr as *mut T,
            device_ptr,
            len,
            _marker: PhantomData,
        })
    }

    /// Device-side address of the buffer.
    pub fn device_ptr(&self) -> u64 {
        self.device_ptr
    }

    /// Read the slots.
    ///
    /// # Safety
    ///
    /// The device must be synchronized after the last kernel writing here.
    pub unsafe fn host_slice(&self) -> &[T] {
        // SAFETY: `len` slots were allocated; the caller guarantees no
        // kernel is writing.
        unsafe { std::slice::from_raw_parts(self.host_ptr, self.len) }
    }
}

impl<T: CudaScalar> Drop for MappedSums<T> {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.bind_to_thread() {
            error!("failed to bind CUDA context before cuMemFreeHost: {}", e);
        }
        let result = unsafe { cuda_sys::cuMemFreeHost(self.host_ptr as *mut c_void) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            error!("cuMemFreeHost failed: {:?}", result);
        }
    }
}

fn check(result: cuda_sys::CUresult, op: &str) -> Result<()> {
    match result {
        cuda_sys::CUresult::CUDA_SUCCESS => Ok(()),
        cuda_sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY => Err(StreamError::device(format!(
            "{} failed: out of device memory",
            op
        ))),
        other => Err(StreamError::device(format!("{} failed: {:?}", op, other))),
    }
}
