//! The benchmark kernel suite for the simulated device.
//!
//! Every kernel is written per worker, exactly as it would be for a GPU:
//! start at the global index and advance by the grid's worker count. Callers
//! synchronize the device after each launch.

use gpustream_core::error::Result;
use gpustream_core::launch::{grid_stride, LaunchConfig};
use gpustream_core::scalar::StreamScalar;

use crate::device::CpuDevice;
use crate::grid::LaunchStats;
use crate::memory::DevicePtr;

// SAFETY (all kernels below): grid-stride index sets of distinct workers are
// disjoint and bounded by `array_size`, which never exceeds the length of the
// buffers behind the pointers. Each element is therefore read and written by
// a single worker per launch, and the owning stream keeps the buffers alive
// for the duration of the launch.

/// `A[i] = a; B[i] = b; C[i] = c`
#[allow(clippy::too_many_arguments)]
pub fn init<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    b: DevicePtr<T>,
    c: DevicePtr<T>,
    init: (T, T, T),
    array_size: usize,
) -> Result<LaunchStats> {
    let (init_a, init_b, init_c) = init;
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe {
                a.write(i, init_a);
                b.write(i, init_b);
                c.write(i, init_c);
            }
        }
    })
}

/// `C[i] = A[i]`
pub fn copy<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    c: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe { c.write(i, a.read(i)) };
        }
    })
}

/// `B[i] = scalar * C[i]`
pub fn mul<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    b: DevicePtr<T>,
    c: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    let scalar = T::SCALAR;
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe { b.write(i, scalar * c.read(i)) };
        }
    })
}

/// `C[i] = A[i] + B[i]`
pub fn add<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    b: DevicePtr<T>,
    c: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe { c.write(i, a.read(i) + b.read(i)) };
        }
    })
}

/// `A[i] = B[i] + scalar * C[i]`
pub fn triad<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    b: DevicePtr<T>,
    c: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    let scalar = T::SCALAR;
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe { a.write(i, b.read(i) + scalar * c.read(i)) };
        }
    })
}

/// `A[i] += B[i] + scalar * C[i]`
pub fn nstream<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    b: DevicePtr<T>,
    c: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    let scalar = T::SCALAR;
    device.launch(config, |w| {
        for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
            unsafe {
                let mut value = a.read(i);
                value += b.read(i) + scalar * c.read(i);
                a.write(i, value);
            }
        }
    })
}

/// Per-group partial sums of `A[i] * B[i]`, written to `sums[group_id]`.
///
/// Each worker accumulates its grid-stride share into its own shared slot,
/// then the group folds the slots with a halving tree. A barrier precedes
/// every fold step and is issued by the whole group, including the workers
/// that have nothing left to add.
pub fn dot<T: StreamScalar>(
    device: &CpuDevice,
    config: &LaunchConfig,
    a: DevicePtr<T>,
    b: DevicePtr<T>,
    sums: DevicePtr<T>,
    array_size: usize,
) -> Result<LaunchStats> {
    device.launch_groups::<T, _>(config, |group| {
        group.for_each_worker(|w, tb_sum| {
            let local = w.local_id;
            tb_sum[local] = T::ZERO;
            for i in grid_stride(w.global_id(), w.total_workers(), array_size) {
                tb_sum[local] += unsafe { a.read(i) * b.read(i) };
            }
        });

        let mut offset = group.size() / 2;
        while offset > 0 {
            group.sync_threads();
            group.for_each_worker(|w, tb_sum| {
                let local = w.local_id;
                if local < offset {
                    let other = tb_sum[local + offset];
                    tb_sum[local] += other;
                }
            });
            offset /= 2;
        }

        let group_id = group.id();
        group.for_each_worker(|w, tb_sum| {
            if w.local_id == 0 {
                // SAFETY: only worker 0 of each group writes, at its own group index.
                unsafe { sums.write(group_id, tb_sum[0]) };
            }
        });
    })
}
