//! Data-parallel dispatch on a simulated device.
//!
//! A launch runs `grid_size` groups of `group_size` workers. Groups are
//! independent and execute in parallel on the device's worker pool. Inside a
//! group, workers run in lock-step regions separated by barriers: every
//! worker finishes region *k* before any worker starts region *k + 1*, which
//! is exactly the visibility a group barrier guarantees on hardware.

use rayon::prelude::*;
use tracing::trace;

use gpustream_core::error::{Result, StreamError};
use gpustream_core::launch::LaunchConfig;

use crate::device::CpuDevice;

/// Identity of one worker within a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Worker {
    /// Index within the group.
    pub local_id: usize,
    /// Index of the group within the grid.
    pub group_id: usize,
    /// Workers per group.
    pub group_size: usize,
    /// Groups in the grid.
    pub num_groups: usize,
}

impl Worker {
    /// Index across the whole grid.
    #[inline]
    pub fn global_id(&self) -> usize {
        self.group_id * self.group_size + self.local_id
    }

    /// Workers in the whole grid (the grid-stride step).
    #[inline]
    pub fn total_workers(&self) -> usize {
        self.num_groups * self.group_size
    }
}

/// Execution state of one group inside a cooperative launch.
///
/// Barriers are group-level operations: there is no way for a single worker
/// to call [`Group::sync_threads`], so every barrier is reached by the whole
/// group.
pub struct Group<'a, S> {
    id: usize,
    size: usize,
    num_groups: usize,
    shared: &'a mut [S],
    barriers: usize,
}

impl<'a, S> Group<'a, S> {
    /// Group index.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Workers in this group.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Groups in the grid.
    #[inline]
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Barriers issued so far.
    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.barriers
    }

    /// Run one barrier-free region for every worker of the group.
    ///
    /// The body receives the group-shared memory. Within a region a worker
    /// must only read slots no other worker writes in the same region.
    pub fn for_each_worker<F>(&mut self, mut body: F)
    where
        F: FnMut(Worker, &mut [S]),
    {
        for local_id in 0..self.size {
            let worker = Worker {
                local_id,
                group_id: self.id,
                group_size: self.size,
                num_groups: self.num_groups,
            };
            body(worker, &mut *self.shared);
        }
    }

    /// Group-wide barrier.
    #[inline]
    pub fn sync_threads(&mut self) {
        self.barriers += 1;
    }
}

/// Summary of a completed launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchStats {
    /// Groups executed.
    pub groups: usize,
    /// Workers executed.
    pub workers: usize,
    /// Barriers issued by every group.
    pub barriers_per_group: usize,
}

impl CpuDevice {
    /// Launch `kernel` once per worker of the grid.
    ///
    /// The launch is recorded on the device queue; host access to shared
    /// memory requires a [`CpuDevice::synchronize`] afterwards.
    pub fn launch<F>(&self, config: &LaunchConfig, kernel: F) -> Result<LaunchStats>
    where
        F: Fn(Worker) + Sync + Send,
    {
        config.validate()?;
        self.begin_launch();

        let LaunchConfig {
            grid_size,
            group_size,
        } = *config;
        trace!(
            "CPU launch on device {}: grid={}, group={}",
            self.index(),
            grid_size,
            group_size
        );

        self.install(|| {
            (0..grid_size).into_par_iter().for_each(|group_id| {
                for local_id in 0..group_size {
                    kernel(Worker {
                        local_id,
                        group_id,
                        group_size,
                        num_groups: grid_size,
                    });
                }
            })
        });

        Ok(LaunchStats {
            groups: grid_size,
            workers: config.total_workers(),
            barriers_per_group: 0,
        })
    }

    /// Launch a group program with `group_size` slots of group-shared memory.
    ///
    /// Shared memory is not cleared between groups; kernels initialize the
    /// slots they use. Every group must issue the same number of barriers,
    /// otherwise the launch fails as a hardware launch would hang.
    pub fn launch_groups<S, F>(&self, config: &LaunchConfig, kernel: F) -> Result<LaunchStats>
    where
        S: Copy + Default + Send,
        F: Fn(&mut Group<'_, S>) + Sync + Send,
    {
        config.validate_cooperative()?;
        self.begin_launch();

        let LaunchConfig {
            grid_size,
            group_size,
        } = *config;
        trace!(
            "CPU cooperative launch on device {}: grid={}, group={}",
            self.index(),
            grid_size,
            group_size
        );

        let barrier_counts: Vec<usize> = self.install(|| {
            (0..grid_size)
                .into_par_iter()
                .map_init(
                    || vec![S::default(); group_size],
                    |shared, group_id| {
                        let mut group = Group {
                            id: group_id,
                            size: group_size,
                            num_groups: grid_size,
                            shared: shared.as_mut_slice(),
                            barriers: 0,
                        };
                        kernel(&mut group);
                        group.barriers
                    },
                )
                .collect()
        });

        let barriers_per_group = barrier_counts.first().copied().unwrap_or(0);
        if let Some((group_id, count)) = barrier_counts
            .iter()
            .enumerate()
            .find(|(_, &count)| count != barriers_per_group)
        {
            return Err(StreamError::device(format!(
                "divergent barriers: group {} issued {} barriers, group 0 issued {}",
                group_id, count, barriers_per_group
            )));
        }

        Ok(LaunchStats {
            groups: grid_size,
            workers: config.total_workers(),
            barriers_per_group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuDeviceProperties, CpuPlatform};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn device() -> Arc<CpuDevice> {
        CpuPlatform::with_devices(vec![CpuDeviceProperties::detect().with_compute_units(3)])
            .open(0)
            .unwrap()
    }

    #[test]
    fn test_worker_ids() {
        let w = Worker {
            local_id: 5,
            group_id: 2,
            group_size: 8,
            num_groups: 4,
        };
        assert_eq!(w.global_id(), 21);
        assert_eq!(w.total_workers(), 32);
    }

    #[test]
    fn test_launch_runs_every_worker() {
        let device = device();
        let count = AtomicUsize::new(0);
        let stats = device
            .launch(&LaunchConfig::new(7, 16), |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 112);
        assert_eq!(stats.workers, 112);
        assert!(!device.is_idle());
        device.synchronize().unwrap();
    }

    #[test]
    fn test_empty_grid() {
        let device = device();
        let stats = device.launch(&LaunchConfig::new(0, 1024), |_| {}).unwrap();
        assert_eq!(stats.workers, 0);
    }

    #[test]
    fn test_regions_are_ordered() {
        // Each worker reads its neighbour's slot after a barrier; without the
        // region ordering the last worker would see an unwritten slot.
        let device = device();
        let bad = AtomicUsize::new(0);
        device
            .launch_groups::<usize, _>(&LaunchConfig::new(4, 32), |group| {
                let size = group.size();
                group.for_each_worker(|w, shared| shared[w.local_id] = w.local_id + 1);
                group.sync_threads();
                group.for_each_worker(|w, shared| {
                    if shared[(w.local_id + 1) % size] != (w.local_id + 1) % size + 1 {
                        bad.fetch_add(1, Ordering::Relaxed);
                    }
                });
            })
            .unwrap();
        assert_eq!(bad.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_divergent_barriers_rejected() {
        let device = device();
        let err = device
            .launch_groups::<f32, _>(&LaunchConfig::new(4, 8), |group| {
                if group.id() == 2 {
                    group.sync_threads();
                }
            })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_power_of_two_group_rejected() {
        let device = device();
        let result = device.launch_groups::<f32, _>(&LaunchConfig::new(1, 12), |_| {});
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
    }
}
