//! Launch geometry and the grid-stride iteration policy.
//!
//! Every kernel of the suite runs on a grid of `grid_size` groups with
//! `group_size` workers each. A worker starts at its global index and advances
//! by the total worker count until it passes the end of the array, so the grid
//! never has to match the array length.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Workers per group for every kernel in the suite.
pub const GROUP_SIZE: usize = 1024;

/// Groups per parallel processor used by the dot-product reduction.
pub const DOT_GROUPS_PER_PROCESSOR: usize = 4;

/// Integer division rounding up.
#[inline]
pub const fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Grid geometry for a single launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Number of groups.
    pub grid_size: usize,
    /// Workers per group.
    pub group_size: usize,
}

impl LaunchConfig {
    /// Create a launch configuration.
    pub const fn new(grid_size: usize, group_size: usize) -> Self {
        Self {
            grid_size,
            group_size,
        }
    }

    /// Geometry of an elementwise kernel: one group per `group_size` elements.
    pub const fn elementwise(array_size: usize, group_size: usize) -> Self {
        Self::new(ceil_div(array_size, group_size), group_size)
    }

    /// Geometry of the dot-product reduction: a fixed grid of `num_groups`.
    pub const fn reduction(num_groups: usize, group_size: usize) -> Self {
        Self::new(num_groups, group_size)
    }

    /// Total number of workers in the grid.
    #[inline]
    pub const fn total_workers(&self) -> usize {
        self.grid_size * self.group_size
    }

    /// Check that the geometry can be launched at all.
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(StreamError::InvalidConfig(
                "group size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the geometry supports a halving tree reduction.
    ///
    /// The offset sequence `group_size / 2, / 4, ..., 1` only covers every slot
    /// when `group_size` is a power of two.
    pub fn validate_cooperative(&self) -> Result<()> {
        self.validate()?;
        if !self.group_size.is_power_of_two() {
            return Err(StreamError::InvalidConfig(format!(
                "group size {} is not a power of two",
                self.group_size
            )));
        }
        Ok(())
    }

    /// Number of halving steps (and barriers) of a tree reduction.
    #[inline]
    pub fn reduction_steps(&self) -> usize {
        self.group_size.trailing_zeros() as usize
    }
}

/// Number of groups the dot-product reduction launches on a device with
/// `parallel_processors` compute units.
#[inline]
pub fn dot_num_blocks(parallel_processors: usize) -> usize {
    parallel_processors.max(1) * DOT_GROUPS_PER_PROCESSOR
}

/// Indices visited by one worker under the grid-stride policy.
#[derive(Debug, Clone)]
pub struct GridStride {
    next: usize,
    stride: usize,
    end: usize,
}

impl Iterator for GridStride {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.next >= self.end {
            return None;
        }
        let i = self.next;
        // Saturate so the last step never wraps around for huge extents.
        self.next = self.next.saturating_add(self.stride);
        Some(i)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.next >= self.end {
            0
        } else {
            ceil_div(self.end - self.next, self.stride)
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for GridStride {}

/// Grid-stride indices for the worker at `global_id` out of `total_workers`.
#[inline]
pub fn grid_stride(global_id: usize, total_workers: usize, array_size: usize) -> GridStride {
    debug_assert!(total_workers > 0);
    GridStride {
        next: global_id,
        stride: total_workers.max(1),
        end: array_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(1, 1024), 1);
        assert_eq!(ceil_div(1024, 1024), 1);
        assert_eq!(ceil_div(1025, 1024), 2);
        assert_eq!(ceil_div(10_000_000, 1024), 9766);
    }

    #[test]
    fn test_elementwise_geometry() {
        let cfg = LaunchConfig::elementwise(1025, GROUP_SIZE);
        assert_eq!(cfg.grid_size, 2);
        assert_eq!(cfg.total_workers(), 2048);
    }

    #[test]
    fn test_grid_stride_covers_each_index_once() {
        let total = 12;
        let n = 100;
        let mut seen = vec![0u32; n];
        for id in 0..total {
            for i in grid_stride(id, total, n) {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_grid_stride_small_array() {
        // More workers than elements: most workers do nothing.
        assert_eq!(grid_stride(0, 2048, 1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(grid_stride(1, 2048, 1).count(), 0);
        assert_eq!(grid_stride(3, 4, 11).collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(grid_stride(3, 4, 11).len(), 2);
    }

    #[test]
    fn test_cooperative_validation() {
        assert!(LaunchConfig::reduction(8, 1024).validate_cooperative().is_ok());
        assert!(LaunchConfig::reduction(8, 1).validate_cooperative().is_ok());
        assert!(LaunchConfig::reduction(8, 768).validate_cooperative().is_err());
        assert!(LaunchConfig::reduction(8, 0).validate().is_err());
    }

    #[test]
    fn test_reduction_steps() {
        assert_eq!(LaunchConfig::reduction(1, 1024).reduction_steps(), 10);
        assert_eq!(LaunchConfig::reduction(1, 1).reduction_steps(), 0);
        assert_eq!(dot_num_blocks(80), 320);
        assert_eq!(dot_num_blocks(0), 4);
    }
}
