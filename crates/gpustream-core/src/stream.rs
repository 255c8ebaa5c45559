//! The kernel suite contract every backend implements.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::error::{Result, StreamError};
use crate::residency::Residency;
use crate::scalar::StreamScalar;

/// Owner of the A, B and C arrays plus the kernel suite that runs over them.
///
/// Every operation is synchronous: it returns once the device has finished
/// the dispatch and the device error status has been checked. Buffers are
/// released when the implementor is dropped.
pub trait Stream<T: StreamScalar>: Send {
    /// Fill A, B and C with `a`, `b` and `c`.
    fn init_arrays(&mut self, a: T, b: T, c: T) -> Result<()>;

    /// Copy the current device contents into host slices of `array_size` elements.
    fn read_arrays(&mut self, a: &mut [T], b: &mut [T], c: &mut [T]) -> Result<()>;

    /// Upload host slices of `array_size` elements into A, B and C.
    fn write_arrays(&mut self, a: &[T], b: &[T], c: &[T]) -> Result<()>;

    /// `C[i] = A[i]`
    fn copy(&mut self) -> Result<()>;

    /// `B[i] = scalar * C[i]`
    fn mul(&mut self) -> Result<()>;

    /// `C[i] = A[i] + B[i]`
    fn add(&mut self) -> Result<()>;

    /// `A[i] = B[i] + scalar * C[i]`
    fn triad(&mut self) -> Result<()>;

    /// `A[i] += B[i] + scalar * C[i]`
    fn nstream(&mut self) -> Result<()>;

    /// Sum of `A[i] * B[i]`.
    fn dot(&mut self) -> Result<T>;

    /// Number of elements in each array.
    fn array_size(&self) -> usize;

    /// Residency strategy chosen at construction.
    fn residency(&self) -> Residency;

    /// Groups launched by the dot-product reduction.
    fn dot_num_blocks(&self) -> usize;

    /// Device the arrays live on.
    fn device_info(&self) -> &DeviceInfo;

    /// Run one kernel of the suite by tag, returning the dot result if any.
    fn run_kernel(&mut self, kernel: Kernel) -> Result<Option<T>> {
        match kernel {
            Kernel::Copy => self.copy().map(|_| None),
            Kernel::Mul => self.mul().map(|_| None),
            Kernel::Add => self.add().map(|_| None),
            Kernel::Triad => self.triad().map(|_| None),
            Kernel::Nstream => self.nstream().map(|_| None),
            Kernel::Dot => self.dot().map(Some),
        }
    }
}

/// Verify that host slices handed to read/write match the array size.
pub fn check_host_lengths(expected: usize, lengths: [usize; 3]) -> Result<()> {
    match lengths.into_iter().find(|&len| len != expected) {
        Some(actual) => Err(StreamError::LengthMismatch { expected, actual }),
        None => Ok(()),
    }
}

/// Benchmark kernels that are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// `C = A`
    Copy,
    /// `B = scalar * C`
    Mul,
    /// `C = A + B`
    Add,
    /// `A = B + scalar * C`
    Triad,
    /// `A += B + scalar * C`
    Nstream,
    /// `sum(A * B)`
    Dot,
}

impl Kernel {
    /// Kernels of the classic suite, in execution order.
    pub const CLASSIC: [Kernel; 5] = [
        Kernel::Copy,
        Kernel::Mul,
        Kernel::Add,
        Kernel::Triad,
        Kernel::Dot,
    ];

    /// Report label.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Copy => "Copy",
            Kernel::Mul => "Mul",
            Kernel::Add => "Add",
            Kernel::Triad => "Triad",
            Kernel::Nstream => "Nstream",
            Kernel::Dot => "Dot",
        }
    }

    /// Number of full arrays the kernel moves through memory.
    pub fn arrays_touched(&self) -> usize {
        match self {
            Kernel::Copy | Kernel::Mul | Kernel::Dot => 2,
            Kernel::Add | Kernel::Triad => 3,
            Kernel::Nstream => 4,
        }
    }

    /// Bytes read plus written by one invocation.
    pub fn bytes_moved(&self, array_size: usize, element_size: usize) -> u64 {
        (self.arrays_touched() * array_size) as u64 * element_size as u64
    }

    /// Floating-point operations per invocation.
    pub fn flops(&self, array_size: usize) -> u64 {
        let per_element = match self {
            Kernel::Copy => 0,
            Kernel::Mul | Kernel::Add => 1,
            Kernel::Triad | Kernel::Dot => 2,
            Kernel::Nstream => 3,
        };
        per_element * array_size as u64
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_moved() {
        assert_eq!(Kernel::Copy.bytes_moved(1000, 8), 16_000);
        assert_eq!(Kernel::Triad.bytes_moved(1000, 4), 12_000);
        assert_eq!(Kernel::Nstream.bytes_moved(10, 8), 320);
    }

    #[test]
    fn test_flops() {
        assert_eq!(Kernel::Copy.flops(100), 0);
        assert_eq!(Kernel::Dot.flops(100), 200);
        assert_eq!(Kernel::Nstream.flops(100), 300);
    }

    #[test]
    fn test_host_lengths() {
        assert!(check_host_lengths(4, [4, 4, 4]).is_ok());
        assert_eq!(
            check_host_lengths(4, [4, 3, 4]),
            Err(StreamError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
