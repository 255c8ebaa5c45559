//! Element types a benchmark run can be instantiated for.

use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Mul};

use serde::{Deserialize, Serialize};

/// Floating-point precision of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit `f32`.
    Single,
    /// 64-bit `f64`.
    Double,
}

impl Precision {
    /// Human-readable name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Single => "float",
            Precision::Double => "double",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Numeric element of the A, B and C arrays.
///
/// Sealed: implemented for `f32` and `f64` only.
pub trait StreamScalar:
    sealed::Sealed
    + Copy
    + Default
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + Add<Output = Self>
    + Mul<Output = Self>
    + AddAssign
    + 'static
{
    /// Multiplier used by mul, triad and nstream.
    const SCALAR: Self;
    /// Additive identity.
    const ZERO: Self;
    /// Precision tag.
    const PRECISION: Precision;
    /// Type name in C-family kernel source.
    const C_TYPE: &'static str;
    /// Machine epsilon.
    const EPSILON: Self;
    /// Relative tolerance accepted for the dot product against a gold value.
    const DOT_TOLERANCE: f64;

    /// Convert from `f64`, rounding to the element precision.
    fn from_f64(value: f64) -> Self;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Absolute value.
    fn abs(self) -> Self;

    /// Size of one element in bytes.
    #[inline]
    fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}

impl StreamScalar for f32 {
    const SCALAR: Self = 3.0;
    const ZERO: Self = 0.0;
    const PRECISION: Precision = Precision::Single;
    const C_TYPE: &'static str = "float";
    const EPSILON: Self = f32::EPSILON;
    const DOT_TOLERANCE: f64 = 1.0e-3;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn abs(self) -> Self {
        f32::abs(self)
    }
}

impl StreamScalar for f64 {
    const SCALAR: Self = 3.0;
    const ZERO: Self = 0.0;
    const PRECISION: Precision = Precision::Double;
    const C_TYPE: &'static str = "double";
    const EPSILON: Self = f64::EPSILON;
    const DOT_TOLERANCE: f64 = 1.0e-8;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }
}
