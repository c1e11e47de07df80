use std::fmt;
use std::ops::{Add, AddAssign, Mul};

/// Width in bytes of one hardware lane group (a 256-bit vector register).
pub const VECTOR_BYTES: usize = 32;

/// Element types a [`Matrix`](crate::Matrix) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Number of elements that fit one lane group.
    pub fn lanes(&self) -> usize {
        VECTOR_BYTES / self.size_in_bytes()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A numeric element usable by every kernel.
///
/// Implemented for `f32` and `f64` only. The lane width `LANES` is derived from
/// the element size, so the same kernel code serves both types.
pub trait Element:
    sealed::Sealed
    + Copy
    + Default
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + Send
    + Sync
    + Add<Output = Self>
    + Mul<Output = Self>
    + AddAssign
    + bytemuck::Pod
    + 'static
{
    const DTYPE: DType;
    const ZERO: Self;
    const ONE: Self;
    /// Elements per lane group: 8 for `f32`, 4 for `f64`.
    const LANES: usize = VECTOR_BYTES / std::mem::size_of::<Self>();
    /// Scalar type name in the accelerator program dialect.
    const OPENCL_TYPE: &'static str;

    /// Lossy conversion used to build test and identity data.
    fn from_f64(v: f64) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const OPENCL_TYPE: &'static str = "float";

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const OPENCL_TYPE: &'static str = "double";

    fn from_f64(v: f64) -> Self {
        v
    }
}
