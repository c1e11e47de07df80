//! `mm-tensor` - Dense matrix multiplication kernels.
//!
//! This crate provides:
//! - A row-major `Matrix` store over `f32` and `f64`
//! - A `MatmulBackend` trait shared by every kernel
//! - `ReferenceKernel`, the scalar oracle
//! - `VectorizedKernel`, 256-bit lane dot products with masked tails
//! - `ParallelKernel`, row blocks spread over a worker pool
//! - `OffloadKernel`, which runs the product on an accelerator runtime
//!   (`HostRuntime` everywhere, `OpenClRuntime` with the `opencl` feature,
//!   `MetalRuntime` with the `metal` feature)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod matrix;
pub mod offload;

// Re-export primary types at the crate root for convenience.
pub use backend::MatmulBackend;
pub use cpu::{
    multiply_parallel, multiply_vectorized, simd_level, ParallelKernel, ReferenceKernel,
    SimdLevel, VectorizedKernel,
};
pub use cpu::simd::LaneElement;
pub use dtype::{DType, Element};
pub use error::{MatmulError, Result};
pub use matrix::Matrix;
#[cfg(feature = "metal")]
pub use offload::MetalRuntime;
#[cfg(feature = "opencl")]
pub use offload::OpenClRuntime;
pub use offload::{multiply_offload, DeviceRuntime, HostRuntime, OffloadKernel};
