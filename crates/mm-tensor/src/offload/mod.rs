//! Accelerator-offload matrix multiplication.
//!
//! [`multiply_offload`] drives a [`DeviceRuntime`] through a fixed protocol:
//!
//! 1. select the first device of the first platform
//! 2. create a context and a command queue
//! 3. compile the embedded program and look up its entry point
//! 4. allocate A, B and C on the device and upload A and B
//! 5. bind the three buffers and the four dimensions
//! 6. launch a (C.columns, C.rows) grid in groups of (1, 1)
//! 7. wait for completion and download C
//!
//! Each acquired resource is held by a guard that releases it on drop, so
//! every exit path, including `?` on a failed step, frees everything in
//! reverse acquisition order before the call returns.

pub mod host;
#[cfg(feature = "metal")]
pub mod metal;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod program;
pub mod runtime;
pub mod status;

use std::sync::Arc;

use crate::backend::MatmulBackend;
use crate::dtype::Element;
use crate::error::{MatmulError, Result};
use crate::matrix::{check_dims, Matrix};

pub use host::{Call, HostRuntime};
#[cfg(feature = "metal")]
pub use metal::MetalRuntime;
#[cfg(feature = "opencl")]
pub use opencl::OpenClRuntime;
pub use runtime::{
    BufferAccess, BufferId, ContextId, DeviceId, DeviceInfo, DeviceResult, DeviceRuntime, Dialect,
    Discovery, KernelArg, KernelId, PlatformId, PlatformInfo, ProgramId, QueueId, Resource,
};
pub use status::Status;

/// Kernel that delegates the product to an accelerator runtime.
#[derive(Debug, Clone)]
pub struct OffloadKernel {
    runtime: Arc<dyn DeviceRuntime>,
}

impl OffloadKernel {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        OffloadKernel { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }
}

impl<T: Element> MatmulBackend<T> for OffloadKernel {
    fn name(&self) -> &str {
        "offload"
    }

    fn matmul(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
        multiply_offload(self.runtime.as_ref(), a, b)
    }
}

/// Releases a device resource when dropped.
struct Scoped<'r> {
    runtime: &'r dyn DeviceRuntime,
    resource: Resource,
}

impl<'r> Scoped<'r> {
    fn new(runtime: &'r dyn DeviceRuntime, resource: Resource) -> Self {
        Scoped { runtime, resource }
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        log::trace!("release {:?}", self.resource);
        if let Err(code) = self.runtime.release(self.resource) {
            log::warn!(
                "failed to release {:?}: {} ({code})",
                self.resource,
                status::name(code)
            );
        }
    }
}

fn backend(call: &'static str) -> impl FnOnce(Status) -> MatmulError {
    move |status| {
        log::debug!("{call} failed: {} ({status})", status::name(status));
        MatmulError::Backend { status, call }
    }
}

fn discovery(call: &'static str) -> impl FnOnce(Status) -> MatmulError {
    move |status| MatmulError::Discovery { status, call }
}

fn dim_arg(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| MatmulError::Backend {
        status: status::INVALID_VALUE,
        call: "set_arg",
    })
}

/// Computes `a x b` on the first device `runtime` exposes.
///
/// # Errors
/// - `DimensionMismatch` when the shapes are incompatible
/// - `NoPlatform` / `NoDevice` when discovery finds nothing
/// - `UnsupportedDType` when the device cannot run `T`
/// - `Backend` carrying the native status of the first failing call
pub fn multiply_offload<T: Element>(
    runtime: &dyn DeviceRuntime,
    a: &Matrix<T>,
    b: &Matrix<T>,
) -> Result<Matrix<T>> {
    let (m, k, n) = check_dims(a, b)?;
    log::debug!(
        "offload matmul [{m}x{k}] @ [{k}x{n}] ({}) via {}",
        T::DTYPE,
        runtime.name()
    );

    let mut c = Matrix::try_zeros(m, n)?;
    if c.is_empty() || k == 0 {
        return Ok(c);
    }

    let platforms = runtime.platforms().map_err(discovery("platforms"))?;
    let platform = *platforms.first().ok_or(MatmulError::NoPlatform)?;
    match runtime.platform_info(platform) {
        Ok(info) => log::info!(
            "using {} platform '{}' ({}, {})",
            runtime.name(),
            info.name,
            info.vendor,
            info.version
        ),
        Err(code) => log::warn!("platform info unavailable: {} ({code})", status::name(code)),
    }
    let devices = runtime.devices(platform).map_err(discovery("devices"))?;
    let device = *devices.first().ok_or(MatmulError::NoDevice)?;

    match runtime.device_info(device) {
        Ok(info) => log::info!(
            "using {} device '{}' (max work-group size {})",
            runtime.name(),
            info.name,
            info.max_work_group_size
        ),
        Err(code) => log::warn!("device info unavailable: {} ({code})", status::name(code)),
    }

    if !runtime.supports(device, T::DTYPE) {
        return Err(MatmulError::UnsupportedDType {
            backend: runtime.name().to_string(),
            dtype: T::DTYPE,
        });
    }

    let dims = [dim_arg(m)?, dim_arg(k)?, dim_arg(k)?, dim_arg(n)?];

    let context = runtime
        .create_context(device)
        .map_err(backend("create_context"))?;
    let _context = Scoped::new(runtime, Resource::Context(context));

    let queue = runtime
        .create_queue(context, device)
        .map_err(backend("create_queue"))?;
    let _queue = Scoped::new(runtime, Resource::Queue(queue));

    let options = program::build_options::<T>();
    log::trace!("build program ({options})");
    let prog = runtime
        .build_program(context, program::source(runtime.dialect()), &options)
        .map_err(backend("build_program"))?;
    let _prog = Scoped::new(runtime, Resource::Program(prog));

    let kernel = runtime
        .create_kernel(prog, program::ENTRY_POINT)
        .map_err(backend("create_kernel"))?;
    let _kernel = Scoped::new(runtime, Resource::Kernel(kernel));

    let a_bytes: &[u8] = bytemuck::cast_slice(a.as_slice());
    let b_bytes: &[u8] = bytemuck::cast_slice(b.as_slice());
    let c_len = c.len() * T::DTYPE.size_in_bytes();

    let buf_a = runtime
        .create_buffer(context, BufferAccess::ReadOnly, a_bytes.len())
        .map_err(backend("create_buffer"))?;
    let _buf_a = Scoped::new(runtime, Resource::Buffer(buf_a));
    let buf_b = runtime
        .create_buffer(context, BufferAccess::ReadOnly, b_bytes.len())
        .map_err(backend("create_buffer"))?;
    let _buf_b = Scoped::new(runtime, Resource::Buffer(buf_b));
    let buf_c = runtime
        .create_buffer(context, BufferAccess::ReadWrite, c_len)
        .map_err(backend("create_buffer"))?;
    let _buf_c = Scoped::new(runtime, Resource::Buffer(buf_c));

    log::trace!("upload {} + {} bytes", a_bytes.len(), b_bytes.len());
    runtime
        .write_buffer(queue, buf_a, a_bytes)
        .map_err(backend("write_buffer"))?;
    runtime
        .write_buffer(queue, buf_b, b_bytes)
        .map_err(backend("write_buffer"))?;

    let args = [
        (program::ARG_A, KernelArg::Buffer(buf_a)),
        (program::ARG_B, KernelArg::Buffer(buf_b)),
        (program::ARG_C, KernelArg::Buffer(buf_c)),
        (program::ARG_HEIGHT_A, KernelArg::Int(dims[0])),
        (program::ARG_WIDTH_A, KernelArg::Int(dims[1])),
        (program::ARG_HEIGHT_B, KernelArg::Int(dims[2])),
        (program::ARG_WIDTH_B, KernelArg::Int(dims[3])),
    ];
    for (index, arg) in args {
        runtime
            .set_arg(kernel, index, arg)
            .map_err(backend("set_arg"))?;
    }

    log::trace!("launch {n}x{m} work items");
    runtime
        .enqueue_nd_range(queue, kernel, [n, m], program::LOCAL_SIZE)
        .map_err(backend("enqueue_nd_range"))?;
    runtime.finish(queue).map_err(backend("finish"))?;

    runtime
        .read_buffer(queue, buf_c, bytemuck::cast_slice_mut(c.as_mut_slice()))
        .map_err(backend("read_buffer"))?;

    Ok(c)
}
