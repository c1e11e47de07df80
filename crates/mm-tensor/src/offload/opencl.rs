//! OpenCL implementation of the device protocol.
//!
//! Each protocol step maps onto one OpenCL call through `opencl3`, so the
//! embedded `kernels/matmul.cl` program is compiled by the vendor driver and
//! executed on the selected device. Native statuses are passed through
//! unchanged.

use std::collections::HashMap;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, CL_BLOCKING};
use parking_lot::Mutex;

use crate::dtype::DType;

use super::runtime::{
    BufferAccess, BufferId, ContextId, DeviceId, DeviceInfo, DeviceResult, DeviceRuntime,
    Dialect, Discovery, KernelArg, KernelId, PlatformId, PlatformInfo, ProgramId, QueueId,
    Resource,
};
use super::status::{self, Status};

fn native(err: ClError) -> Status {
    err.0
}

#[derive(Default)]
struct State {
    next_id: u64,
    contexts: HashMap<u64, Context>,
    queues: HashMap<u64, CommandQueue>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, Kernel>,
    buffers: HashMap<u64, Buffer<u8>>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Runtime backed by the installed OpenCL platforms.
pub struct OpenClRuntime {
    state: Mutex<State>,
}

// OpenCL objects are thread-safe except kernels during argument binding,
// and every kernel access happens under the state lock.
unsafe impl Send for OpenClRuntime {}
unsafe impl Sync for OpenClRuntime {}

impl std::fmt::Debug for OpenClRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClRuntime").finish_non_exhaustive()
    }
}

impl OpenClRuntime {
    /// Returns `None` when no OpenCL platform is installed.
    pub fn new() -> Option<Self> {
        let platforms = get_platforms().ok()?;
        if platforms.is_empty() {
            return None;
        }
        log::debug!("{} OpenCL platform(s) found", platforms.len());
        Some(OpenClRuntime {
            state: Mutex::new(State::default()),
        })
    }

    fn platform(&self, platform: PlatformId) -> DeviceResult<Platform> {
        get_platforms()
            .map_err(native)?
            .into_iter()
            .nth(platform.0 as usize)
            .ok_or(status::INVALID_PLATFORM)
    }

    fn device(&self, device: DeviceId) -> DeviceResult<cl_device_id> {
        let ids = self
            .platform(PlatformId(device.platform() as u64))
            .map_err(|_| status::INVALID_DEVICE)?
            .get_devices(CL_DEVICE_TYPE_ALL)
            .map_err(native)?;
        ids.get(device.index()).copied().ok_or(status::INVALID_DEVICE)
    }
}

impl Discovery for OpenClRuntime {
    fn platforms(&self) -> DeviceResult<Vec<PlatformId>> {
        let count = get_platforms().map_err(native)?.len();
        Ok((0..count as u64).map(PlatformId).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> DeviceResult<PlatformInfo> {
        let platform = self.platform(platform)?;
        Ok(PlatformInfo {
            name: platform.name().map_err(native)?,
            vendor: platform.vendor().map_err(native)?,
            version: platform.version().map_err(native)?,
        })
    }

    fn devices(&self, platform: PlatformId) -> DeviceResult<Vec<DeviceId>> {
        let index = platform.0 as usize;
        match self.platform(platform)?.get_devices(CL_DEVICE_TYPE_ALL) {
            Ok(ids) => Ok((0..ids.len()).map(|d| DeviceId::new(index, d)).collect()),
            Err(err) if err.0 == status::DEVICE_NOT_FOUND => Ok(Vec::new()),
            Err(err) => Err(err.0),
        }
    }

    fn device_info(&self, device: DeviceId) -> DeviceResult<DeviceInfo> {
        let device = Device::new(self.device(device)?);
        Ok(DeviceInfo {
            name: device.name().map_err(native)?,
            max_work_group_size: device.max_work_group_size().map_err(native)?,
        })
    }
}

impl DeviceRuntime for OpenClRuntime {
    fn name(&self) -> &str {
        "opencl"
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenCl
    }

    fn supports(&self, device: DeviceId, dtype: DType) -> bool {
        match dtype {
            DType::F32 => true,
            DType::F64 => self
                .device(device)
                .ok()
                .and_then(|id| Device::new(id).extensions().ok())
                .is_some_and(|ext| ext.contains("cl_khr_fp64")),
        }
    }

    fn create_context(&self, device: DeviceId) -> DeviceResult<ContextId> {
        let device = Device::new(self.device(device)?);
        let context = Context::from_device(&device).map_err(native)?;
        let mut state = self.state.lock();
        let id = state.next();
        state.contexts.insert(id, context);
        Ok(ContextId(id))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> DeviceResult<QueueId> {
        let raw = self.device(device)?;
        let mut state = self.state.lock();
        let context = state
            .contexts
            .get(&context.0)
            .ok_or(status::INVALID_CONTEXT)?;
        if !context.devices().contains(&raw) {
            return Err(status::INVALID_DEVICE);
        }
        #[allow(deprecated, unused_unsafe)]
        let queue = unsafe { CommandQueue::create_default(context, 0) }.map_err(native)?;
        let id = state.next();
        state.queues.insert(id, queue);
        Ok(QueueId(id))
    }

    fn build_program(
        &self,
        context: ContextId,
        source: &str,
        options: &str,
    ) -> DeviceResult<ProgramId> {
        let mut state = self.state.lock();
        let context = state
            .contexts
            .get(&context.0)
            .ok_or(status::INVALID_CONTEXT)?;
        let program =
            Program::create_and_build_from_source(context, source, options).map_err(|log| {
                log::warn!("OpenCL program build failed: {log}");
                status::BUILD_PROGRAM_FAILURE
            })?;
        let id = state.next();
        state.programs.insert(id, program);
        Ok(ProgramId(id))
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> DeviceResult<KernelId> {
        let mut state = self.state.lock();
        let program = state
            .programs
            .get(&program.0)
            .ok_or(status::INVALID_PROGRAM)?;
        let kernel = Kernel::create(program, entry_point).map_err(native)?;
        let id = state.next();
        state.kernels.insert(id, kernel);
        Ok(KernelId(id))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        access: BufferAccess,
        bytes: usize,
    ) -> DeviceResult<BufferId> {
        let mut state = self.state.lock();
        let context = state
            .contexts
            .get(&context.0)
            .ok_or(status::INVALID_CONTEXT)?;
        let flags = match access {
            BufferAccess::ReadOnly => CL_MEM_READ_ONLY,
            BufferAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        let buffer = unsafe { Buffer::<u8>::create(context, flags, bytes, ptr::null_mut()) }
            .map_err(native)?;
        let id = state.next();
        state.buffers.insert(id, buffer);
        Ok(BufferId(id))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DeviceResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let queue = state
            .queues
            .get(&queue.0)
            .ok_or(status::INVALID_COMMAND_QUEUE)?;
        let buffer = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(status::INVALID_MEM_OBJECT)?;
        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
            .map_err(native)?;
        Ok(())
    }

    fn set_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> DeviceResult<()> {
        let state = self.state.lock();
        let kernel = state
            .kernels
            .get(&kernel.0)
            .ok_or(status::INVALID_KERNEL)?;
        match arg {
            KernelArg::Buffer(id) => {
                let mem = state
                    .buffers
                    .get(&id.0)
                    .ok_or(status::INVALID_MEM_OBJECT)?
                    .get();
                unsafe { kernel.set_arg(index, &mem) }.map_err(native)
            }
            KernelArg::Int(value) => unsafe { kernel.set_arg(index, &value) }.map_err(native),
        }
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueId,
        kernel: KernelId,
        global: [usize; 2],
        local: [usize; 2],
    ) -> DeviceResult<()> {
        let state = self.state.lock();
        let queue = state
            .queues
            .get(&queue.0)
            .ok_or(status::INVALID_COMMAND_QUEUE)?;
        let kernel = state
            .kernels
            .get(&kernel.0)
            .ok_or(status::INVALID_KERNEL)?;
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                2,
                ptr::null(),
                global.as_ptr(),
                local.as_ptr(),
                &[],
            )
        }
        .map_err(native)?;
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> DeviceResult<()> {
        let state = self.state.lock();
        state
            .queues
            .get(&queue.0)
            .ok_or(status::INVALID_COMMAND_QUEUE)?
            .finish()
            .map_err(native)
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DeviceResult<()> {
        let state = self.state.lock();
        let queue = state
            .queues
            .get(&queue.0)
            .ok_or(status::INVALID_COMMAND_QUEUE)?;
        let buffer = state
            .buffers
            .get(&buffer.0)
            .ok_or(status::INVALID_MEM_OBJECT)?;
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, out, &[]) }.map_err(native)?;
        Ok(())
    }

    fn release(&self, resource: Resource) -> DeviceResult<()> {
        let mut state = self.state.lock();
        // Dropping the wrapper issues the matching clRelease* call.
        let released = match resource {
            Resource::Context(id) => state.contexts.remove(&id.0).map(drop),
            Resource::Queue(id) => state.queues.remove(&id.0).map(drop),
            Resource::Program(id) => state.programs.remove(&id.0).map(drop),
            Resource::Kernel(id) => state.kernels.remove(&id.0).map(drop),
            Resource::Buffer(id) => state.buffers.remove(&id.0).map(drop),
        };
        released.ok_or(match resource {
            Resource::Context(_) => status::INVALID_CONTEXT,
            Resource::Queue(_) => status::INVALID_COMMAND_QUEUE,
            Resource::Program(_) => status::INVALID_PROGRAM,
            Resource::Kernel(_) => status::INVALID_KERNEL,
            Resource::Buffer(_) => status::INVALID_MEM_OBJECT,
        })
    }
}
