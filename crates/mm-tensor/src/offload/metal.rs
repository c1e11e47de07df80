//! Metal implementation of the device protocol (macOS only).
//!
//! Metal has no platform layer and no separate context object, so the runtime
//! reports a single platform holding the system default device, and contexts
//! are bookkeeping entries. Metal compute has no double precision; `f64`
//! products are refused through [`DeviceRuntime::supports`].

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_foundation::NSString;
use objc2_metal::{
    MTLBuffer, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue, MTLComputeCommandEncoder,
    MTLComputePipelineState, MTLCreateSystemDefaultDevice, MTLDevice, MTLLibrary,
    MTLResourceOptions, MTLSize,
};
use parking_lot::Mutex;

use crate::dtype::DType;

use super::program::{define, ARG_COUNT};
use super::runtime::{
    BufferAccess, BufferId, ContextId, DeviceId, DeviceInfo, DeviceResult, DeviceRuntime,
    Dialect, Discovery, KernelArg, KernelId, PlatformId, PlatformInfo, ProgramId, QueueId,
    Resource,
};
use super::status;

type Device = Retained<ProtocolObject<dyn MTLDevice>>;
type Buffer = Retained<ProtocolObject<dyn MTLBuffer>>;
type CommandBuffer = Retained<ProtocolObject<dyn MTLCommandBuffer>>;

enum Slot {
    Context,
    Queue {
        queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
        in_flight: Vec<CommandBuffer>,
    },
    Program {
        library: Retained<ProtocolObject<dyn MTLLibrary>>,
    },
    Kernel {
        pipeline: Retained<ProtocolObject<dyn MTLComputePipelineState>>,
        args: [Option<KernelArg>; ARG_COUNT],
    },
    Buffer(Buffer),
}

#[derive(Default)]
struct State {
    next_id: u64,
    slots: HashMap<u64, Slot>,
}

impl State {
    fn insert(&mut self, slot: Slot) -> u64 {
        self.next_id += 1;
        self.slots.insert(self.next_id, slot);
        self.next_id
    }

    fn buffer(&self, id: BufferId) -> DeviceResult<&Buffer> {
        match self.slots.get(&id.0) {
            Some(Slot::Buffer(buffer)) => Ok(buffer),
            _ => Err(status::INVALID_MEM_OBJECT),
        }
    }
}

/// Runtime backed by the system default Metal device.
pub struct MetalRuntime {
    device: Device,
    state: Mutex<State>,
}

// Metal device, queue, pipeline and buffer objects are thread-safe; encoders
// never escape a single `enqueue_nd_range` call.
unsafe impl Send for MetalRuntime {}
unsafe impl Sync for MetalRuntime {}

impl std::fmt::Debug for MetalRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalRuntime")
            .field("device", &self.device.name().to_string())
            .finish_non_exhaustive()
    }
}

impl MetalRuntime {
    /// Returns `None` when the machine has no Metal device.
    pub fn new() -> Option<Self> {
        let device = MTLCreateSystemDefaultDevice()?;
        log::debug!("metal device: {}", device.name());
        Some(MetalRuntime {
            device,
            state: Mutex::new(State::default()),
        })
    }

    fn check_device(&self, device: DeviceId) -> DeviceResult<()> {
        if device.0 == 0 {
            Ok(())
        } else {
            Err(status::INVALID_DEVICE)
        }
    }
}

impl Discovery for MetalRuntime {
    fn platforms(&self) -> DeviceResult<Vec<PlatformId>> {
        Ok(vec![PlatformId(0)])
    }

    fn platform_info(&self, platform: PlatformId) -> DeviceResult<PlatformInfo> {
        if platform.0 != 0 {
            return Err(status::INVALID_PLATFORM);
        }
        Ok(PlatformInfo {
            name: "Metal".to_string(),
            vendor: "Apple".to_string(),
            version: "Metal (system default device)".to_string(),
        })
    }

    fn devices(&self, platform: PlatformId) -> DeviceResult<Vec<DeviceId>> {
        if platform.0 != 0 {
            return Err(status::INVALID_PLATFORM);
        }
        Ok(vec![DeviceId(0)])
    }

    fn device_info(&self, device: DeviceId) -> DeviceResult<DeviceInfo> {
        self.check_device(device)?;
        Ok(DeviceInfo {
            name: self.device.name().to_string(),
            max_work_group_size: self.device.maxThreadsPerThreadgroup().width,
        })
    }
}

impl DeviceRuntime for MetalRuntime {
    fn name(&self) -> &str {
        "metal"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Metal
    }

    fn supports(&self, device: DeviceId, dtype: DType) -> bool {
        device.0 == 0 && dtype == DType::F32
    }

    fn create_context(&self, device: DeviceId) -> DeviceResult<ContextId> {
        self.check_device(device)?;
        Ok(ContextId(self.state.lock().insert(Slot::Context)))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> DeviceResult<QueueId> {
        self.check_device(device)?;
        let mut state = self.state.lock();
        if !matches!(state.slots.get(&context.0), Some(Slot::Context)) {
            return Err(status::INVALID_CONTEXT);
        }
        let queue = self
            .device
            .newCommandQueue()
            .ok_or(status::OUT_OF_RESOURCES)?;
        Ok(QueueId(state.insert(Slot::Queue {
            queue,
            in_flight: Vec::new(),
        })))
    }

    fn build_program(
        &self,
        context: ContextId,
        source: &str,
        options: &str,
    ) -> DeviceResult<ProgramId> {
        let mut state = self.state.lock();
        if !matches!(state.slots.get(&context.0), Some(Slot::Context)) {
            return Err(status::INVALID_CONTEXT);
        }
        if define(options, "ELEM").is_some_and(|elem| elem != "float") {
            log::warn!("metal programs are compiled for float only (options: {options})");
            return Err(status::BUILD_PROGRAM_FAILURE);
        }
        let library = self
            .device
            .newLibraryWithSource_options_error(&NSString::from_str(source), None)
            .map_err(|err| {
                log::warn!("metal program build failed: {}", err.localizedDescription());
                status::BUILD_PROGRAM_FAILURE
            })?;
        Ok(ProgramId(state.insert(Slot::Program { library })))
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> DeviceResult<KernelId> {
        let mut state = self.state.lock();
        let Some(Slot::Program { library }) = state.slots.get(&program.0) else {
            return Err(status::INVALID_PROGRAM);
        };
        let function = library
            .newFunctionWithName(&NSString::from_str(entry_point))
            .ok_or(status::INVALID_KERNEL_NAME)?;
        let pipeline = self
            .device
            .newComputePipelineStateWithFunction_error(&function)
            .map_err(|err| {
                log::warn!(
                    "metal pipeline for {entry_point} failed: {}",
                    err.localizedDescription()
                );
                status::INVALID_KERNEL
            })?;
        Ok(KernelId(state.insert(Slot::Kernel {
            pipeline,
            args: [None; ARG_COUNT],
        })))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        _access: BufferAccess,
        bytes: usize,
    ) -> DeviceResult<BufferId> {
        let mut state = self.state.lock();
        if !matches!(state.slots.get(&context.0), Some(Slot::Context)) {
            return Err(status::INVALID_CONTEXT);
        }
        if bytes == 0 {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        let buffer = self
            .device
            .newBufferWithLength_options(bytes, MTLResourceOptions::StorageModeShared)
            .ok_or(status::MEM_OBJECT_ALLOCATION_FAILURE)?;
        Ok(BufferId(state.insert(Slot::Buffer(buffer))))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DeviceResult<()> {
        let state = self.state.lock();
        if !matches!(state.slots.get(&queue.0), Some(Slot::Queue { .. })) {
            return Err(status::INVALID_COMMAND_QUEUE);
        }
        let buffer = state.buffer(buffer)?;
        if data.len() > buffer.length() {
            return Err(status::INVALID_VALUE);
        }
        // Shared storage: the host pointer aliases device memory.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                buffer.contents().as_ptr().cast::<u8>(),
                data.len(),
            );
        }
        Ok(())
    }

    fn set_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let KernelArg::Buffer(id) = arg {
            state.buffer(id)?;
        }
        let Some(Slot::Kernel { args, .. }) = state.slots.get_mut(&kernel.0) else {
            return Err(status::INVALID_KERNEL);
        };
        let slot = args
            .get_mut(index as usize)
            .ok_or(status::INVALID_ARG_INDEX)?;
        *slot = Some(arg);
        Ok(())
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueId,
        kernel: KernelId,
        global: [usize; 2],
        local: [usize; 2],
    ) -> DeviceResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(Slot::Kernel { pipeline, args }) = state.slots.get(&kernel.0) else {
            return Err(status::INVALID_KERNEL);
        };
        if global.contains(&0) {
            return Err(status::INVALID_GLOBAL_WORK_SIZE);
        }
        if local.contains(&0) || local[0] * local[1] > pipeline.maxTotalThreadsPerThreadgroup() {
            return Err(status::INVALID_WORK_GROUP_SIZE);
        }
        let Some(Slot::Queue { queue: mtl_queue, .. }) = state.slots.get(&queue.0) else {
            return Err(status::INVALID_COMMAND_QUEUE);
        };

        let command_buffer = mtl_queue.commandBuffer().ok_or(status::OUT_OF_RESOURCES)?;
        let encoder = command_buffer
            .computeCommandEncoder()
            .ok_or(status::OUT_OF_RESOURCES)?;
        encoder.setComputePipelineState(pipeline);
        for (index, arg) in args.iter().enumerate() {
            match arg.ok_or(status::INVALID_KERNEL_ARGS) {
                Ok(KernelArg::Buffer(id)) => match state.buffer(id) {
                    Ok(buffer) => unsafe {
                        encoder.setBuffer_offset_atIndex(Some(&**buffer), 0, index);
                    },
                    Err(code) => {
                        encoder.endEncoding();
                        return Err(code);
                    }
                },
                Ok(KernelArg::Int(value)) => unsafe {
                    encoder.setBytes_length_atIndex(
                        NonNull::from(&value).cast::<c_void>(),
                        std::mem::size_of::<i32>(),
                        index,
                    );
                },
                Err(code) => {
                    encoder.endEncoding();
                    return Err(code);
                }
            }
        }
        let size = |[width, height]: [usize; 2]| MTLSize {
            width,
            height,
            depth: 1,
        };
        encoder.dispatchThreads_threadsPerThreadgroup(size(global), size(local));
        encoder.endEncoding();
        command_buffer.commit();

        if let Some(Slot::Queue { in_flight, .. }) = state.slots.get_mut(&queue.0) {
            in_flight.push(command_buffer);
        }
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let Some(Slot::Queue { in_flight, .. }) = state.slots.get_mut(&queue.0) else {
            return Err(status::INVALID_COMMAND_QUEUE);
        };
        let mut result = Ok(());
        for command_buffer in in_flight.drain(..) {
            command_buffer.waitUntilCompleted();
            if let Some(err) = command_buffer.error() {
                log::warn!("metal command buffer failed: {}", err.localizedDescription());
                result = Err(status::OUT_OF_RESOURCES);
            }
        }
        result
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DeviceResult<()> {
        let state = self.state.lock();
        if !matches!(state.slots.get(&queue.0), Some(Slot::Queue { .. })) {
            return Err(status::INVALID_COMMAND_QUEUE);
        }
        let buffer = state.buffer(buffer)?;
        if out.len() > buffer.length() {
            return Err(status::INVALID_VALUE);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                buffer.contents().as_ptr().cast::<u8>(),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }

    fn release(&self, resource: Resource) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let (id, invalid) = match resource {
            Resource::Context(id) => (id.0, status::INVALID_CONTEXT),
            Resource::Queue(id) => (id.0, status::INVALID_COMMAND_QUEUE),
            Resource::Program(id) => (id.0, status::INVALID_PROGRAM),
            Resource::Kernel(id) => (id.0, status::INVALID_KERNEL),
            Resource::Buffer(id) => (id.0, status::INVALID_MEM_OBJECT),
        };
        let kind_matches = matches!(
            (resource, state.slots.get(&id)),
            (Resource::Context(_), Some(Slot::Context))
                | (Resource::Queue(_), Some(Slot::Queue { .. }))
                | (Resource::Program(_), Some(Slot::Program { .. }))
                | (Resource::Kernel(_), Some(Slot::Kernel { .. }))
                | (Resource::Buffer(_), Some(Slot::Buffer(_)))
        );
        if !kind_matches {
            return Err(invalid);
        }
        state.slots.remove(&id);
        Ok(())
    }
}
