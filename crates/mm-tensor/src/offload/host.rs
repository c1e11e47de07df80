//! A simulated accelerator that runs on host threads.
//!
//! `HostRuntime` implements the full device protocol with its own resource
//! tables, so the offload path can run (and be tested) on machines without a
//! GPU or OpenCL driver. It does not interpret program text. `build_program`
//! accepts only the embedded [`OPENCL_SOURCE`] asset, checks that its entry
//! points follow the matmul argument contract, and launches then run a native
//! implementation of that kernel, one work item per output cell, on the rayon
//! pool. Running the program text itself needs a real device runtime such as
//! `OpenClRuntime` (feature `opencl`).
//!
//! For testing it also offers a configurable platform/device topology,
//! one-shot fault injection on any protocol call, and counters of live and
//! total acquired resources.

use std::collections::HashMap;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::dtype::{DType, Element};

use super::program::{define, ARG_COUNT, OPENCL_SOURCE};
use super::runtime::{
    BufferAccess, BufferId, ContextId, DeviceId, DeviceInfo, DeviceResult, DeviceRuntime,
    Dialect, Discovery, KernelArg, KernelId, PlatformId, PlatformInfo, ProgramId, QueueId,
    Resource,
};
use super::status::{self, Status};

const MAX_WORK_GROUP_SIZE: usize = 256;

/// Protocol calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Platforms,
    PlatformInfo,
    Devices,
    DeviceInfo,
    CreateContext,
    CreateQueue,
    BuildProgram,
    CreateKernel,
    CreateBuffer,
    WriteBuffer,
    SetArg,
    EnqueueNdRange,
    Finish,
    ReadBuffer,
}

#[derive(Debug)]
struct Fault {
    call: Call,
    skip: usize,
    status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    Buffer,
    Int,
}

/// Parameter list every executable entry point must declare.
const MATMUL_SIGNATURE: [Param; ARG_COUNT] = [
    Param::Buffer,
    Param::Buffer,
    Param::Buffer,
    Param::Int,
    Param::Int,
    Param::Int,
    Param::Int,
];

#[derive(Debug, Clone)]
struct EntryPoint {
    name: String,
    params: Vec<Param>,
}

#[derive(Debug)]
enum Slot {
    Context {
        device: DeviceId,
    },
    Queue,
    Program {
        dtype: DType,
        entry_points: Vec<EntryPoint>,
    },
    Kernel {
        dtype: DType,
        args: [Option<KernelArg>; ARG_COUNT],
    },
    Buffer {
        access: BufferAccess,
        data: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    slots: HashMap<u64, Slot>,
    acquired: usize,
    faults: Vec<Fault>,
}

impl State {
    fn insert(&mut self, slot: Slot) -> u64 {
        self.next_id += 1;
        self.acquired += 1;
        self.slots.insert(self.next_id, slot);
        self.next_id
    }

    fn check_fault(&mut self, call: Call) -> DeviceResult<()> {
        let Some(pos) = self.faults.iter().position(|f| f.call == call) else {
            return Ok(());
        };
        let fault = &mut self.faults[pos];
        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }
        let status = fault.status;
        self.faults.remove(pos);
        log::warn!("injected {} ({status}) on {call:?}", status::name(status));
        Err(status)
    }

    fn context(&self, id: ContextId) -> DeviceResult<DeviceId> {
        match self.slots.get(&id.0) {
            Some(Slot::Context { device }) => Ok(*device),
            _ => Err(status::INVALID_CONTEXT),
        }
    }

    fn queue(&self, id: QueueId) -> DeviceResult<()> {
        match self.slots.get(&id.0) {
            Some(Slot::Queue) => Ok(()),
            _ => Err(status::INVALID_COMMAND_QUEUE),
        }
    }

    fn buffer(&self, id: BufferId) -> DeviceResult<&[u8]> {
        match self.slots.get(&id.0) {
            Some(Slot::Buffer { data, .. }) => Ok(data),
            _ => Err(status::INVALID_MEM_OBJECT),
        }
    }

    fn buffer_mut(&mut self, id: BufferId) -> DeviceResult<&mut Vec<u8>> {
        match self.slots.get_mut(&id.0) {
            Some(Slot::Buffer { data, .. }) => Ok(data),
            _ => Err(status::INVALID_MEM_OBJECT),
        }
    }
}

/// Host-executed accelerator runtime.
#[derive(Debug)]
pub struct HostRuntime {
    platforms: usize,
    devices_per_platform: usize,
    state: Mutex<State>,
}

impl HostRuntime {
    /// One platform with one device.
    pub fn new() -> Self {
        Self::with_topology(1, 1)
    }

    /// `platforms` platforms with `devices_per_platform` devices each.
    pub fn with_topology(platforms: usize, devices_per_platform: usize) -> Self {
        HostRuntime {
            platforms,
            devices_per_platform,
            state: Mutex::new(State::default()),
        }
    }

    /// Makes the next `call` fail with `status`.
    pub fn inject_fault(&self, call: Call, status: Status) {
        self.fail_nth(call, 0, status);
    }

    /// Lets `nth` further invocations of `call` succeed, then fails the next
    /// one with `status`. Each armed fault fires once.
    pub fn fail_nth(&self, call: Call, nth: usize, status: Status) {
        self.state.lock().faults.push(Fault {
            call,
            skip: nth,
            status,
        });
    }

    /// Number of device resources currently allocated.
    pub fn live_resources(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of device resources ever allocated.
    pub fn total_acquired(&self) -> usize {
        self.state.lock().acquired
    }

    fn valid_device(&self, device: DeviceId) -> bool {
        device.platform() < self.platforms && device.index() < self.devices_per_platform
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for HostRuntime {
    fn platforms(&self) -> DeviceResult<Vec<PlatformId>> {
        self.state.lock().check_fault(Call::Platforms)?;
        Ok((0..self.platforms as u64).map(PlatformId).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> DeviceResult<PlatformInfo> {
        self.state.lock().check_fault(Call::PlatformInfo)?;
        if platform.0 as usize >= self.platforms {
            return Err(status::INVALID_PLATFORM);
        }
        Ok(PlatformInfo {
            name: format!("host platform {}", platform.0),
            vendor: "mm-tensor".to_string(),
            version: "OpenCL 1.2 (simulated)".to_string(),
        })
    }

    fn devices(&self, platform: PlatformId) -> DeviceResult<Vec<DeviceId>> {
        self.state.lock().check_fault(Call::Devices)?;
        if platform.0 as usize >= self.platforms {
            return Err(status::INVALID_PLATFORM);
        }
        Ok((0..self.devices_per_platform)
            .map(|d| DeviceId::new(platform.0 as usize, d))
            .collect())
    }

    fn device_info(&self, device: DeviceId) -> DeviceResult<DeviceInfo> {
        self.state.lock().check_fault(Call::DeviceInfo)?;
        if !self.valid_device(device) {
            return Err(status::INVALID_DEVICE);
        }
        Ok(DeviceInfo {
            name: format!("host device {}.{}", device.platform(), device.index()),
            max_work_group_size: MAX_WORK_GROUP_SIZE,
        })
    }
}

impl DeviceRuntime for HostRuntime {
    fn name(&self) -> &str {
        "host"
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenCl
    }

    fn create_context(&self, device: DeviceId) -> DeviceResult<ContextId> {
        let mut state = self.state.lock();
        state.check_fault(Call::CreateContext)?;
        if !self.valid_device(device) {
            return Err(status::INVALID_DEVICE);
        }
        Ok(ContextId(state.insert(Slot::Context { device })))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> DeviceResult<QueueId> {
        let mut state = self.state.lock();
        state.check_fault(Call::CreateQueue)?;
        if state.context(context)? != device {
            return Err(status::INVALID_DEVICE);
        }
        Ok(QueueId(state.insert(Slot::Queue)))
    }

    fn build_program(
        &self,
        context: ContextId,
        source: &str,
        options: &str,
    ) -> DeviceResult<ProgramId> {
        let mut state = self.state.lock();
        state.check_fault(Call::BuildProgram)?;
        state.context(context)?;
        if source != OPENCL_SOURCE {
            log::warn!("host runtime only runs the embedded matmul program");
            return Err(status::BUILD_PROGRAM_FAILURE);
        }
        let (dtype, entry_points) = compile(source, options).map_err(|msg| {
            log::warn!("program build failed: {msg}");
            status::BUILD_PROGRAM_FAILURE
        })?;
        Ok(ProgramId(state.insert(Slot::Program {
            dtype,
            entry_points,
        })))
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> DeviceResult<KernelId> {
        let mut state = self.state.lock();
        state.check_fault(Call::CreateKernel)?;
        let (dtype, params) = match state.slots.get(&program.0) {
            Some(Slot::Program {
                dtype,
                entry_points,
            }) => {
                let entry = entry_points
                    .iter()
                    .find(|e| e.name == entry_point)
                    .ok_or(status::INVALID_KERNEL_NAME)?;
                (*dtype, entry.params.clone())
            }
            _ => return Err(status::INVALID_PROGRAM),
        };
        if params != MATMUL_SIGNATURE {
            return Err(status::INVALID_KERNEL);
        }
        Ok(KernelId(state.insert(Slot::Kernel {
            dtype,
            args: [None; ARG_COUNT],
        })))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        access: BufferAccess,
        bytes: usize,
    ) -> DeviceResult<BufferId> {
        let mut state = self.state.lock();
        state.check_fault(Call::CreateBuffer)?;
        state.context(context)?;
        if bytes == 0 {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| status::MEM_OBJECT_ALLOCATION_FAILURE)?;
        data.resize(bytes, 0u8);
        Ok(BufferId(state.insert(Slot::Buffer { access, data })))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.check_fault(Call::WriteBuffer)?;
        state.queue(queue)?;
        let dst = state.buffer_mut(buffer)?;
        if data.len() > dst.len() {
            return Err(status::INVALID_VALUE);
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn set_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.check_fault(Call::SetArg)?;
        let index = index as usize;
        let param = *MATMUL_SIGNATURE
            .get(index)
            .ok_or(status::INVALID_ARG_INDEX)?;
        match (param, arg) {
            (Param::Buffer, KernelArg::Buffer(id)) => {
                state.buffer(id)?;
            }
            (Param::Int, KernelArg::Int(_)) => {}
            _ => return Err(status::INVALID_ARG_VALUE),
        }
        match state.slots.get_mut(&kernel.0) {
            Some(Slot::Kernel { args, .. }) => {
                args[index] = Some(arg);
                Ok(())
            }
            _ => Err(status::INVALID_KERNEL),
        }
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
        state.check_fault(Call::EnqueueNdRange)?;
        state.queue(queue)?;

        let (dtype, args) = match state.slots.get(&kernel.0) {
            Some(Slot::Kernel { dtype, args }) => (*dtype, *args),
            _ => return Err(status::INVALID_KERNEL),
        };
        let mut bound = [KernelArg::Int(0); ARG_COUNT];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = arg.ok_or(status::INVALID_KERNEL_ARGS)?;
        }
        let (a, b, c, dims) = match bound {
            [
                KernelArg::Buffer(a),
                KernelArg::Buffer(b),
                KernelArg::Buffer(c),
                KernelArg::Int(ha),
                KernelArg::Int(wa),
                KernelArg::Int(hb),
                KernelArg::Int(wb),
            ] => (a, b, c, [ha, wa, hb, wb]),
            _ => return Err(status::INVALID_KERNEL_ARGS),
        };

        if global.contains(&0) {
            return Err(status::INVALID_GLOBAL_WORK_SIZE);
        }
        if local.contains(&0)
            || global[0] % local[0] != 0
            || global[1] % local[1] != 0
            || local[0] * local[1] > MAX_WORK_GROUP_SIZE
        {
            return Err(status::INVALID_WORK_GROUP_SIZE);
        }

        match state.slots.get(&c.0) {
            Some(Slot::Buffer {
                access: BufferAccess::ReadWrite,
                ..
            }) => {}
            _ => return Err(status::INVALID_MEM_OBJECT),
        }

        // The output is taken out of its slot so A and B can be borrowed
        // alongside it; it is always put back.
        let mut out = std::mem::take(state.buffer_mut(c)?);
        let result = match (state.buffer(a), state.buffer(b)) {
            (Ok(a), Ok(b)) => match dtype {
                DType::F32 => execute::<f32>(a, b, &mut out, dims, global),
                DType::F64 => execute::<f64>(a, b, &mut out, dims, global),
            },
            (Err(code), _) | (_, Err(code)) => Err(code),
        };
        *state.buffer_mut(c)? = out;
        result
    }

    fn finish(&self, queue: QueueId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.check_fault(Call::Finish)?;
        // Launches run to completion inside enqueue_nd_range.
        state.queue(queue)
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.check_fault(Call::ReadBuffer)?;
        state.queue(queue)?;
        let src = state.buffer(buffer)?;
        if out.len() > src.len() {
            return Err(status::INVALID_VALUE);
        }
        out.copy_from_slice(&src[..out.len()]);
        Ok(())
    }

    fn release(&self, resource: Resource) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let (id, matches, invalid) = match resource {
            Resource::Context(id) => (id.0, state.context(id).is_ok(), status::INVALID_CONTEXT),
            Resource::Queue(id) => (id.0, state.queue(id).is_ok(), status::INVALID_COMMAND_QUEUE),
            Resource::Program(id) => (
                id.0,
                matches!(state.slots.get(&id.0), Some(Slot::Program { .. })),
                status::INVALID_PROGRAM,
            ),
            Resource::Kernel(id) => (
                id.0,
                matches!(state.slots.get(&id.0), Some(Slot::Kernel { .. })),
                status::INVALID_KERNEL,
            ),
            Resource::Buffer(id) => (id.0, state.buffer(id).is_ok(), status::INVALID_MEM_OBJECT),
        };
        if !matches {
            return Err(invalid);
        }
        state.slots.remove(&id);
        Ok(())
    }
}

/// Native counterpart of the embedded `matmul` program: work item
/// (col, row) accumulates row `row` of A against column `col` of B and
/// writes one cell of C.
fn execute<T: Element>(
    a: &[u8],
    b: &[u8],
    c: &mut [u8],
    dims: [i32; 4],
    global: [usize; 2],
) -> DeviceResult<()> {
    if dims.iter().any(|&d| d < 0) {
        return Err(status::INVALID_ARG_VALUE);
    }
    let width_a = dims[1] as usize;
    let width_b = dims[3] as usize;
    let [cols, rows] = global;

    let elem = std::mem::size_of::<T>();
    let (a_len, b_len, c_len) = (a.len() / elem, b.len() / elem, c.len() / elem);

    // Every read and write a work item performs must land inside its buffer.
    let in_bounds = cols <= width_b
        && rows * width_a <= a_len
        && (width_a == 0 || (width_a - 1) * width_b + cols <= b_len)
        && (rows - 1) * width_b + cols <= c_len;
    if !in_bounds {
        log::warn!("launch {cols}x{rows} would access memory outside its buffers");
        return Err(status::OUT_OF_RESOURCES);
    }

    let load = |bytes: &[u8], len: usize| -> Vec<T> {
        bytes[..len * elem]
            .chunks_exact(elem)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect()
    };
    let a = load(a, a_len);
    let b = load(b, b_len);
    let mut out = load(c, c_len);

    out.par_chunks_mut(width_b)
        .take(rows)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, cell) in out_row[..cols].iter_mut().enumerate() {
                let mut result = T::ZERO;
                for k in 0..width_a {
                    result += a[row * width_a + k] * b[k * width_b + col];
                }
                *cell = result;
            }
        });

    c[..c_len * elem].copy_from_slice(bytemuck::cast_slice(out.as_slice()));
    Ok(())
}

/// Compiles OpenCL C program text: resolves the element type from the build
/// options and collects every `__kernel` entry point with its parameter kinds.
fn compile(source: &str, options: &str) -> Result<(DType, Vec<EntryPoint>), String> {
    let dtype = match define(options, "ELEM") {
        Some("float") => DType::F32,
        Some("double") => DType::F64,
        Some(other) => return Err(format!("unsupported element type '{other}'")),
        None => return Err("ELEM is not defined".to_string()),
    };
    if dtype == DType::F64 && !source.contains("cl_khr_fp64") {
        return Err("double precision requires cl_khr_fp64".to_string());
    }

    let code = source
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    let mut entry_points = Vec::new();
    let mut rest = code.as_str();
    while let Some(pos) = rest.find("__kernel") {
        rest = &rest[pos + "__kernel".len()..];
        let open = rest.find('(').ok_or("missing parameter list")?;
        let close = rest
            .find(')')
            .filter(|&close| close > open)
            .ok_or("unterminated parameter list")?;
        let name = rest[..open]
            .trim()
            .strip_prefix("void")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or("kernel must be declared `void <name>`")?;
        let params = rest[open + 1..close]
            .split(',')
            .map(parse_param)
            .collect::<Result<Vec<_>, _>>()?;
        entry_points.push(EntryPoint {
            name: name.to_string(),
            params,
        });
        rest = &rest[close + 1..];
    }

    if entry_points.is_empty() {
        return Err("program declares no __kernel entry point".to_string());
    }
    Ok((dtype, entry_points))
}

fn parse_param(param: &str) -> Result<Param, String> {
    let param = param.trim();
    if param.contains("__global") && param.contains('*') {
        return if param.contains("ELEM") {
            Ok(Param::Buffer)
        } else {
            Err(format!("buffer parameter '{param}' must point to ELEM"))
        };
    }
    let mut words = param.split_whitespace();
    match (words.next(), words.next()) {
        (Some("int"), Some(_)) | (Some("const"), Some("int")) => Ok(Param::Int),
        _ => Err(format!("unsupported parameter '{param}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offload::program::{self, ENTRY_POINT};

    fn context(rt: &HostRuntime) -> ContextId {
        let device = rt.devices(rt.platforms().unwrap()[0]).unwrap()[0];
        rt.create_context(device).unwrap()
    }

    #[test]
    fn test_topology() {
        let rt = HostRuntime::with_topology(2, 3);
        let platforms = rt.platforms().unwrap();
        assert_eq!(platforms.len(), 2);
        let devices = rt.devices(platforms[1]).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(rt.device_info(devices[2]).unwrap().name, "host device 1.2");
        assert_eq!(rt.devices(PlatformId(5)), Err(status::INVALID_PLATFORM));
    }

    #[test]
    fn test_compile_embedded_program() {
        let (dtype, entries) = compile(OPENCL_SOURCE, &program::build_options::<f64>()).unwrap();
        assert_eq!(dtype, DType::F64);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, ENTRY_POINT);
        assert_eq!(entries[0].params, MATMUL_SIGNATURE);
    }

    #[test]
    fn test_compile_requires_element_type() {
        assert!(compile(OPENCL_SOURCE, "").is_err());
        assert!(compile(OPENCL_SOURCE, "-D ELEM=half").is_err());
        assert_eq!(compile(OPENCL_SOURCE, "-DELEM=float").unwrap().0, DType::F32);
    }

    #[test]
    fn test_compile_rejects_programs_without_kernels() {
        assert!(compile("int helper(int x) { return x; }", "-D ELEM=float").is_err());
        assert!(compile("__kernel void k(__global float *x) {}", "-D ELEM=float").is_err());
    }

    #[test]
    fn test_build_failure_status() {
        let rt = HostRuntime::new();
        let ctx = context(&rt);
        assert_eq!(
            rt.build_program(ctx, "garbage", "-D ELEM=float"),
            Err(status::BUILD_PROGRAM_FAILURE)
        );
    }

    #[test]
    fn test_platform_info() {
        let rt = HostRuntime::with_topology(2, 1);
        let info = rt.platform_info(PlatformId(1)).unwrap();
        assert_eq!(info.name, "host platform 1");
        assert_eq!(
            rt.platform_info(PlatformId(2)),
            Err(status::INVALID_PLATFORM)
        );
    }

    #[test]
    fn test_only_the_embedded_program_builds() {
        let rt = HostRuntime::new();
        let ctx = context(&rt);
        // Same entry point and parameters as the embedded program, no body.
        let hollow = "__kernel void matmul(__global const ELEM *A, __global const ELEM *B, \
                      __global ELEM *C, int HeightA, int WidthA, int HeightB, int WidthB) { }";
        assert_eq!(
            rt.build_program(ctx, hollow, "-D ELEM=float"),
            Err(status::BUILD_PROGRAM_FAILURE)
        );
        assert!(rt.build_program(ctx, OPENCL_SOURCE, "-D ELEM=float").is_ok());
    }

    #[test]
    fn test_unknown_entry_point() {
        let rt = HostRuntime::new();
        let ctx = context(&rt);
        let prog = rt
            .build_program(ctx, OPENCL_SOURCE, "-D ELEM=float")
            .unwrap();
        assert_eq!(rt.create_kernel(prog, "gemm"), Err(status::INVALID_KERNEL_NAME));
    }

    #[test]
    fn test_launch_requires_all_args() {
        let rt = HostRuntime::new();
        let device = rt.devices(PlatformId(0)).unwrap()[0];
        let ctx = rt.create_context(device).unwrap();
        let queue = rt.create_queue(ctx, device).unwrap();
        let prog = rt
            .build_program(ctx, OPENCL_SOURCE, "-D ELEM=float")
            .unwrap();
        let kernel = rt.create_kernel(prog, ENTRY_POINT).unwrap();
        rt.set_arg(kernel, 3, KernelArg::Int(1)).unwrap();
        assert_eq!(
            rt.enqueue_nd_range(queue, kernel, [1, 1], [1, 1]),
            Err(status::INVALID_KERNEL_ARGS)
        );
        assert_eq!(
            rt.set_arg(kernel, 7, KernelArg::Int(1)),
            Err(status::INVALID_ARG_INDEX)
        );
        assert_eq!(
            rt.set_arg(kernel, 0, KernelArg::Int(1)),
            Err(status::INVALID_ARG_VALUE)
        );
    }

    #[test]
    fn test_out_of_bounds_launch_is_refused() {
        let rt = HostRuntime::new();
        let device = rt.devices(PlatformId(0)).unwrap()[0];
        let ctx = rt.create_context(device).unwrap();
        let queue = rt.create_queue(ctx, device).unwrap();
        let prog = rt
            .build_program(ctx, OPENCL_SOURCE, "-D ELEM=float")
            .unwrap();
        let kernel = rt.create_kernel(prog, ENTRY_POINT).unwrap();
        // 2x2 @ 2x2 worth of dimensions, but every buffer holds one float.
        let bufs: Vec<BufferId> = (0..3)
            .map(|_| rt.create_buffer(ctx, BufferAccess::ReadWrite, 4).unwrap())
            .collect();
        for (i, buf) in bufs.iter().enumerate() {
            rt.set_arg(kernel, i as u32, KernelArg::Buffer(*buf)).unwrap();
        }
        for i in 3..7 {
            rt.set_arg(kernel, i, KernelArg::Int(2)).unwrap();
        }
        assert_eq!(
            rt.enqueue_nd_range(queue, kernel, [2, 2], [1, 1]),
            Err(status::OUT_OF_RESOURCES)
        );
        assert_eq!(
            rt.enqueue_nd_range(queue, kernel, [2, 2], [3, 1]),
            Err(status::INVALID_WORK_GROUP_SIZE)
        );
        assert_eq!(
            rt.enqueue_nd_range(queue, kernel, [0, 2], [1, 1]),
            Err(status::INVALID_GLOBAL_WORK_SIZE)
        );
    }

    #[test]
    fn test_buffer_transfers() {
        let rt = HostRuntime::new();
        let device = rt.devices(PlatformId(0)).unwrap()[0];
        let ctx = rt.create_context(device).unwrap();
        let queue = rt.create_queue(ctx, device).unwrap();
        assert_eq!(
            rt.create_buffer(ctx, BufferAccess::ReadOnly, 0),
            Err(status::INVALID_BUFFER_SIZE)
        );
        let buf = rt.create_buffer(ctx, BufferAccess::ReadWrite, 4).unwrap();
        rt.write_buffer(queue, buf, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        rt.read_buffer(queue, buf, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(
            rt.write_buffer(queue, buf, &[0; 5]),
            Err(status::INVALID_VALUE)
        );
    }

    #[test]
    fn test_release_accounting() {
        let rt = HostRuntime::new();
        let ctx = context(&rt);
        let buf = rt.create_buffer(ctx, BufferAccess::ReadOnly, 8).unwrap();
        assert_eq!(rt.live_resources(), 2);
        assert_eq!(
            rt.release(Resource::Kernel(KernelId(buf.0))),
            Err(status::INVALID_KERNEL)
        );
        rt.release(Resource::Buffer(buf)).unwrap();
        assert_eq!(
            rt.release(Resource::Buffer(buf)),
            Err(status::INVALID_MEM_OBJECT)
        );
        rt.release(Resource::Context(ctx)).unwrap();
        assert_eq!(rt.live_resources(), 0);
        assert_eq!(rt.total_acquired(), 2);
    }

    #[test]
    fn test_fail_nth_fires_once() {
        let rt = HostRuntime::new();
        rt.fail_nth(Call::Platforms, 1, status::OUT_OF_RESOURCES);
        assert!(rt.platforms().is_ok());
        assert_eq!(rt.platforms(), Err(status::OUT_OF_RESOURCES));
        assert!(rt.platforms().is_ok());
    }
}
