use std::fmt::Debug;

use crate::dtype::DType;

use super::status::Status;

/// Result of a single device-runtime call: the value, or the native status.
pub type DeviceResult<T> = std::result::Result<T, Status>;

macro_rules! define_handles {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

define_handles!(
    /// An accelerator platform (driver / vendor runtime).
    PlatformId,
    /// A device exposed by a platform.
    DeviceId,
    ContextId,
    QueueId,
    ProgramId,
    KernelId,
    /// Device-resident memory.
    BufferId,
);

const DEVICE_INDEX_BITS: u32 = 16;

impl DeviceId {
    /// Packs a platform index and a device index within that platform.
    pub fn new(platform: usize, index: usize) -> Self {
        DeviceId(((platform as u64) << DEVICE_INDEX_BITS) | index as u64)
    }

    pub fn platform(self) -> usize {
        (self.0 >> DEVICE_INDEX_BITS) as usize
    }

    pub fn index(self) -> usize {
        (self.0 & ((1 << DEVICE_INDEX_BITS) - 1)) as usize
    }
}

/// A releasable device-side resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Context(ContextId),
    Queue(QueueId),
    Program(ProgramId),
    Kernel(KernelId),
    Buffer(BufferId),
}

/// Source language a runtime compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenCl,
    Metal,
}

/// Host access pattern of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    ReadWrite,
}

/// A value bound to a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(BufferId),
    Int(i32),
}

/// Descriptive platform properties, used for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Descriptive device properties, used for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub max_work_group_size: usize,
}

/// Enumeration of accelerator platforms and devices.
pub trait Discovery {
    /// Lists the available platforms, possibly none.
    fn platforms(&self) -> DeviceResult<Vec<PlatformId>>;

    fn platform_info(&self, platform: PlatformId) -> DeviceResult<PlatformInfo>;

    /// Lists the devices of `platform`, possibly none.
    fn devices(&self, platform: PlatformId) -> DeviceResult<Vec<DeviceId>>;

    fn device_info(&self, device: DeviceId) -> DeviceResult<DeviceInfo>;
}

/// An accelerator runtime driven through an explicit
/// compile / transfer / dispatch / retrieve protocol.
///
/// Every call reports failure through its native status code. Resources
/// returned by the `create_*` and `build_program` calls stay alive until
/// passed to [`DeviceRuntime::release`].
pub trait DeviceRuntime: Discovery + Send + Sync + Debug {
    /// Returns the name of this runtime (e.g., "host", "opencl", "metal").
    fn name(&self) -> &str;

    /// Language of the program text this runtime compiles.
    fn dialect(&self) -> Dialect;

    /// Whether `device` can run kernels over `dtype`.
    fn supports(&self, _device: DeviceId, _dtype: DType) -> bool {
        true
    }

    fn create_context(&self, device: DeviceId) -> DeviceResult<ContextId>;

    fn create_queue(&self, context: ContextId, device: DeviceId) -> DeviceResult<QueueId>;

    /// Compiles program text with the device's runtime compiler.
    fn build_program(
        &self,
        context: ContextId,
        source: &str,
        options: &str,
    ) -> DeviceResult<ProgramId>;

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> DeviceResult<KernelId>;

    fn create_buffer(
        &self,
        context: ContextId,
        access: BufferAccess,
        bytes: usize,
    ) -> DeviceResult<BufferId>;

    /// Blocking host-to-device copy into the start of `buffer`.
    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DeviceResult<()>;

    fn set_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> DeviceResult<()>;

    /// Launches `kernel` over a 2D grid of `global` work items in groups of
    /// `local`.
    fn enqueue_nd_range(
        &self,
        queue: QueueId,
        kernel: KernelId,
        global: [usize; 2],
        local: [usize; 2],
    ) -> DeviceResult<()>;

    /// Blocks until every command on `queue` has completed.
    fn finish(&self, queue: QueueId) -> DeviceResult<()>;

    /// Blocking device-to-host copy from the start of `buffer`.
    fn read_buffer(&self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DeviceResult<()>;

    fn release(&self, resource: Resource) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_packing() {
        let id = DeviceId::new(3, 7);
        assert_eq!((id.platform(), id.index()), (3, 7));
        assert_ne!(DeviceId::new(0, 1), DeviceId::new(1, 0));
    }
}
