//! Native status codes reported by device runtimes.
//!
//! Values follow the OpenCL numbering so that any OpenCL-style backend can
//! pass its codes through unchanged.

/// Native status code. Zero is success, negative values are failures.
pub type Status = i32;

pub const SUCCESS: Status = 0;
pub const DEVICE_NOT_FOUND: Status = -1;
pub const MEM_OBJECT_ALLOCATION_FAILURE: Status = -4;
pub const OUT_OF_RESOURCES: Status = -5;
pub const BUILD_PROGRAM_FAILURE: Status = -11;
pub const INVALID_VALUE: Status = -30;
pub const INVALID_PLATFORM: Status = -32;
pub const INVALID_DEVICE: Status = -33;
pub const INVALID_CONTEXT: Status = -34;
pub const INVALID_COMMAND_QUEUE: Status = -36;
pub const INVALID_MEM_OBJECT: Status = -38;
pub const INVALID_PROGRAM: Status = -44;
pub const INVALID_KERNEL_NAME: Status = -46;
pub const INVALID_KERNEL: Status = -48;
pub const INVALID_ARG_INDEX: Status = -49;
pub const INVALID_ARG_VALUE: Status = -50;
pub const INVALID_KERNEL_ARGS: Status = -52;
pub const INVALID_WORK_DIMENSION: Status = -53;
pub const INVALID_WORK_GROUP_SIZE: Status = -54;
pub const INVALID_BUFFER_SIZE: Status = -61;
pub const INVALID_GLOBAL_WORK_SIZE: Status = -63;

/// Symbolic name of a status code, for log messages.
pub fn name(status: Status) -> &'static str {
    match status {
        SUCCESS => "SUCCESS",
        DEVICE_NOT_FOUND => "DEVICE_NOT_FOUND",
        MEM_OBJECT_ALLOCATION_FAILURE => "MEM_OBJECT_ALLOCATION_FAILURE",
        OUT_OF_RESOURCES => "OUT_OF_RESOURCES",
        BUILD_PROGRAM_FAILURE => "BUILD_PROGRAM_FAILURE",
        INVALID_VALUE => "INVALID_VALUE",
        INVALID_PLATFORM => "INVALID_PLATFORM",
        INVALID_DEVICE => "INVALID_DEVICE",
        INVALID_CONTEXT => "INVALID_CONTEXT",
        INVALID_COMMAND_QUEUE => "INVALID_COMMAND_QUEUE",
        INVALID_MEM_OBJECT => "INVALID_MEM_OBJECT",
        INVALID_PROGRAM => "INVALID_PROGRAM",
        INVALID_KERNEL_NAME => "INVALID_KERNEL_NAME",
        INVALID_KERNEL => "INVALID_KERNEL",
        INVALID_ARG_INDEX => "INVALID_ARG_INDEX",
        INVALID_ARG_VALUE => "INVALID_ARG_VALUE",
        INVALID_KERNEL_ARGS => "INVALID_KERNEL_ARGS",
        INVALID_WORK_DIMENSION => "INVALID_WORK_DIMENSION",
        INVALID_WORK_GROUP_SIZE => "INVALID_WORK_GROUP_SIZE",
        INVALID_BUFFER_SIZE => "INVALID_BUFFER_SIZE",
        INVALID_GLOBAL_WORK_SIZE => "INVALID_GLOBAL_WORK_SIZE",
        _ => "UNKNOWN",
    }
}
