//! The embedded device program and its argument contract.
//!
//! Any runtime that compiles one of these assets must honor the same binding:
//! three buffers followed by four 32-bit dimensions, one thread per output
//! cell, launched on a 2D grid indexed by (column, row).

use crate::dtype::{DType, Element};

use super::runtime::Dialect;

/// OpenCL C source; `ELEM` is defined through the build options.
pub const OPENCL_SOURCE: &str = include_str!("../../kernels/matmul.cl");

/// Metal Shading Language source (32-bit floats only).
pub const METAL_SOURCE: &str = include_str!("../../kernels/matmul.metal");

pub const ENTRY_POINT: &str = "matmul";

pub const ARG_A: u32 = 0;
pub const ARG_B: u32 = 1;
pub const ARG_C: u32 = 2;
pub const ARG_HEIGHT_A: u32 = 3;
pub const ARG_WIDTH_A: u32 = 4;
pub const ARG_HEIGHT_B: u32 = 5;
pub const ARG_WIDTH_B: u32 = 6;
pub const ARG_COUNT: usize = 7;

/// Work-group size of every launch: each device thread stands alone.
pub const LOCAL_SIZE: [usize; 2] = [1, 1];

pub fn source(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::OpenCl => OPENCL_SOURCE,
        Dialect::Metal => METAL_SOURCE,
    }
}

/// Compiler options selecting the element type of the program.
pub fn build_options<T: Element>() -> String {
    match T::DTYPE {
        DType::F32 => format!("-D ELEM={}", T::OPENCL_TYPE),
        DType::F64 => format!("-D ELEM={} -D USE_FP64", T::OPENCL_TYPE),
    }
}

/// Value of a `-D NAME=value` (or `-DNAME=value`) build option.
pub(crate) fn define<'a>(options: &'a str, name: &str) -> Option<&'a str> {
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let definition = if token == "-D" {
            tokens.next()?
        } else if let Some(definition) = token.strip_prefix("-D") {
            definition
        } else {
            continue;
        };
        if let Some((key, value)) = definition.split_once('=') {
            if key == name {
                return Some(value);
            }
        }
    }
    None
}
