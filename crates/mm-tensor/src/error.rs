use thiserror::Error;

use crate::dtype::DType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatmulError {
    #[error("no accelerator platform available")]
    NoPlatform,
    #[error("no accelerator device available on the selected platform")]
    NoDevice,
    #[error("device enumeration failed with status {status} in {call}")]
    Discovery { status: i32, call: &'static str },
    #[error("accelerator call {call} failed with status {status}")]
    Backend { status: i32, call: &'static str },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    DimensionMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("failed to allocate a buffer of {elements} elements")]
    AllocationFailure { elements: usize },
    #[error("{backend} cannot run {dtype} kernels")]
    UnsupportedDType { backend: String, dtype: DType },
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
}

impl MatmulError {
    /// Returns the native backend status code, if this error carries one.
    pub fn status(&self) -> Option<i32> {
        match self {
            MatmulError::Backend { status, .. } | MatmulError::Discovery { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MatmulError>;
