use std::fmt::Debug;

use crate::dtype::Element;
use crate::error::Result;
use crate::matrix::Matrix;

/// Trait for interchangeable matrix-multiplication kernels.
///
/// Every implementation computes `C = A x B` into a freshly allocated matrix
/// and leaves both operands untouched. Results agree across implementations
/// within floating-point tolerance.
pub trait MatmulBackend<T: Element>: Send + Sync + Debug {
    /// Returns the name of this kernel (e.g., "vectorized", "offload").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: shape [m, k]
    /// - `b`: shape [k, n]
    /// - Returns: shape [m, n]
    ///
    /// # Errors
    /// Returns `DimensionMismatch` when `a.columns() != b.rows()`, plus any
    /// kernel-specific failure.
    fn matmul(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>>;
}
