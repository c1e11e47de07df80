pub mod parallel;
pub mod simd;

use crate::backend::MatmulBackend;
use crate::dtype::Element;
use crate::error::Result;
use crate::matrix::{check_dims, Matrix};

pub use parallel::{multiply_parallel, ParallelKernel};
pub use simd::{multiply_vectorized, simd_level, SimdLevel, VectorizedKernel};

/// Scalar reference kernel.
///
/// Straightforward row, column, contraction loops optimized for correctness
/// rather than speed. Serves as the oracle the other kernels are checked
/// against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceKernel;

impl ReferenceKernel {
    pub fn new() -> Self {
        ReferenceKernel
    }
}

impl<T: Element> MatmulBackend<T> for ReferenceKernel {
    fn name(&self) -> &str {
        "reference"
    }

    fn matmul(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
        let (m, k, n) = check_dims(a, b)?;
        log::debug!("reference matmul [{m}x{k}] @ [{k}x{n}]");

        let mut c = Matrix::try_zeros(m, n)?;
        let (a, b) = (a.as_slice(), b.as_slice());
        for i in 0..m {
            for j in 0..n {
                let mut sum = T::ZERO;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                c[(i, j)] = sum;
            }
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatmulError;

    #[test]
    fn test_matmul_identity() {
        let a = Matrix::new(2, 2, vec![1.0f32, 0.0, 0.0, 1.0]);
        let x = Matrix::new(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]);
        let c = ReferenceKernel.matmul(&a, &x).unwrap();
        assert_eq!(c.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = Matrix::new(2, 2, vec![1.0f64, 2.0, 3.0, 4.0]);
        let x = Matrix::new(2, 2, vec![5.0f64, 6.0, 7.0, 8.0]);
        let c = ReferenceKernel.matmul(&a, &x).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        let a = Matrix::new(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::new(3, 2, vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = ReferenceKernel.matmul(&a, &b).unwrap();
        assert_eq!((c.rows(), c.columns()), (2, 2));
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let a = Matrix::<f32>::zeros(1, 3);
        let b = Matrix::<f32>::zeros(2, 2);
        let err = ReferenceKernel.matmul(&a, &b).unwrap_err();
        assert!(matches!(err, MatmulError::DimensionMismatch { .. }));
    }
}
