use std::ops::{Index, IndexMut};

use crate::dtype::Element;
use crate::error::{MatmulError, Result};

/// A dense, row-major matrix that exclusively owns its buffer.
///
/// The element at `(r, c)` lives at offset `r * columns + c`, and the buffer
/// always holds exactly `rows * columns` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T: Element> {
    rows: usize,
    columns: usize,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    /// Create a matrix from row-major data.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * columns`.
    pub fn new(rows: usize, columns: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            rows * columns,
            "data length {} does not match a {}x{} matrix",
            data.len(),
            rows,
            columns
        );
        Matrix {
            rows,
            columns,
            data,
        }
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Matrix {
            rows,
            columns,
            data: vec![T::ZERO; rows * columns],
        }
    }

    /// Create a zero-filled matrix, reporting allocation failure instead of
    /// aborting.
    pub fn try_zeros(rows: usize, columns: usize) -> Result<Self> {
        let elements = rows
            .checked_mul(columns)
            .ok_or(MatmulError::AllocationFailure {
                elements: usize::MAX,
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|_| MatmulError::AllocationFailure { elements })?;
        data.resize(elements, T::ZERO);
        Ok(Matrix {
            rows,
            columns,
            data,
        })
    }

    /// Create a matrix whose element at `(r, c)` is `f(r, c)`.
    pub fn from_fn(rows: usize, columns: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * columns);
        for r in 0..rows {
            for c in 0..columns {
                data.push(f(r, c));
            }
        }
        Matrix {
            rows,
            columns,
            data,
        }
    }

    /// The `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, n, |r, c| if r == c { T::ONE } else { T::ZERO })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Returns row `r` as a contiguous slice.
    ///
    /// # Panics
    /// Panics if `r >= rows()`.
    pub fn row(&self, r: usize) -> &[T] {
        let start = r * self.columns;
        &self.data[start..start + self.columns]
    }

    /// Bounds-checked element lookup.
    pub fn get(&self, r: usize, c: usize) -> Option<&T> {
        if r < self.rows && c < self.columns {
            self.data.get(r * self.columns + c)
        } else {
            None
        }
    }

    /// Mutable access to the slot for `(r, c)` without any bounds check.
    ///
    /// # Safety
    /// `r * columns + c` must be less than `len()`.
    pub unsafe fn get_unchecked_mut(&mut self, r: usize, c: usize) -> &mut T {
        self.data.get_unchecked_mut(r * self.columns + c)
    }

    /// Returns a freshly allocated transpose.
    pub fn try_transpose(&self) -> Result<Matrix<T>> {
        let mut t = Matrix::try_zeros(self.columns, self.rows)?;
        for r in 0..self.rows {
            for c in 0..self.columns {
                t.data[c * self.rows + r] = self.data[r * self.columns + c];
            }
        }
        Ok(t)
    }

    /// Infallible form of [`Matrix::try_transpose`].
    pub fn transpose(&self) -> Matrix<T> {
        Self::from_fn(self.columns, self.rows, |r, c| self.data[c * self.columns + r])
    }
}

/// Element access by `(row, column)`.
///
/// Only the flat offset is checked against the buffer; a column index past
/// the row end silently addresses the next row, so callers must keep indices
/// in range.
impl<T: Element> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    #[inline]
    fn index(&self, (r, c): (usize, usize)) -> &T {
        &self.data[r * self.columns + c]
    }
}

impl<T: Element> IndexMut<(usize, usize)> for Matrix<T> {
    #[inline]
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut T {
        &mut self.data[r * self.columns + c]
    }
}

/// Validates `a.columns == b.rows` and returns `(m, k, n)`.
pub(crate) fn check_dims<T: Element>(a: &Matrix<T>, b: &Matrix<T>) -> Result<(usize, usize, usize)> {
    if a.columns != b.rows {
        return Err(MatmulError::DimensionMismatch {
            m: a.rows,
            k: a.columns,
            k2: b.rows,
            n: b.columns,
        });
    }
    Ok((a.rows, a.columns, b.columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matrix() {
        let m = Matrix::new(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.rows(), 2);
        assert_eq!(m.columns(), 3);
        assert_eq!(m.len(), 6);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic]
    fn test_new_length_mismatch_panics() {
        let _m = Matrix::new(2, 2, vec![1.0f64, 2.0, 3.0]);
    }

    #[test]
    fn test_zeros() {
        let z = Matrix::<f64>::zeros(3, 2);
        assert_eq!(z.as_slice(), &[0.0; 6]);
        let t = Matrix::<f32>::try_zeros(2, 5).unwrap();
        assert_eq!(t.len(), 10);
        assert!(t.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_try_zeros_overflow() {
        let err = Matrix::<f32>::try_zeros(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, MatmulError::AllocationFailure { .. }));
    }

    #[test]
    fn test_index_mut_writes_backing_slot() {
        let mut m = Matrix::<f32>::zeros(2, 2);
        m[(1, 1)] = 7.0;
        unsafe {
            *m.get_unchecked_mut(0, 1) = 3.0;
        }
        assert_eq!(m.as_slice(), &[0.0, 3.0, 0.0, 7.0]);
    }

    #[test]
    fn test_get_is_bounds_checked() {
        let m = Matrix::new(1, 2, vec![1.0f32, 2.0]);
        assert_eq!(m.get(0, 1), Some(&2.0));
        assert_eq!(m.get(0, 2), None);
        assert_eq!(m.get(1, 0), None);
    }

    #[test]
    fn test_transpose() {
        let m = Matrix::new(2, 3, vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = m.try_transpose().unwrap();
        assert_eq!(t.rows(), 3);
        assert_eq!(t.columns(), 2);
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t, m.transpose());
    }

    #[test]
    fn test_identity() {
        let i = Matrix::<f32>::identity(3);
        assert_eq!(i[(0, 0)], 1.0);
        assert_eq!(i[(0, 1)], 0.0);
        assert_eq!(i[(2, 2)], 1.0);
    }

    #[test]
    fn test_check_dims() {
        let a = Matrix::<f32>::zeros(2, 3);
        let b = Matrix::<f32>::zeros(3, 4);
        assert_eq!(check_dims(&a, &b).unwrap(), (2, 3, 4));
        let err = check_dims(&b, &a).unwrap_err();
        assert_eq!(
            err,
            MatmulError::DimensionMismatch {
                m: 3,
                k: 4,
                k2: 2,
                n: 3
            }
        );
    }
}
