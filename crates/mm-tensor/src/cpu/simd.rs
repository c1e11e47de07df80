//! Vector-lane matrix multiplication.
//!
//! B is transposed once per call so that every output cell is a dot product
//! of two contiguous rows. The contraction dimension is consumed in lane
//! groups of `T::LANES` elements (8 x f32 or 4 x f64, one 256-bit register):
//!
//! ```text
//! for each cell (r, c):
//!     acc = 0
//!     for each full group g:   acc += hsum(A[r, g] * Bt[c, g])
//!     if k % LANES != 0:       acc += hsum(maskload(A[r, tail]) * maskload(Bt[c, tail]))
//! ```
//!
//! On x86-64 with AVX the groups use `_mm256_*` intrinsics and the tail uses
//! `_mm256_maskload_*`. Other targets use a portable emulation with the same
//! lane width, the same zero-filled tail and the same summation order, so
//! both paths produce bit-identical results.

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;
use std::fmt;
use std::sync::OnceLock;

use crate::backend::MatmulBackend;
use crate::dtype::Element;
use crate::error::Result;
use crate::matrix::{check_dims, Matrix};

/// Lane implementation selected at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimdLevel {
    /// 256-bit AVX loads, multiplies and masked loads.
    Avx,
    /// Lane emulation on plain scalars.
    Portable,
}

impl SimdLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            SimdLevel::Avx => "AVX",
            SimdLevel::Portable => "portable",
        }
    }
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Best lane implementation for the current CPU, detected once.
#[inline]
pub fn simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(detect_simd_uncached)
}

#[cold]
fn detect_simd_uncached() -> SimdLevel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx") {
            return SimdLevel::Avx;
        }
    }
    SimdLevel::Portable
}

/// Element types with lane-group dot products.
pub trait LaneElement: Element {
    /// Multiplies one full lane group element-wise and reduces it to a scalar.
    ///
    /// # Panics
    /// Panics unless both slices hold exactly `LANES` elements.
    fn dot_lanes(level: SimdLevel, a: &[Self], b: &[Self]) -> Self;

    /// Same as [`LaneElement::dot_lanes`] for a tail shorter than a lane
    /// group. Only `a.len()` lanes are loaded; the rest contribute zero.
    ///
    /// # Panics
    /// Panics unless both slices have the same length below `LANES`.
    fn dot_masked(level: SimdLevel, a: &[Self], b: &[Self]) -> Self;
}

/// Horizontal sum, lane 0 first.
#[inline(always)]
fn hsum<T: Element>(lanes: &[T]) -> T {
    lanes[1..].iter().fold(lanes[0], |acc, &x| acc + x)
}

macro_rules! impl_lane_element {
    ($t:ty, $mask:ty, $loadu:ident, $maskload:ident, $mul:ident, $storeu:ident,
     $avx_dot:ident, $avx_masked:ident, $portable:ident) => {
        #[cfg(target_arch = "x86_64")]
        #[target_feature(enable = "avx")]
        unsafe fn $avx_dot(a: *const $t, b: *const $t) -> $t {
            let prod = $mul($loadu(a), $loadu(b));
            let mut lanes = [0.0 as $t; <$t as Element>::LANES];
            $storeu(lanes.as_mut_ptr(), prod);
            hsum(&lanes)
        }

        #[cfg(target_arch = "x86_64")]
        #[target_feature(enable = "avx")]
        unsafe fn $avx_masked(a: *const $t, b: *const $t, rem: usize) -> $t {
            // A lane is loaded iff the sign bit of its mask element is set.
            let mut bits = [0 as $mask; <$t as Element>::LANES];
            for bit in bits.iter_mut().take(rem) {
                *bit = -1;
            }
            let mask = _mm256_loadu_si256(bits.as_ptr() as *const __m256i);
            let prod = $mul($maskload(a, mask), $maskload(b, mask));
            let mut lanes = [0.0 as $t; <$t as Element>::LANES];
            $storeu(lanes.as_mut_ptr(), prod);
            hsum(&lanes)
        }

        fn $portable(a: &[$t], b: &[$t]) -> $t {
            let mut lanes = [0.0 as $t; <$t as Element>::LANES];
            for (lane, (x, y)) in lanes.iter_mut().zip(a.iter().zip(b)) {
                *lane = *x * *y;
            }
            hsum(&lanes)
        }

        impl LaneElement for $t {
            #[inline]
            fn dot_lanes(level: SimdLevel, a: &[$t], b: &[$t]) -> $t {
                assert!(a.len() == Self::LANES && b.len() == Self::LANES);
                match level {
                    #[cfg(target_arch = "x86_64")]
                    SimdLevel::Avx => unsafe { $avx_dot(a.as_ptr(), b.as_ptr()) },
                    _ => $portable(a, b),
                }
            }

            #[inline]
            fn dot_masked(level: SimdLevel, a: &[$t], b: &[$t]) -> $t {
                assert!(a.len() == b.len() && a.len() < Self::LANES);
                match level {
                    #[cfg(target_arch = "x86_64")]
                    SimdLevel::Avx => unsafe { $avx_masked(a.as_ptr(), b.as_ptr(), a.len()) },
                    _ => $portable(a, b),
                }
            }
        }
    };
}

impl_lane_element!(
    f32,
    i32,
    _mm256_loadu_ps,
    _mm256_maskload_ps,
    _mm256_mul_ps,
    _mm256_storeu_ps,
    dot_lanes_avx_f32,
    dot_masked_avx_f32,
    dot_portable_f32
);

impl_lane_element!(
    f64,
    i64,
    _mm256_loadu_pd,
    _mm256_maskload_pd,
    _mm256_mul_pd,
    _mm256_storeu_pd,
    dot_lanes_avx_f64,
    dot_masked_avx_f64,
    dot_portable_f64
);

/// Vector-lane kernel running on the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct VectorizedKernel {
    level: SimdLevel,
}

impl VectorizedKernel {
    /// Kernel using the best lane implementation of this CPU.
    pub fn new() -> Self {
        VectorizedKernel {
            level: simd_level(),
        }
    }

    /// Kernel pinned to the portable lane emulation.
    pub fn portable() -> Self {
        VectorizedKernel {
            level: SimdLevel::Portable,
        }
    }

    pub fn level(&self) -> SimdLevel {
        self.level
    }
}

impl Default for VectorizedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LaneElement> MatmulBackend<T> for VectorizedKernel {
    fn name(&self) -> &str {
        "vectorized"
    }

    fn matmul(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
        multiply_with_level(a, b, self.level)
    }
}

/// Computes `a x b` with lane-parallel arithmetic.
pub fn multiply_vectorized<T: LaneElement>(a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
    multiply_with_level(a, b, simd_level())
}

fn multiply_with_level<T: LaneElement>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    level: SimdLevel,
) -> Result<Matrix<T>> {
    let (m, k, n) = check_dims(a, b)?;
    log::debug!(
        "vectorized matmul [{m}x{k}] @ [{k}x{n}] ({level}, {} x {})",
        T::LANES,
        T::DTYPE
    );

    let bt = b.try_transpose()?;
    let mut c = Matrix::try_zeros(m, n)?;
    let split = k - k % T::LANES;

    for r in 0..m {
        let (a_body, a_tail) = a.row(r).split_at(split);
        for col in 0..n {
            let (b_body, b_tail) = bt.row(col).split_at(split);
            let mut acc = T::ZERO;
            for (x, y) in a_body
                .chunks_exact(T::LANES)
                .zip(b_body.chunks_exact(T::LANES))
            {
                acc += T::dot_lanes(level, x, y);
            }
            if !a_tail.is_empty() {
                acc += T::dot_masked(level, a_tail, b_tail);
            }
            c[(r, col)] = acc;
        }
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ReferenceKernel;
    use approx::assert_relative_eq;

    fn ramp<T: Element>(rows: usize, columns: usize, scale: f64) -> Matrix<T> {
        Matrix::from_fn(rows, columns, |r, c| {
            T::from_f64(((r * 7 + c * 3) % 11) as f64 * scale - 2.5)
        })
    }

    fn check_against_reference_f32(m: usize, k: usize, n: usize) {
        let a = ramp::<f32>(m, k, 0.25);
        let b = ramp::<f32>(k, n, 0.5);
        let want = ReferenceKernel.matmul(&a, &b).unwrap();
        let got = multiply_vectorized(&a, &b).unwrap();
        assert_eq!((got.rows(), got.columns()), (m, n));
        for (g, w) in got.as_slice().iter().zip(want.as_slice()) {
            assert_relative_eq!(*g, *w, max_relative = 1e-5, epsilon = 1e-5);
        }
    }

    fn check_against_reference_f64(m: usize, k: usize, n: usize) {
        let a = ramp::<f64>(m, k, 0.25);
        let b = ramp::<f64>(k, n, 0.5);
        let want = ReferenceKernel.matmul(&a, &b).unwrap();
        let got = multiply_vectorized(&a, &b).unwrap();
        for (g, w) in got.as_slice().iter().zip(want.as_slice()) {
            assert_relative_eq!(*g, *w, max_relative = 1e-9, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_contraction_multiple_of_lanes() {
        check_against_reference_f32(3, 8, 5);
        check_against_reference_f32(2, 16, 2);
        check_against_reference_f64(3, 4, 5);
        check_against_reference_f64(4, 12, 3);
    }

    #[test]
    fn test_contraction_with_tail() {
        check_against_reference_f32(3, 10, 4);
        check_against_reference_f32(5, 15, 2);
        check_against_reference_f64(3, 10, 4);
        check_against_reference_f64(2, 7, 6);
    }

    #[test]
    fn test_contraction_shorter_than_lanes() {
        check_against_reference_f32(2, 3, 2);
        check_against_reference_f32(1, 1, 1);
        check_against_reference_f64(2, 3, 2);
    }

    #[test]
    fn test_small_exact_values() {
        let a = Matrix::new(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::new(3, 2, vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = VectorizedKernel::new().matmul(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_empty_contraction_is_zero() {
        let a = Matrix::<f64>::zeros(3, 0);
        let b = Matrix::<f64>::zeros(0, 2);
        let c = multiply_vectorized(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[0.0; 6]);
    }

    #[test]
    fn test_portable_matches_detected_bitwise() {
        let a = ramp::<f32>(4, 13, 0.137);
        let b = ramp::<f32>(13, 3, 0.291);
        let native = VectorizedKernel::new().matmul(&a, &b).unwrap();
        let portable = VectorizedKernel::portable().matmul(&a, &b).unwrap();
        assert_eq!(native, portable);

        let a = ramp::<f64>(3, 9, 0.137);
        let b = ramp::<f64>(9, 4, 0.291);
        let native = VectorizedKernel::new().matmul(&a, &b).unwrap();
        let portable = VectorizedKernel::portable().matmul(&a, &b).unwrap();
        assert_eq!(native, portable);
    }

    #[test]
    fn test_masked_tail_ignores_lanes_past_remainder() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        assert_eq!(f32::dot_masked(simd_level(), &a, &b), 11.0);
        assert_eq!(f64::dot_masked(simd_level(), &[2.0, 2.0, 2.0], &[0.5, 0.5, 0.5]), 3.0);
    }

    #[test]
    #[should_panic]
    fn test_dot_lanes_rejects_short_group() {
        f32::dot_lanes(SimdLevel::Portable, &[1.0; 4], &[1.0; 4]);
    }

    #[test]
    fn test_inputs_untouched() {
        let a = ramp::<f32>(3, 9, 0.5);
        let b = ramp::<f32>(9, 2, 0.5);
        let (a0, b0) = (a.clone(), b.clone());
        let _ = multiply_vectorized(&a, &b).unwrap();
        assert_eq!(a, a0);
        assert_eq!(b, b0);
    }
}
