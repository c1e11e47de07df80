use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::backend::MatmulBackend;
use crate::dtype::Element;
use crate::error::{MatmulError, Result};
use crate::matrix::{check_dims, Matrix};

/// Row-blocked multi-worker kernel.
///
/// Each call starts a scoped pool of exactly `workers` threads and hands
/// worker `i` the `i`-th contiguous block of `ceil(rows / workers)` output
/// rows. Every pool thread is joined before the call returns. Per-cell
/// accumulation order matches [`ReferenceKernel`](super::ReferenceKernel), so
/// results are bit-identical for any worker count.
#[derive(Debug, Clone, Copy)]
pub struct ParallelKernel {
    workers: usize,
}

impl ParallelKernel {
    /// # Errors
    /// Returns `InvalidWorkerCount` when `workers` is zero.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(MatmulError::InvalidWorkerCount(workers));
        }
        Ok(ParallelKernel { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl<T: Element> MatmulBackend<T> for ParallelKernel {
    fn name(&self) -> &str {
        "parallel"
    }

    fn matmul(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
        multiply_parallel(a, b, self.workers)
    }
}

/// Computes `a x b` on `workers` threads.
pub fn multiply_parallel<T: Element>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    workers: usize,
) -> Result<Matrix<T>> {
    multiply_scheduled(a, b, workers).map(|(c, _)| c)
}

/// How a call spread its work.
#[derive(Debug, Default)]
struct Schedule {
    /// Thread that computed each row block, in block order.
    owners: Vec<ThreadId>,
    /// Pool threads that had exited when the call returned.
    exited: usize,
}

fn multiply_scheduled<T: Element>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    workers: usize,
) -> Result<(Matrix<T>, Schedule)> {
    if workers == 0 {
        return Err(MatmulError::InvalidWorkerCount(workers));
    }
    let (m, k, n) = check_dims(a, b)?;
    log::debug!("parallel matmul [{m}x{k}] @ [{k}x{n}] on {workers} workers");

    let mut c = Matrix::try_zeros(m, n)?;
    if c.is_empty() {
        return Ok((c, Schedule::default()));
    }

    let rows_per_block = m.div_ceil(workers);
    let (a, b) = (a.as_slice(), b.as_slice());
    // Block i belongs to pool thread i; the lock only moves the `&mut` into
    // its worker and is never contended.
    let blocks: Vec<Mutex<&mut [T]>> = c
        .as_mut_slice()
        .chunks_mut(rows_per_block * n)
        .map(Mutex::new)
        .collect();
    let exited = AtomicUsize::new(0);

    let owners = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("mm-worker-{i}"))
        .build_scoped(
            |thread| {
                thread.run();
                exited.fetch_add(1, Ordering::Relaxed);
            },
            |pool| {
                pool.broadcast(|ctx| {
                    let block = ctx.index();
                    let mut out = blocks.get(block)?.lock();
                    let first_row = block * rows_per_block;
                    log::trace!(
                        "worker {block}: rows {first_row}..{}",
                        first_row + out.len() / n
                    );
                    for (local, out_row) in out.chunks_exact_mut(n).enumerate() {
                        let i = first_row + local;
                        for (j, cell) in out_row.iter_mut().enumerate() {
                            for p in 0..k {
                                *cell += a[i * k + p] * b[p * n + j];
                            }
                        }
                    }
                    Some(std::thread::current().id())
                })
            },
        )
        .map_err(|e| MatmulError::ThreadPool(e.to_string()))?;
    drop(blocks);

    let schedule = Schedule {
        owners: owners.into_iter().flatten().collect(),
        exited: exited.into_inner(),
    };
    Ok((c, schedule))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cpu::ReferenceKernel;

    fn ramp(rows: usize, columns: usize, scale: f32) -> Matrix<f32> {
        Matrix::from_fn(rows, columns, |r, c| ((r * 5 + c * 9) % 13) as f32 * scale - 1.75)
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            ParallelKernel::new(0).unwrap_err(),
            MatmulError::InvalidWorkerCount(0)
        );
        let a = Matrix::<f32>::zeros(2, 2);
        assert!(multiply_parallel(&a, &a, 0).is_err());
    }

    #[test]
    fn test_matches_reference_bitwise() {
        let a = ramp(7, 11, 0.113);
        let b = ramp(11, 5, 0.371);
        let want = ReferenceKernel.matmul(&a, &b).unwrap();
        let got = ParallelKernel::new(3).unwrap().matmul(&a, &b).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let a = ramp(9, 17, 0.0731);
        let b = ramp(17, 6, 0.219);
        let one = multiply_parallel(&a, &b, 1).unwrap();
        let two = multiply_parallel(&a, &b, 2).unwrap();
        let eight = multiply_parallel(&a, &b, 8).unwrap();
        assert_eq!(one, two);
        assert_eq!(one, eight);
    }

    #[test]
    fn test_more_workers_than_rows() {
        let a = Matrix::new(2, 3, vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::new(3, 2, vec![7.0f64, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = multiply_parallel(&a, &b, 16).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_each_block_runs_on_its_own_worker() {
        let a = ramp(10, 6, 0.5);
        let b = ramp(6, 4, 0.25);
        // 10 rows on 4 workers: blocks of 3, 3, 3 and 1 rows.
        let (c, schedule) = multiply_scheduled(&a, &b, 4).unwrap();
        assert_eq!(schedule.owners.len(), 4);
        let distinct: HashSet<_> = schedule.owners.iter().collect();
        assert_eq!(distinct.len(), 4);
        assert!(!schedule.owners.contains(&std::thread::current().id()));
        assert_eq!(c, ReferenceKernel.matmul(&a, &b).unwrap());
    }

    #[test]
    fn test_all_workers_joined_before_return() {
        // 3 rows on 8 workers: three one-row blocks and five idle workers.
        let a = ramp(3, 5, 0.3);
        let b = ramp(5, 2, 0.7);
        let (_, schedule) = multiply_scheduled(&a, &b, 8).unwrap();
        assert_eq!(schedule.owners.len(), 3);
        assert_eq!(schedule.exited, 8);
    }

    #[test]
    fn test_empty_output() {
        let a = Matrix::<f32>::zeros(0, 4);
        let b = Matrix::<f32>::zeros(4, 3);
        let c = multiply_parallel(&a, &b, 4).unwrap();
        assert_eq!((c.rows(), c.columns()), (0, 3));
        assert!(c.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Matrix::<f32>::zeros(2, 3);
        assert!(matches!(
            multiply_parallel(&a, &a, 2).unwrap_err(),
            MatmulError::DimensionMismatch { .. }
        ));
    }
}
