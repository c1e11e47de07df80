use std::sync::Arc;

use mm_tensor::offload::DeviceRuntime;
use mm_tensor::{
    HostRuntime, LaneElement, MatmulBackend, Matrix, OffloadKernel, ParallelKernel,
    ReferenceKernel, Result, VectorizedKernel,
};

use crate::config::{RuntimeConfig, Strategy};

/// Routes matrix products to the kernel selected by a [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct MatmulContext {
    config: RuntimeConfig,
    runtime: Arc<dyn DeviceRuntime>,
}

impl MatmulContext {
    /// Uses the platform's default accelerator runtime for offload.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_runtime(config, default_runtime())
    }

    pub fn with_runtime(config: RuntimeConfig, runtime: Arc<dyn DeviceRuntime>) -> Self {
        MatmulContext { config, runtime }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    /// Builds the kernel the configuration selects.
    pub fn kernel<T: LaneElement>(&self) -> Result<Box<dyn MatmulBackend<T>>> {
        Ok(match self.config.strategy {
            Strategy::Reference => Box::new(ReferenceKernel::new()),
            Strategy::Vectorized => Box::new(VectorizedKernel::new()),
            Strategy::Parallel => Box::new(ParallelKernel::new(self.config.workers)?),
            Strategy::Offload => Box::new(OffloadKernel::new(Arc::clone(&self.runtime))),
        })
    }

    /// Computes `a x b` with the configured kernel.
    pub fn multiply<T: LaneElement>(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>> {
        let kernel = self.kernel::<T>()?;
        log::debug!(
            "dispatch [{}x{}] @ [{}x{}] ({}) to {}",
            a.rows(),
            a.columns(),
            b.rows(),
            b.columns(),
            T::DTYPE,
            kernel.name()
        );
        kernel.matmul(a, b)
    }
}

impl Default for MatmulContext {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// First available accelerator: Metal, then OpenCL (when those features are
/// enabled), falling back to the simulated host device.
fn default_runtime() -> Arc<dyn DeviceRuntime> {
    #[cfg(feature = "metal")]
    {
        if let Some(metal) = mm_tensor::MetalRuntime::new() {
            return Arc::new(metal);
        }
    }
    #[cfg(feature = "opencl")]
    {
        if let Some(opencl) = mm_tensor::OpenClRuntime::new() {
            return Arc::new(opencl);
        }
    }
    log::info!("no accelerator runtime available, offloading to the host runtime");
    Arc::new(HostRuntime::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_tensor::MatmulError;

    const STRATEGIES: [Strategy; 4] = [
        Strategy::Reference,
        Strategy::Vectorized,
        Strategy::Parallel,
        Strategy::Offload,
    ];

    fn host_context(strategy: Strategy) -> MatmulContext {
        let config = RuntimeConfig::default()
            .with_strategy(strategy)
            .with_workers(3);
        MatmulContext::with_runtime(config, Arc::new(HostRuntime::new()))
    }

    #[test]
    fn test_every_strategy_computes_the_product() {
        let a = Matrix::new(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::new(3, 2, vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
        for strategy in STRATEGIES {
            let c = host_context(strategy).multiply(&a, &b).unwrap();
            assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0], "{strategy}");
        }
    }

    #[test]
    fn test_kernel_names_follow_strategy() {
        for strategy in STRATEGIES {
            let kernel = host_context(strategy).kernel::<f64>().unwrap();
            assert_eq!(kernel.name(), strategy.as_str());
        }
    }

    #[test]
    fn test_f64_strategies_agree() {
        let a = Matrix::from_fn(7, 12, |r, c| (r as f64 * 0.5) - (c as f64 * 0.25));
        let b = Matrix::from_fn(12, 5, |r, c| ((r + c) % 4) as f64 - 1.5);
        let want = host_context(Strategy::Reference).multiply(&a, &b).unwrap();
        for strategy in STRATEGIES {
            let got = host_context(strategy).multiply(&a, &b).unwrap();
            for (x, y) in got.as_slice().iter().zip(want.as_slice()) {
                approx::assert_abs_diff_eq!(x, y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_dimension_mismatch_is_propagated() {
        let a = Matrix::<f32>::zeros(2, 3);
        for strategy in STRATEGIES {
            let err = host_context(strategy).multiply(&a, &a).unwrap_err();
            assert_eq!(
                err,
                MatmulError::DimensionMismatch {
                    m: 2,
                    k: 3,
                    k2: 2,
                    n: 3
                }
            );
        }
    }
}
