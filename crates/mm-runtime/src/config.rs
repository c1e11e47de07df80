use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use crate::error::ConfigError;

/// Environment variable selecting the kernel.
pub const STRATEGY_VAR: &str = "MM_STRATEGY";
/// Environment variable setting the parallel worker count.
pub const WORKERS_VAR: &str = "MM_WORKERS";

/// Which kernel computes the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    Reference,
    #[default]
    Vectorized,
    Parallel,
    Offload,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Reference => "reference",
            Strategy::Vectorized => "vectorized",
            Strategy::Parallel => "parallel",
            Strategy::Offload => "offload",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" => Ok(Strategy::Reference),
            "vectorized" => Ok(Strategy::Vectorized),
            "parallel" => Ok(Strategy::Parallel),
            "offload" => Ok(Strategy::Offload),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Kernel selection and sizing for a [`MatmulContext`](crate::MatmulContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub strategy: Strategy,
    /// Worker threads for [`Strategy::Parallel`]; always at least 1.
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            strategy: Strategy::default(),
            workers: default_workers(),
        }
    }
}

impl RuntimeConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value. Unset variables fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();

        if let Some(value) = lookup(STRATEGY_VAR) {
            config.strategy = value.parse()?;
        }

        if let Some(value) = lookup(WORKERS_VAR) {
            let workers = value
                .trim()
                .parse::<NonZeroUsize>()
                .map_err(|e| ConfigError::InvalidVar {
                    var: WORKERS_VAR,
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
            config.workers = workers.get();
        }

        log::debug!(
            "runtime config: strategy={} workers={}",
            config.strategy,
            config.workers
        );
        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Zero is clamped to one worker.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.strategy, Strategy::Vectorized);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_reads_variables() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MM_STRATEGY", "Parallel"),
            ("MM_WORKERS", " 6 "),
        ]))
        .unwrap();
        assert_eq!(config.strategy, Strategy::Parallel);
        assert_eq!(config.workers, 6);
    }

    #[test]
    fn test_unknown_strategy() {
        let err = RuntimeConfig::from_lookup(lookup(&[("MM_STRATEGY", "gpu")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownStrategy("gpu".to_string()));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("MM_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "MM_WORKERS", .. }));
        assert!(err.to_string().contains("'0'"));
    }

    #[test]
    fn test_strategy_round_trips_through_display() {
        for s in [
            Strategy::Reference,
            Strategy::Vectorized,
            Strategy::Parallel,
            Strategy::Offload,
        ] {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::default()
            .with_strategy(Strategy::Offload)
            .with_workers(0);
        assert_eq!(config.strategy, Strategy::Offload);
        assert_eq!(config.workers, 1);
    }
}
