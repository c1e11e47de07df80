use thiserror::Error;

/// Errors raised while reading the runtime configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown strategy '{0}' (expected reference, vectorized, parallel or offload)")]
    UnknownStrategy(String),

    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
}
