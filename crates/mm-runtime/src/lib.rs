//! `mm-runtime` - Configuration and kernel dispatch for `mm-tensor`.
//!
//! This crate provides:
//! - `RuntimeConfig`, read from `MM_STRATEGY` / `MM_WORKERS`
//! - `MatmulContext`, which routes products to the configured kernel and
//!   owns the accelerator runtime used by the offload strategy

pub mod config;
pub mod context;
pub mod error;

pub use config::{RuntimeConfig, Strategy};
pub use context::MatmulContext;
pub use error::ConfigError;
