//! Retry and failover: error classification, target assembly, and the
//! engine that drives dispatch, profile retries, and feature fallback.

pub mod classifier;
pub mod engine;
pub mod targets;

pub use classifier::{ErrorKind, classify};
pub use engine::{EngineFailure, ResponseValidationConfig, RetryEngine};
pub use targets::{RetryTarget, build_retry_targets};
