//! # Stratus
//!
//! Resilient client-side orchestration for the AWS Bedrock Converse API.
//!
//! A single converse call is executed against an ordered list of
//! (model, region, access-info) targets: the manager resolves friendly
//! model names through a multi-source catalog, the selector picks the best
//! access method per target (direct invocation or a cross-region inference
//! profile), and the retry engine recovers from transient failures,
//! throttling, profile requirements, and feature incompatibilities before
//! failing over to the next target. Batches fan out across regions under a
//! bounded worker pool with pluggable load balancing.
//!
//! ```no_run
//! use stratus::manager::{LlmManager, ManagerOptions};
//! use stratus::request::ConverseArgs;
//!
//! # async fn example() -> Result<(), stratus::error::LlmError> {
//! let manager = LlmManager::new(
//!     vec!["Claude 3.5 Sonnet".into()],
//!     vec!["us-east-1".into(), "us-west-2".into()],
//!     ManagerOptions::default(),
//! )?;
//!
//! let response = manager.converse(ConverseArgs::from_text("Hello!")).await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod aws;
pub mod catalog;
pub mod config;
pub mod error;
pub mod manager;
pub mod parallel;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod tests;

pub use access::method::AccessMethod;
pub use catalog::resolver::{MatchType, NameResolution};
pub use config::{
    CacheMode, CatalogConfig, ClientConfig, FailureHandlingStrategy, LoadBalancingStrategy,
    ParallelConfig, RetryConfig, RetryStrategy,
};
pub use error::LlmError;
pub use manager::{LlmManager, ManagerOptions};
pub use parallel::{ParallelLlmManager, ParallelResponse};
pub use request::{ConverseArgs, ConverseRequest, Message};
pub use response::ConverseResponse;
