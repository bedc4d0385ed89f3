//! Production pipeline worker.
//!
//! This crate provides:
//! - `JobExecutor`: claims `pipeline-queue` entries via a Redis Streams
//!   consumer group and drives them through a `pipeline_core::Pipeline`
//! - `WorkerConfig`: environment-driven worker tuning
//! - `WorkerError`: the worker-level error envelope wrapping every
//!   collaborator crate's error type

pub mod config;
pub mod error;
pub mod executor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
