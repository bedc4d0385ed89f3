//! Firestore REST API client and persistence layer.
//!
//! Production-grade client with:
//! - Token caching with refresh margin
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)
//!
//! ## Modules
//! - `client` - Firestore REST API client
//! - `token_cache` - Thread-safe access token caching
//! - `retry` - Retry policy with exponential backoff
//! - `metrics` - Prometheus metrics collection
//! - `job_repo` - `JobRepository`: jobs, photos, listing locks, cached assets
//! - `types` - Firestore document types and value conversions

pub mod client;
#[cfg(test)]
mod client_tests;
pub mod error;
pub mod job_repo;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use job_repo::{FirestoreJobRepository, JobRepository, MetadataPatch, PhotoPatch};
pub use retry::RetryConfig;
pub use token_cache::TokenCache;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
