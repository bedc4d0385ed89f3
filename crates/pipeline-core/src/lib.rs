//! Production pipeline orchestrator.
//!
//! This crate provides:
//! - `Pipeline`: the job orchestrator driving image prep, motion clip
//!   generation, map clip generation, and template fan-out
//! - `AssetCache`: content-addressed cache with TTL tiers
//! - `ClipValidator`: blob existence/decodability/duration checks
//! - `ListingLock`: cluster-safe per-listing mutual exclusion
//! - `ResourceTracker`: scoped temp-file lifecycle tracking
//! - `TemplateCatalog`: the immutable template registry
//! - Retry-with-backoff, configuration, structured job logging, and the
//!   `PipelineError`/`ErrorKind` classification layer

pub mod asset_cache;
pub mod clip_validator;
pub mod config;
pub mod error;
pub mod listing_lock;
pub mod logging;
pub mod pipeline;
pub mod resource_tracker;
pub mod retry;
pub mod template_catalog;

pub use asset_cache::AssetCache;
pub use clip_validator::{ClipValidator, ValidationOutcome};
pub use config::{BatchingConfig, CacheConfig, LockConfig, PipelineConfig, RetryConfig};
pub use error::{PipelineError, PipelineResult};
pub use listing_lock::{ListingLock, LockHandle};
pub use logging::JobLogger;
pub use pipeline::Pipeline;
pub use resource_tracker::{ResourceState, ResourceTracker};
pub use retry::{retry_with_backoff, RetryResult};
pub use template_catalog::TemplateCatalog;
