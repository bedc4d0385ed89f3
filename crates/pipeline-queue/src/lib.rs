//! Redis Streams job queue for production-pipeline job intake.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams (`Execute` and `RegeneratePhotos`)
//! - Worker consumption with consumer-group claim/ack/retry/DLQ
//! - Progress events via Redis Pub/Sub, with history and heartbeat support
//!
//! `pipeline-core::Pipeline` never references this crate: job intake is
//! infrastructure around the core, not part of it.

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{ProductionJob, QueueJob, RegeneratePhotosJob};
pub use progress::{
    ProgressChannel, ProgressEvent, HEARTBEAT_TTL_SECS, PROGRESS_HISTORY_TTL_SECS, STALE_GRACE_PERIOD_SECS,
    STALE_THRESHOLD_SECS,
};
pub use queue::{JobQueue, QueueConfig};
