//! Shared data models for the production pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle/progress
//! - Photos and per-listing ordering
//! - Content-addressed cache entries (AssetCache)
//! - Listing locks
//! - Template definitions
//! - Regeneration context
//! - Video encoding configuration

pub mod asset;
pub mod encoding;
pub mod execute_input;
pub mod job;
pub mod lock;
pub mod photo;
pub mod progress;
pub mod rect;
pub mod regeneration;
pub mod template;

pub use asset::{AssetMetadata, AssetType, CacheKeyDiscriminator, CacheTier, ProcessedAsset};
pub use encoding::EncodingConfig;
pub use execute_input::{Coordinates, ExecuteInput};
pub use job::{Job, JobId, JobProgress, JobStatus};
pub use lock::ListingLock;
pub use photo::{Photo, PhotoStatus};
pub use progress::{ErrorDetails, ErrorKind, Stage, StageProgress};
pub use rect::NormalizedRect;
pub use regeneration::RegenerationContext;
pub use template::{AccessLevel, MusicSpec, SequenceSlot, TemplateDefinition, Transition};
