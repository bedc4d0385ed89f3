//! Job types for the queue: serialized `Pipeline::execute` /
//! `Pipeline::regenerate_photos` requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pipeline_models::{ExecuteInput, JobId};

/// Job to run `Pipeline::execute` for one production request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionJob {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    pub input: ExecuteInput,
    pub created_at: DateTime<Utc>,
}

impl ProductionJob {
    /// Wrap an `ExecuteInput` for queue transport, deriving `job_id` and
    /// `listing_id` from it.
    pub fn new(input: ExecuteInput) -> Self {
        let job_id = JobId::from_string(input.job_id.clone());
        let listing_id = input.listing_id.clone();
        Self { job_id, listing_id, input, created_at: Utc::now() }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("execute:{}", self.job_id)
    }
}

/// Job to re-render all templates after regenerating a subset of a
/// listing's motion clips (`Pipeline::regenerate_photos`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegeneratePhotosJob {
    pub job_id: JobId,
    pub photo_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RegeneratePhotosJob {
    pub fn new(job_id: JobId, photo_ids: Vec<String>) -> Self {
        Self { job_id, photo_ids, created_at: Utc::now() }
    }

    /// Generate idempotency key for deduplication. Order-independent over
    /// `photo_ids` so two requests naming the same set dedup together.
    pub fn idempotency_key(&self) -> String {
        let mut ids = self.photo_ids.clone();
        ids.sort();
        format!("regenerate:{}:{:?}", self.job_id, ids)
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Run the full production pipeline for one job.
    Execute(ProductionJob),
    /// Re-render all templates after regenerating a subset of photos.
    RegeneratePhotos(RegeneratePhotosJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::Execute(j) => &j.job_id,
            QueueJob::RegeneratePhotos(j) => &j.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::Execute(j) => j.idempotency_key(),
            QueueJob::RegeneratePhotos(j) => j.idempotency_key(),
        }
    }

    /// Returns true if this is a regeneration job.
    pub fn is_regeneration(&self) -> bool {
        matches!(self, QueueJob::RegeneratePhotos(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> ExecuteInput {
        ExecuteInput {
            job_id: "job-1".into(),
            listing_id: Some("listing-1".into()),
            input_files: vec!["s3://bucket/properties/listing-1/images/original/a.jpg".into()],
            template: "storyteller".into(),
            coordinates: None,
            is_regeneration: false,
            regeneration_context: None,
            skip_motion: false,
            skip_motion_if_cached: false,
            skip_lock: false,
            force_regeneration: false,
        }
    }

    #[test]
    fn queue_job_execute_serde_roundtrip() {
        let job = QueueJob::Execute(ProductionJob::new(sample_input()));
        let json = serde_json::to_string(&job).expect("serialize QueueJob");
        let decoded: QueueJob = serde_json::from_str(&json).expect("deserialize QueueJob");
        assert_eq!(decoded.job_id(), job.job_id());
        assert_eq!(decoded.idempotency_key(), job.idempotency_key());
    }

    #[test]
    fn queue_job_regenerate_photos_serde_roundtrip() {
        let job_id = JobId::from_string("job-2");
        let job = QueueJob::RegeneratePhotos(RegeneratePhotosJob::new(job_id.clone(), vec!["photo-1".into()]));
        let json = serde_json::to_string(&job).expect("serialize QueueJob");
        let decoded: QueueJob = serde_json::from_str(&json).expect("deserialize QueueJob");
        assert!(decoded.is_regeneration());
        assert_eq!(decoded.job_id(), &job_id);
    }

    #[test]
    fn regenerate_photos_idempotency_key_is_order_independent() {
        let job_id = JobId::from_string("job-3");
        let a = RegeneratePhotosJob::new(job_id.clone(), vec!["p2".into(), "p1".into()]);
        let b = RegeneratePhotosJob::new(job_id, vec!["p1".into(), "p2".into()]);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }
}
