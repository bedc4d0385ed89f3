//! `JobRepository`: persistence for jobs, photos, listing locks, and cached
//! assets, backed by the Firestore REST client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use pipeline_models::{
    AssetMetadata, AssetType, Job, JobId, JobProgress, JobStatus, ListingLock, Photo, PhotoStatus,
    ProcessedAsset,
};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{ArrayValue, Document, FromFirestoreValue, MapValue, ToFirestoreValue, Value};

const JOBS_COLLECTION: &str = "jobs";
const PHOTOS_COLLECTION: &str = "photos";
const LOCKS_COLLECTION: &str = "locks";
const ASSETS_COLLECTION: &str = "assets";

const LOCK_RECENT_READS_WINDOW_DAYS: i64 = 7;
const LIST_PAGE_SIZE: u32 = 200;

/// Merge patch applied to a job's free-form metadata map.
pub type MetadataPatch = HashMap<String, String>;

/// Partial update applied to a `Photo`. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PhotoPatch {
    pub file_path: Option<String>,
    pub processed_file_path: Option<String>,
    pub runway_video_path: Option<String>,
    pub status: Option<PhotoStatus>,
    pub error: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

fn apply_photo_patch(photo: &mut Photo, patch: &PhotoPatch) {
    if let Some(v) = &patch.file_path {
        photo.file_path = v.clone();
    }
    if let Some(v) = &patch.processed_file_path {
        photo.processed_file_path = Some(v.clone());
    }
    if let Some(v) = &patch.runway_video_path {
        photo.runway_video_path = Some(v.clone());
    }
    if let Some(v) = patch.status {
        photo.status = v;
    }
    if let Some(v) = &patch.error {
        photo.error = Some(v.clone());
    }
    if let Some(v) = &patch.metadata {
        photo.metadata = v.clone();
    }
}

/// Persistence collaborator for jobs, photos, listing locks, and the
/// content-addressed asset cache.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &Job) -> FirestoreResult<()>;
    async fn get_job(&self, job_id: &JobId) -> FirestoreResult<Option<Job>>;
    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: Option<JobProgress>,
        error: Option<String>,
    ) -> FirestoreResult<()>;
    async fn set_metadata(&self, job_id: &JobId, patch: MetadataPatch) -> FirestoreResult<()>;
    async fn set_output(
        &self,
        job_id: &JobId,
        output_blob_url: &str,
        completed_at: DateTime<Utc>,
    ) -> FirestoreResult<()>;

    /// Photos for a listing, ascending by `order`.
    async fn get_photos(&self, listing_id: &str) -> FirestoreResult<Vec<Photo>>;
    async fn update_photo(&self, id: &str, patch: PhotoPatch) -> FirestoreResult<()>;
    async fn upsert_photo_by_order(
        &self,
        listing_id: &str,
        order: u32,
        patch: PhotoPatch,
    ) -> FirestoreResult<Photo>;

    async fn list_locks(&self, listing_id: &str) -> FirestoreResult<Vec<ListingLock>>;
    async fn create_lock(&self, lock: &ListingLock) -> FirestoreResult<()>;
    async fn delete_expired_locks(&self, listing_id: &str) -> FirestoreResult<u32>;
    async fn delete_lock(&self, listing_id: &str, job_id: &str, process_id: &str) -> FirestoreResult<()>;

    async fn put_asset(&self, asset: &ProcessedAsset) -> FirestoreResult<()>;
    async fn get_asset(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>>;
    async fn touch_asset(&self, cache_key: &str) -> FirestoreResult<()>;
}

/// Firestore-backed `JobRepository`.
pub struct FirestoreJobRepository {
    client: FirestoreClient,
}

impl FirestoreJobRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for FirestoreJobRepository {
    async fn create_job(&self, job: &Job) -> FirestoreResult<()> {
        let fields = job_to_fields(job);
        self.client
            .with_retry(|| self.client.create_document(JOBS_COLLECTION, job.id.as_str(), fields.clone()))
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> FirestoreResult<Option<Job>> {
        let doc = self
            .client
            .with_retry(|| self.client.get_document(JOBS_COLLECTION, job_id.as_str()))
            .await?;
        doc.as_ref().map(doc_to_job).transpose()
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: Option<JobProgress>,
        error: Option<String>,
    ) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        let mut mask = vec!["status".to_string(), "updated_at".to_string()];
        fields.insert("status".into(), status.as_str().to_string().to_firestore_value());
        fields.insert("updated_at".into(), Utc::now().to_firestore_value());

        if let Some(p) = progress {
            fields.insert("progress".into(), job_progress_to_value(&p));
            mask.push("progress".into());
        }
        if let Some(e) = &error {
            fields.insert("error".into(), e.to_firestore_value());
            mask.push("error".into());
        }
        if status.is_terminal() {
            fields.insert("completed_at".into(), Utc::now().to_firestore_value());
            mask.push("completed_at".into());
        }

        self.client
            .with_retry(|| {
                self.client
                    .update_document(JOBS_COLLECTION, job_id.as_str(), fields.clone(), Some(mask.clone()))
            })
            .await?;
        Ok(())
    }

    async fn set_metadata(&self, job_id: &JobId, patch: MetadataPatch) -> FirestoreResult<()> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| FirestoreError::not_found(job_id.as_str()))?;

        let mut merged = job.metadata;
        merged.extend(patch);

        let mut fields = HashMap::new();
        fields.insert("metadata".into(), merged.to_firestore_value());
        fields.insert("updated_at".into(), Utc::now().to_firestore_value());

        self.client
            .with_retry(|| {
                self.client.update_document(
                    JOBS_COLLECTION,
                    job_id.as_str(),
                    fields.clone(),
                    Some(vec!["metadata".into(), "updated_at".into()]),
                )
            })
            .await?;
        Ok(())
    }

    async fn set_output(
        &self,
        job_id: &JobId,
        output_blob_url: &str,
        completed_at: DateTime<Utc>,
    ) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("output_file".into(), output_blob_url.to_firestore_value());
        fields.insert("completed_at".into(), completed_at.to_firestore_value());
        fields.insert("updated_at".into(), Utc::now().to_firestore_value());
        fields.insert(
            "status".into(),
            JobStatus::Completed.as_str().to_string().to_firestore_value(),
        );

        self.client
            .with_retry(|| {
                self.client.update_document(
                    JOBS_COLLECTION,
                    job_id.as_str(),
                    fields.clone(),
                    Some(vec![
                        "output_file".into(),
                        "completed_at".into(),
                        "updated_at".into(),
                        "status".into(),
                    ]),
                )
            })
            .await?;
        Ok(())
    }

    async fn get_photos(&self, listing_id: &str) -> FirestoreResult<Vec<Photo>> {
        let mut photos = Vec::new();
        for doc in self.list_all(PHOTOS_COLLECTION).await? {
            let photo = doc_to_photo(&doc)?;
            if photo.listing_id == listing_id {
                photos.push(photo);
            }
        }
        photos.sort_by_key(|p| p.order);
        Ok(photos)
    }

    async fn update_photo(&self, id: &str, patch: PhotoPatch) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        let mut mask = Vec::new();

        if let Some(v) = &patch.file_path {
            fields.insert("file_path".into(), v.to_firestore_value());
            mask.push("file_path".into());
        }
        if let Some(v) = &patch.processed_file_path {
            fields.insert("processed_file_path".into(), v.to_firestore_value());
            mask.push("processed_file_path".into());
        }
        if let Some(v) = &patch.runway_video_path {
            fields.insert("runway_video_path".into(), v.to_firestore_value());
            mask.push("runway_video_path".into());
        }
        if let Some(v) = patch.status {
            fields.insert("status".into(), v.as_str().to_string().to_firestore_value());
            mask.push("status".into());
        }
        if let Some(v) = &patch.error {
            fields.insert("error".into(), v.to_firestore_value());
            mask.push("error".into());
        }
        if let Some(v) = &patch.metadata {
            fields.insert("metadata".into(), v.to_firestore_value());
            mask.push("metadata".into());
        }

        if mask.is_empty() {
            return Ok(());
        }

        self.client
            .with_retry(|| self.client.update_document(PHOTOS_COLLECTION, id, fields.clone(), Some(mask.clone())))
            .await?;
        Ok(())
    }

    async fn upsert_photo_by_order(
        &self,
        listing_id: &str,
        order: u32,
        patch: PhotoPatch,
    ) -> FirestoreResult<Photo> {
        let existing = self
            .get_photos(listing_id)
            .await?
            .into_iter()
            .find(|p| p.order == order);

        let is_new = existing.is_none();
        let mut photo = existing
            .unwrap_or_else(|| Photo::new(listing_id, order, patch.file_path.clone().unwrap_or_default()));
        apply_photo_patch(&mut photo, &patch);

        let fields = photo_to_fields(&photo);
        if is_new {
            self.client
                .with_retry(|| self.client.create_document(PHOTOS_COLLECTION, &photo.id, fields.clone()))
                .await?;
        } else {
            self.client
                .with_retry(|| self.client.update_document(PHOTOS_COLLECTION, &photo.id, fields.clone(), None))
                .await?;
        }
        Ok(photo)
    }

    async fn list_locks(&self, listing_id: &str) -> FirestoreResult<Vec<ListingLock>> {
        let mut locks = Vec::new();
        for doc in self.list_all(LOCKS_COLLECTION).await? {
            let lock = doc_to_lock(&doc)?;
            if lock.listing_id == listing_id {
                locks.push(lock);
            }
        }
        Ok(locks)
    }

    async fn create_lock(&self, lock: &ListingLock) -> FirestoreResult<()> {
        let existing = self.list_locks(&lock.listing_id).await?;
        if existing.iter().any(|l| !l.is_expired()) {
            return Err(FirestoreError::AlreadyExists(format!(
                "active lock already held for listing {}",
                lock.listing_id
            )));
        }

        let doc_id = lock_doc_id(lock);
        let fields = lock_to_fields(lock);
        self.client
            .with_retry(|| self.client.create_document(LOCKS_COLLECTION, &doc_id, fields.clone()))
            .await?;
        Ok(())
    }

    async fn delete_expired_locks(&self, listing_id: &str) -> FirestoreResult<u32> {
        let locks = self.list_locks(listing_id).await?;
        let mut deleted = 0;
        for lock in locks.iter().filter(|l| l.is_expired()) {
            let doc_id = lock_doc_id(lock);
            self.client
                .with_retry(|| self.client.delete_document(LOCKS_COLLECTION, &doc_id))
                .await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn delete_lock(&self, listing_id: &str, job_id: &str, process_id: &str) -> FirestoreResult<()> {
        let doc_id = format!("{listing_id}__{job_id}__{process_id}");
        self.client
            .with_retry(|| self.client.delete_document(LOCKS_COLLECTION, &doc_id))
            .await?;
        Ok(())
    }

    async fn put_asset(&self, asset: &ProcessedAsset) -> FirestoreResult<()> {
        let fields = asset_to_fields(asset);
        let existing = self
            .client
            .with_retry(|| self.client.get_document(ASSETS_COLLECTION, &asset.cache_key))
            .await?;

        if existing.is_some() {
            self.client
                .with_retry(|| {
                    self.client
                        .update_document(ASSETS_COLLECTION, &asset.cache_key, fields.clone(), None)
                })
                .await?;
        } else {
            self.client
                .with_retry(|| self.client.create_document(ASSETS_COLLECTION, &asset.cache_key, fields.clone()))
                .await?;
        }
        Ok(())
    }

    async fn get_asset(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>> {
        let doc = self
            .client
            .with_retry(|| self.client.get_document(ASSETS_COLLECTION, cache_key))
            .await?;
        doc.as_ref().map(doc_to_asset).transpose()
    }

    async fn touch_asset(&self, cache_key: &str) -> FirestoreResult<()> {
        let asset = self
            .get_asset(cache_key)
            .await?
            .ok_or_else(|| FirestoreError::not_found(cache_key))?;

        let now = Utc::now();
        let window_start = now - Duration::days(LOCK_RECENT_READS_WINDOW_DAYS);
        let mut recent_reads: Vec<DateTime<Utc>> = asset
            .metadata
            .recent_reads
            .into_iter()
            .filter(|t| *t >= window_start)
            .collect();
        recent_reads.push(now);

        let mut fields = HashMap::new();
        fields.insert("last_accessed".into(), now.to_firestore_value());
        fields.insert(
            "access_count".into(),
            (asset.metadata.access_count + 1).to_firestore_value(),
        );
        fields.insert("recent_reads".into(), recent_reads.to_firestore_value());

        self.client
            .with_retry(|| {
                self.client.update_document(
                    ASSETS_COLLECTION,
                    cache_key,
                    fields.clone(),
                    Some(vec![
                        "last_accessed".into(),
                        "access_count".into(),
                        "recent_reads".into(),
                    ]),
                )
            })
            .await?;
        Ok(())
    }
}

impl FirestoreJobRepository {
    /// Page through an entire collection. The REST client has no query
    /// endpoint, so listing-scoped reads filter client-side over the full
    /// collection; collections here are small enough for this to be cheap.
    async fn list_all(&self, collection: &str) -> FirestoreResult<Vec<Document>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .client
                .with_retry(|| {
                    self.client
                        .list_documents(collection, Some(LIST_PAGE_SIZE), page_token.as_deref())
                })
                .await?;
            if let Some(docs) = page.documents {
                all.extend(docs);
            }
            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        Ok(all)
    }
}

fn doc_id(doc: &Document) -> FirestoreResult<String> {
    doc.name
        .as_ref()
        .and_then(|n| n.rsplit('/').next())
        .map(|s| s.to_string())
        .ok_or_else(|| FirestoreError::InvalidResponse("document has no name".into()))
}

fn doc_fields(doc: &Document) -> FirestoreResult<&HashMap<String, Value>> {
    doc.fields
        .as_ref()
        .ok_or_else(|| FirestoreError::InvalidResponse("document has no fields".into()))
}

fn job_progress_to_value(progress: &JobProgress) -> Value {
    let mut fields = HashMap::new();
    fields.insert("total_templates".into(), progress.total_templates.to_firestore_value());
    fields.insert(
        "completed_templates".into(),
        progress.completed_templates.to_firestore_value(),
    );
    fields.insert(
        "succeeded_templates".into(),
        progress.succeeded_templates.to_firestore_value(),
    );
    fields.insert("failed_templates".into(), progress.failed_templates.to_firestore_value());
    fields.insert("current_template".into(), progress.current_template.to_firestore_value());
    Value::MapValue(MapValue { fields: Some(fields) })
}

fn value_to_job_progress(value: &Value) -> JobProgress {
    match value {
        Value::MapValue(MapValue { fields: Some(f) }) => JobProgress {
            total_templates: f.get("total_templates").and_then(u32::from_firestore_value).unwrap_or(0),
            completed_templates: f
                .get("completed_templates")
                .and_then(u32::from_firestore_value)
                .unwrap_or(0),
            succeeded_templates: f
                .get("succeeded_templates")
                .and_then(u32::from_firestore_value)
                .unwrap_or(0),
            failed_templates: f.get("failed_templates").and_then(u32::from_firestore_value).unwrap_or(0),
            current_template: f.get("current_template").and_then(String::from_firestore_value),
        },
        _ => JobProgress::default(),
    }
}

fn parse_job_status(s: &str) -> Option<JobStatus> {
    match s {
        "pending" => Some(JobStatus::Pending),
        "processing" => Some(JobStatus::Processing),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "reprocessing" => Some(JobStatus::Reprocessing),
        _ => None,
    }
}

fn parse_photo_status(s: &str) -> Option<PhotoStatus> {
    match s {
        "pending" => Some(PhotoStatus::Pending),
        "processing" => Some(PhotoStatus::Processing),
        "completed" => Some(PhotoStatus::Completed),
        "failed" => Some(PhotoStatus::Failed),
        _ => None,
    }
}

fn parse_asset_type(s: &str) -> Option<AssetType> {
    match s {
        "runway" => Some(AssetType::Runway),
        "map" => Some(AssetType::Map),
        "webp" => Some(AssetType::Webp),
        "template" => Some(AssetType::Template),
        _ => None,
    }
}

fn job_to_fields(job: &Job) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("listing_id".into(), job.listing_id.to_firestore_value());
    fields.insert("user_id".into(), job.user_id.to_firestore_value());
    fields.insert("template_default".into(), job.template_default.to_firestore_value());
    fields.insert("status".into(), job.status.as_str().to_string().to_firestore_value());
    fields.insert("progress".into(), job_progress_to_value(&job.progress));
    fields.insert("input_files".into(), job.input_files.to_firestore_value());
    fields.insert("output_file".into(), job.output_file.to_firestore_value());
    fields.insert("metadata".into(), job.metadata.to_firestore_value());
    fields.insert("error".into(), job.error.to_firestore_value());
    fields.insert("created_at".into(), job.created_at.to_firestore_value());
    fields.insert("updated_at".into(), job.updated_at.to_firestore_value());
    fields.insert("started_at".into(), job.started_at.to_firestore_value());
    fields.insert("completed_at".into(), job.completed_at.to_firestore_value());
    fields
}

fn doc_to_job(doc: &Document) -> FirestoreResult<Job> {
    let id = doc_id(doc)?;
    let fields = doc_fields(doc)?;
    let get_str = |k: &str| fields.get(k).and_then(String::from_firestore_value);

    Ok(Job {
        id: JobId::from_string(id),
        listing_id: get_str("listing_id").unwrap_or_default(),
        user_id: get_str("user_id").unwrap_or_default(),
        template_default: fields
            .get("template_default")
            .and_then(Vec::<String>::from_firestore_value)
            .unwrap_or_default(),
        status: get_str("status").and_then(|s| parse_job_status(&s)).unwrap_or_default(),
        progress: fields.get("progress").map(value_to_job_progress).unwrap_or_default(),
        input_files: fields
            .get("input_files")
            .and_then(Vec::<String>::from_firestore_value)
            .unwrap_or_default(),
        output_file: get_str("output_file"),
        metadata: fields
            .get("metadata")
            .and_then(HashMap::<String, String>::from_firestore_value)
            .unwrap_or_default(),
        error: get_str("error"),
        created_at: fields
            .get("created_at")
            .and_then(DateTime::<Utc>::from_firestore_value)
            .unwrap_or_else(Utc::now),
        updated_at: fields
            .get("updated_at")
            .and_then(DateTime::<Utc>::from_firestore_value)
            .unwrap_or_else(Utc::now),
        started_at: fields.get("started_at").and_then(DateTime::<Utc>::from_firestore_value),
        completed_at: fields.get("completed_at").and_then(DateTime::<Utc>::from_firestore_value),
    })
}

fn photo_to_fields(photo: &Photo) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("listing_id".into(), photo.listing_id.to_firestore_value());
    fields.insert("order".into(), photo.order.to_firestore_value());
    fields.insert("file_path".into(), photo.file_path.to_firestore_value());
    fields.insert(
        "processed_file_path".into(),
        photo.processed_file_path.to_firestore_value(),
    );
    fields.insert("runway_video_path".into(), photo.runway_video_path.to_firestore_value());
    fields.insert("status".into(), photo.status.as_str().to_string().to_firestore_value());
    fields.insert("error".into(), photo.error.to_firestore_value());
    fields.insert("metadata".into(), photo.metadata.to_firestore_value());
    fields
}

fn doc_to_photo(doc: &Document) -> FirestoreResult<Photo> {
    let id = doc_id(doc)?;
    let fields = doc_fields(doc)?;
    let get_str = |k: &str| fields.get(k).and_then(String::from_firestore_value);

    Ok(Photo {
        id,
        listing_id: get_str("listing_id").unwrap_or_default(),
        order: fields.get("order").and_then(u32::from_firestore_value).unwrap_or(0),
        file_path: get_str("file_path").unwrap_or_default(),
        processed_file_path: get_str("processed_file_path"),
        runway_video_path: get_str("runway_video_path"),
        status: get_str("status").and_then(|s| parse_photo_status(&s)).unwrap_or_default(),
        error: get_str("error"),
        metadata: fields
            .get("metadata")
            .and_then(HashMap::<String, String>::from_firestore_value)
            .unwrap_or_default(),
    })
}

fn lock_doc_id(lock: &ListingLock) -> String {
    format!("{}__{}__{}", lock.listing_id, lock.job_id, lock.process_id)
}

fn lock_to_fields(lock: &ListingLock) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("listing_id".into(), lock.listing_id.to_firestore_value());
    fields.insert("job_id".into(), lock.job_id.to_firestore_value());
    fields.insert("process_id".into(), lock.process_id.to_firestore_value());
    fields.insert("expires_at".into(), lock.expires_at.to_firestore_value());
    fields
}

fn doc_to_lock(doc: &Document) -> FirestoreResult<ListingLock> {
    let fields = doc_fields(doc)?;
    Ok(ListingLock {
        listing_id: fields
            .get("listing_id")
            .and_then(String::from_firestore_value)
            .unwrap_or_default(),
        job_id: fields.get("job_id").and_then(String::from_firestore_value).unwrap_or_default(),
        process_id: fields
            .get("process_id")
            .and_then(String::from_firestore_value)
            .unwrap_or_default(),
        expires_at: fields
            .get("expires_at")
            .and_then(DateTime::<Utc>::from_firestore_value)
            .unwrap_or_else(Utc::now),
    })
}

fn asset_to_fields(asset: &ProcessedAsset) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(
        "asset_type".into(),
        asset.asset_type.as_str().to_string().to_firestore_value(),
    );
    fields.insert("path".into(), asset.path.to_firestore_value());
    fields.insert("hash".into(), asset.hash.to_firestore_value());
    fields.insert("timestamp".into(), asset.metadata.timestamp.to_firestore_value());
    fields.insert("last_accessed".into(), asset.metadata.last_accessed.to_firestore_value());
    fields.insert("access_count".into(), asset.metadata.access_count.to_firestore_value());
    fields.insert("recent_reads".into(), asset.metadata.recent_reads.to_firestore_value());
    fields
}

fn doc_to_asset(doc: &Document) -> FirestoreResult<ProcessedAsset> {
    let cache_key = doc_id(doc)?;
    let fields = doc_fields(doc)?;
    let asset_type = fields
        .get("asset_type")
        .and_then(String::from_firestore_value)
        .and_then(|s| parse_asset_type(&s))
        .unwrap_or(AssetType::Webp);

    Ok(ProcessedAsset {
        asset_type,
        cache_key,
        path: fields.get("path").and_then(String::from_firestore_value).unwrap_or_default(),
        hash: fields.get("hash").and_then(String::from_firestore_value).unwrap_or_default(),
        metadata: AssetMetadata {
            timestamp: fields
                .get("timestamp")
                .and_then(DateTime::<Utc>::from_firestore_value)
                .unwrap_or_else(Utc::now),
            last_accessed: fields
                .get("last_accessed")
                .and_then(DateTime::<Utc>::from_firestore_value)
                .unwrap_or_else(Utc::now),
            access_count: fields.get("access_count").and_then(u32::from_firestore_value).unwrap_or(0),
            recent_reads: fields
                .get("recent_reads")
                .and_then(Vec::<DateTime<Utc>>::from_firestore_value)
                .unwrap_or_default(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_round_trips_through_firestore_fields() {
        let job = Job::new("listing-1", "user-1", vec!["raw/a.jpg".into()], vec!["crescendo".into()]);
        let fields = job_to_fields(&job);
        let doc = Document {
            name: Some(format!("projects/p/databases/(default)/documents/jobs/{}", job.id.as_str())),
            fields: Some(fields),
            create_time: None,
            update_time: None,
        };
        let round_tripped = doc_to_job(&doc).unwrap();
        assert_eq!(round_tripped.id, job.id);
        assert_eq!(round_tripped.listing_id, job.listing_id);
        assert_eq!(round_tripped.template_default, job.template_default);
        assert_eq!(round_tripped.status, job.status);
        assert_eq!(round_tripped.progress.total_templates, job.progress.total_templates);
    }

    #[test]
    fn photo_round_trips_through_firestore_fields() {
        let photo = Photo::new("listing-1", 3, "properties/listing-1/images/original/c.jpg");
        let fields = photo_to_fields(&photo);
        let doc = Document {
            name: Some(format!("projects/p/databases/(default)/documents/photos/{}", photo.id)),
            fields: Some(fields),
            create_time: None,
            update_time: None,
        };
        let round_tripped = doc_to_photo(&doc).unwrap();
        assert_eq!(round_tripped.order, 3);
        assert_eq!(round_tripped.file_path, photo.file_path);
        assert_eq!(round_tripped.status, PhotoStatus::Pending);
    }

    #[test]
    fn lock_doc_id_is_stable_for_the_matching_tuple() {
        let lock = ListingLock::new("listing-1", "job-1", "proc-1");
        assert_eq!(lock_doc_id(&lock), "listing-1__job-1__proc-1");
    }

    #[test]
    fn asset_round_trips_through_firestore_fields() {
        let asset = ProcessedAsset::new(AssetType::Runway, "cache-key-1", "properties/x/videos/runway/j/0.mp4", "h1");
        let fields = asset_to_fields(&asset);
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/assets/cache-key-1".to_string()),
            fields: Some(fields),
            create_time: None,
            update_time: None,
        };
        let round_tripped = doc_to_asset(&doc).unwrap();
        assert_eq!(round_tripped.cache_key, "cache-key-1");
        assert_eq!(round_tripped.asset_type, AssetType::Runway);
        assert_eq!(round_tripped.path, asset.path);
    }
}
