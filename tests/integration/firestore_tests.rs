//! Firestore integration tests.
//!
//! These exercise `pipeline-repo` against real Firestore and are
//! `#[ignore]`d by default, mirroring the reference worker's layout.

use pipeline_models::{Job, JobId, JobStatus};
use pipeline_repo::{FirestoreClient, FirestoreConfig, FirestoreJobRepository, JobRepository};

async fn test_client() -> FirestoreClient {
    let config = FirestoreConfig::from_env().expect("Failed to load Firestore config");
    FirestoreClient::new(config).await.expect("Failed to create Firestore client")
}

/// Test Firestore connection via a job lookup that should come back empty.
#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_firestore_connection() {
    dotenvy::dotenv().ok();

    let repo = FirestoreJobRepository::new(test_client().await);
    let missing = repo.get_job(&JobId::from_string("_health_check_job")).await.expect("get_job should not error");
    assert!(missing.is_none());
}

/// Test job repository create/read/update/list-photos lifecycle.
#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_job_repository_lifecycle() {
    dotenvy::dotenv().ok();

    let repo = FirestoreJobRepository::new(test_client().await);

    let job = Job::new(
        "listing-integration-test",
        "integration-test-user",
        vec!["s3://bucket/properties/listing-integration-test/images/original/a.jpg".to_string()],
        vec!["storyteller".to_string()],
    );
    let job_id = job.id.clone();

    repo.create_job(&job).await.expect("Failed to create job");
    println!("Created job: {}", job_id);

    let fetched = repo.get_job(&job_id).await.expect("Failed to get job").expect("job should exist");
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.listing_id, "listing-integration-test");

    repo.update_status(&job_id, JobStatus::Processing, None, None)
        .await
        .expect("Failed to update status");

    let updated = repo.get_job(&job_id).await.expect("Failed to get job").expect("job should exist");
    assert_eq!(updated.status, JobStatus::Processing);

    let completed_at = chrono::Utc::now();
    repo.set_output(&job_id, "properties/listing-integration-test/videos/templates/out.mp4", completed_at)
        .await
        .expect("Failed to set output");

    let completed = repo.get_job(&job_id).await.expect("Failed to get job").expect("job should exist");
    assert!(completed.output_file.is_some());

    let photos = repo.get_photos("listing-integration-test").await.expect("Failed to list photos");
    assert!(photos.is_empty());
}

/// Test listing-lock creation, listing, and expiry reaping.
#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_listing_lock_lifecycle() {
    use pipeline_models::ListingLock;

    dotenvy::dotenv().ok();

    let repo = FirestoreJobRepository::new(test_client().await);
    let listing_id = "listing-lock-integration-test";

    let lock = ListingLock::new(listing_id, "integration-test-job", "integration-test-process");
    repo.create_lock(&lock).await.expect("Failed to create lock");

    let locks = repo.list_locks(listing_id).await.expect("Failed to list locks");
    assert!(!locks.is_empty());

    repo.delete_lock(listing_id, "integration-test-job", "integration-test-process")
        .await
        .expect("Failed to delete lock");

    let locks_after = repo.list_locks(listing_id).await.expect("Failed to list locks");
    assert!(locks_after.iter().all(|l| l.job_id != "integration-test-job"));
}
