//! Redis/queue integration tests.
//!
//! These exercise `pipeline-queue` against a real Redis instance and are
//! `#[ignore]`d by default, mirroring the reference worker's layout.

use std::time::Duration;

use pipeline_models::{ExecuteInput, JobId};
use pipeline_queue::{JobQueue, ProductionJob, QueueJob, RegeneratePhotosJob};

fn sample_input(job_id: &str) -> ExecuteInput {
    ExecuteInput {
        job_id: job_id.to_string(),
        listing_id: Some("listing-integration".to_string()),
        input_files: vec!["s3://bucket/properties/listing-integration/images/original/a.jpg".to_string()],
        template: "storyteller".to_string(),
        coordinates: None,
        is_regeneration: false,
        regeneration_context: None,
        skip_motion: false,
        skip_motion_if_cached: false,
        skip_lock: false,
        force_regeneration: false,
    }
}

/// Test Redis connection and basic operations.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

/// Test job enqueue and dequeue cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_enqueue_dequeue() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job_id = JobId::new().to_string();
    let job = ProductionJob::new(sample_input(&job_id));

    let message_id = queue.enqueue_execute(job).await.expect("Failed to enqueue");
    println!("Enqueued job {} with message ID {}", job_id, message_id);

    let consumer_name = "test-consumer";
    let jobs = queue.consume(consumer_name, 1000, 1).await.expect("Failed to consume");

    assert_eq!(jobs.len(), 1);
    let (msg_id, consumed_job) = &jobs[0];
    assert_eq!(consumed_job.job_id().as_str(), job_id);

    queue.ack(msg_id).await.expect("Failed to ack");
    println!("Job {} acknowledged", job_id);
}

/// Test regenerate-photos enqueue, consume, and dead-lettering.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_regenerate_photos_dlq() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job_id = JobId::new();
    let job = RegeneratePhotosJob::new(job_id.clone(), vec!["photo-1".to_string()]);

    let message_id = queue.enqueue_regenerate(job.clone()).await.expect("Failed to enqueue");

    let consumer_name = "test-dlq-consumer";
    let jobs = queue.consume(consumer_name, 1000, 1).await.expect("Failed to consume");
    assert!(!jobs.is_empty());

    let queue_job = QueueJob::RegeneratePhotos(job);
    queue.dlq(&message_id, &queue_job, "test error").await.expect("Failed to move to DLQ");

    let dlq_len = queue.dlq_len().await.expect("Failed to get DLQ length");
    assert!(dlq_len > 0);
    println!("DLQ length: {}", dlq_len);
}

/// Test progress channel pub/sub.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_channel() {
    use futures::StreamExt;
    use pipeline_queue::ProgressChannel;

    dotenvy::dotenv().ok();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let progress = ProgressChannel::new(&redis_url).expect("Failed to create progress channel");

    let job_id = JobId::new();

    let progress_clone = progress.clone();
    let job_id_clone = job_id.clone();
    let subscriber = tokio::spawn(async move {
        let mut stream = progress_clone.subscribe(&job_id_clone).await.expect("Failed to subscribe");
        let mut messages = Vec::new();

        let timeout = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = stream.next().await {
                messages.push(event);
                if messages.len() >= 2 {
                    break;
                }
            }
        });

        let _ = timeout.await;
        messages
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    progress.log(&job_id, "starting motion clip generation").await.ok();
    progress.at_percent(&job_id, pipeline_models::Stage::Motion, 50).await.ok();

    let messages = subscriber.await.expect("Subscriber task failed");
    println!("Received {} messages", messages.len());
}
