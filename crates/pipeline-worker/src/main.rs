//! Production pipeline worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pipeline_core::{Pipeline, PipelineConfig};
use pipeline_providers::{HeadlessMapClipProvider, HostedMotionClipProvider, MapProviderConfig, MotionProviderConfig};
use pipeline_queue::{JobQueue, ProgressChannel};
use pipeline_repo::{FirestoreClient, FirestoreConfig, FirestoreJobRepository};
use pipeline_storage::{BlobStoreConfig, S3Client};
use pipeline_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("pipeline=info".parse().unwrap()))
        .init();

    info!("Starting pipeline-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let blob_store_config = match BlobStoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load blob store config: {}", e);
            std::process::exit(1);
        }
    };
    let blob_store = match S3Client::new(blob_store_config).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create blob store client: {}", e);
            std::process::exit(1);
        }
    };

    let firestore_config = match FirestoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load Firestore config: {}", e);
            std::process::exit(1);
        }
    };
    let firestore_client = match FirestoreClient::new(firestore_config).await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create Firestore client: {}", e);
            std::process::exit(1);
        }
    };
    let repo = Arc::new(FirestoreJobRepository::new(firestore_client));

    let motion_provider = match HostedMotionClipProvider::new(MotionProviderConfig::from_env()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to create motion clip provider: {}", e);
            std::process::exit(1);
        }
    };

    let map_provider = match HeadlessMapClipProvider::new(MapProviderConfig::from_env()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to create map clip provider: {}", e);
            std::process::exit(1);
        }
    };

    let process_id = format!("pipeline-worker-{}", uuid::Uuid::new_v4());
    let pipeline = Pipeline::new(
        blob_store,
        repo,
        motion_provider,
        map_provider,
        PipelineConfig::from_env(),
        process_id,
        config.work_dir.clone(),
        config.motion_max_polls,
        config.motion_poll_interval,
    );

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let progress = match ProgressChannel::from_env() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create progress channel: {}", e);
            std::process::exit(1);
        }
    };

    let executor = JobExecutor::new(config, queue, progress, pipeline);

    let shutdown_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    shutdown_handle.await.ok();

    info!("Worker shutdown complete");
}
