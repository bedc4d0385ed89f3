//! Tests for Firestore client configuration and error classification.

use serial_test::serial;

use crate::client::FirestoreConfig;
use crate::error::FirestoreError;

#[test]
#[serial]
fn config_rejects_missing_project_id() {
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::remove_var("FIREBASE_PROJECT_ID");
    let result = FirestoreConfig::from_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn config_accepts_firebase_project_id() {
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::set_var("FIREBASE_PROJECT_ID", "firebase-project");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.project_id, "firebase-project");
    std::env::remove_var("FIREBASE_PROJECT_ID");
}

#[test]
#[serial]
fn config_prefers_gcp_project_id() {
    std::env::set_var("GCP_PROJECT_ID", "gcp-project");
    std::env::set_var("FIREBASE_PROJECT_ID", "firebase-project");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.project_id, "gcp-project");
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::remove_var("FIREBASE_PROJECT_ID");
}

#[test]
#[serial]
fn config_defaults_database_id() {
    std::env::set_var("GCP_PROJECT_ID", "gcp-project");
    std::env::remove_var("FIRESTORE_DATABASE_ID");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.database_id, "(default)");
    std::env::remove_var("GCP_PROJECT_ID");
}

#[test]
fn network_and_rate_limited_errors_are_retryable() {
    assert!(FirestoreError::RateLimited(2000).is_retryable());
    assert!(!FirestoreError::NotFound("doc".into()).is_retryable());
    assert!(!FirestoreError::AlreadyExists("doc".into()).is_retryable());
}

#[test]
fn precondition_failed_is_detected_from_message_or_variant() {
    assert!(FirestoreError::PreconditionFailed("stale".into()).is_precondition_failed());
    assert!(FirestoreError::RequestFailed("FAILED_PRECONDITION: stale write".into())
        .is_precondition_failed());
    assert!(!FirestoreError::NotFound("doc".into()).is_precondition_failed());
}
