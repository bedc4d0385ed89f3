//! Persistent row backing the second layer of ListingLock's two-layer mutex.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A persisted, cluster-visible lock on a listing.
///
/// At most one non-expired row may exist per `listing_id`; enforcement is the
/// repository's job (a transactional check-then-create), not this type's.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListingLock {
    pub listing_id: String,
    pub job_id: String,
    pub process_id: String,
    pub expires_at: DateTime<Utc>,
}

impl ListingLock {
    /// Default lock lease, per `LOCK_TIMEOUT_MS`.
    pub const DEFAULT_TIMEOUT_MS: i64 = 30 * 60 * 1000;

    pub fn new(listing_id: impl Into<String>, job_id: impl Into<String>, process_id: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            job_id: job_id.into(),
            process_id: process_id.into(),
            expires_at: Utc::now() + chrono::Duration::milliseconds(Self::DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Matches the tuple `(listing_id, job_id, process_id)` used by Release.
    pub fn matches(&self, listing_id: &str, job_id: &str, process_id: &str) -> bool {
        self.listing_id == listing_id && self.job_id == job_id && self.process_id == process_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lock_is_not_expired() {
        let lock = ListingLock::new("listing-1", "job-1", "proc-1");
        assert!(!lock.is_expired());
    }

    #[test]
    fn matches_exact_tuple_only() {
        let lock = ListingLock::new("listing-1", "job-1", "proc-1");
        assert!(lock.matches("listing-1", "job-1", "proc-1"));
        assert!(!lock.matches("listing-1", "job-2", "proc-1"));
    }
}
