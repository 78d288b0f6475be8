//! In-flight request registry and per-account / per-attachment ledgers

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::{AccountId, AttachmentId, DownloadRequest};

/// Requests currently handed to the transfer backend
#[derive(Debug, Default)]
pub struct RequestRegistry {
    in_flight: HashMap<AttachmentId, DownloadRequest>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatched request, replacing any stale entry for the id
    pub fn insert(&mut self, request: DownloadRequest) {
        debug!(attachment_id = request.attachment_id, "RequestRegistry::insert: called");
        self.in_flight.insert(request.attachment_id, request);
    }

    pub fn remove(&mut self, attachment_id: AttachmentId) -> Option<DownloadRequest> {
        self.in_flight.remove(&attachment_id)
    }

    pub fn get(&self, attachment_id: AttachmentId) -> Option<&DownloadRequest> {
        self.in_flight.get(&attachment_id)
    }

    pub fn get_mut(&mut self, attachment_id: AttachmentId) -> Option<&mut DownloadRequest> {
        self.in_flight.get_mut(&attachment_id)
    }

    pub fn contains(&self, attachment_id: AttachmentId) -> bool {
        self.in_flight.contains_key(&attachment_id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Number of in-flight downloads owned by an account
    pub fn count_for_account(&self, account_id: AccountId) -> usize {
        self.in_flight.values().filter(|r| r.account_id == account_id).count()
    }

    /// Ids of requests silent for longer than `timeout`
    pub fn stalled(&self, timeout: Duration, now: Instant) -> Vec<AttachmentId> {
        self.in_flight
            .values()
            .filter(|r| r.silence(now) > timeout)
            .map(|r| r.attachment_id)
            .collect()
    }

    /// Copies of the in-flight requests, oldest dispatch first
    pub fn snapshot(&self) -> Vec<DownloadRequest> {
        let mut requests: Vec<_> = self.in_flight.values().cloned().collect();
        requests.sort_by_key(|r| (r.started_at, r.attachment_id));
        requests
    }
}

/// Approximate attachment bytes stored per account
///
/// Only grows as downloads complete; deletions are not tracked, so the value
/// is a worst case until [`StorageLedger::set`] replaces it with an exact scan.
#[derive(Debug, Default)]
pub struct StorageLedger {
    usage: Mutex<HashMap<AccountId, u64>>,
}

impl StorageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: AccountId) -> Option<u64> {
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&account_id)
            .copied()
    }

    /// Account for a completed download
    pub fn add(&self, account_id: AccountId, bytes: u64) -> u64 {
        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let total = usage.entry(account_id).or_insert(0);
        *total = total.saturating_add(bytes);
        *total
    }

    /// Replace the estimate with an exact figure
    pub fn set(&self, account_id: AccountId, bytes: u64) {
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(account_id, bytes);
    }
}

/// Consecutive unsuccessful terminal callbacks per attachment
///
/// Kept in memory only: a restart grants a fresh retry budget.
#[derive(Debug, Default)]
pub struct FailureLedger {
    failures: Mutex<HashMap<AttachmentId, u32>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attachment_id: AttachmentId) -> Option<u32> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&attachment_id)
            .copied()
    }

    /// Clear the entry for a terminal callback, then reinstate it incremented
    /// unless the download succeeded. Returns the new count.
    pub fn settle(&self, attachment_id: AttachmentId, success: bool) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = failures.remove(&attachment_id).unwrap_or(0);
        if success {
            return 0;
        }
        let count = previous + 1;
        failures.insert(attachment_id, count);
        count
    }
}
