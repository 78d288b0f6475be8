//! Priority queue of pending download requests

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::{debug, error};

use crate::domain::{AttachmentId, DownloadRequest, PriorityClass};

use super::error::SchedulerError;

/// Sort key: priority class, then enqueue time, then id as the final tiebreak
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: PriorityClass,
    enqueued_at: Instant,
    attachment_id: AttachmentId,
}

impl QueueKey {
    fn of(request: &DownloadRequest) -> Self {
        Self {
            priority: request.priority,
            enqueued_at: request.enqueue_time(),
            attachment_id: request.attachment_id,
        }
    }
}

#[derive(Default)]
struct QueueInner {
    order: BTreeSet<QueueKey>,
    requests: HashMap<AttachmentId, DownloadRequest>,
}

/// Pending requests ordered by urgency, indexed by attachment id
///
/// The ordered set and the id index live behind one lock, so every operation
/// sees them in agreement. There is no iterator; [`snapshot`]
/// hands out copies for display only.
///
/// [`snapshot`]: DownloadQueue::snapshot
#[derive(Default)]
pub struct DownloadQueue {
    inner: Mutex<QueueInner>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // Every critical section leaves both structures consistent, so a
        // poisoned lock still guards valid data.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a request unless one with the same id is already queued.
    ///
    /// Returns `Ok(true)` if inserted and `Ok(false)` if the id was present, in
    /// which case the queued request (and its enqueue time) is kept.
    pub fn add(&self, request: DownloadRequest) -> Result<bool, SchedulerError> {
        let id = request.attachment_id;
        if id < 0 {
            error!(attachment_id = id, "DownloadQueue::add: invalid id");
            return Err(SchedulerError::InvalidRequestId(id));
        }

        let mut inner = self.lock();
        if inner.requests.contains_key(&id) {
            debug!(attachment_id = id, "DownloadQueue::add: already queued");
            return Ok(false);
        }
        inner.order.insert(QueueKey::of(&request));
        inner.requests.insert(id, request);
        Ok(true)
    }

    /// Remove the request with this id, returning it if it was queued
    pub fn remove(&self, attachment_id: AttachmentId) -> Option<DownloadRequest> {
        let mut inner = self.lock();
        let request = inner.requests.remove(&attachment_id)?;
        inner.order.remove(&QueueKey::of(&request));
        Some(request)
    }

    /// Remove and return the most urgent request
    pub fn pop_next(&self) -> Option<DownloadRequest> {
        let mut inner = self.lock();
        let key = inner.order.pop_first()?;
        inner.requests.remove(&key.attachment_id)
    }

    /// Copy of the queued request with this id
    pub fn find_by_id(&self, attachment_id: AttachmentId) -> Option<DownloadRequest> {
        if attachment_id < 0 {
            return None;
        }
        self.lock().requests.get(&attachment_id).cloned()
    }

    pub fn contains(&self, attachment_id: AttachmentId) -> bool {
        self.lock().requests.contains_key(&attachment_id)
    }

    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().requests.is_empty()
    }

    /// Queued requests in pop order, copied
    pub fn snapshot(&self) -> Vec<DownloadRequest> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|key| inner.requests.get(&key.attachment_id).cloned())
            .collect()
    }
}
