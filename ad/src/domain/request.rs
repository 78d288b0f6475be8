//! Download request bookkeeping

use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::time::Instant;

use super::attachment::{AccountId, AttachmentId, MessageId};
use super::priority::PriorityClass;
use super::status::TransferStatus;

/// One pending or in-flight download of a single attachment
///
/// `enqueued_at` is the tiebreak inside a priority class and must not change
/// while the request sits in the queue; retries are expressed by building a
/// fresh copy via [`DownloadRequest::retry_copy`].
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub attachment_id: AttachmentId,
    pub account_id: AccountId,
    pub message_id: MessageId,
    pub priority: PriorityClass,
    enqueued_at: Instant,

    pub in_progress: bool,
    pub last_status: Option<TransferStatus>,
    pub last_progress: u8,
    /// Progress last written back to the record store
    pub persisted_progress: u8,
    pub last_callback_at: Option<Instant>,
    pub started_at: Option<Instant>,
    pub retry_count: u32,
    pub retry_not_before: Option<Instant>,
}

impl DownloadRequest {
    /// Create a request enqueued now
    pub fn new(attachment_id: AttachmentId, account_id: AccountId, message_id: MessageId, priority: PriorityClass) -> Self {
        Self::enqueued_at(attachment_id, account_id, message_id, priority, Instant::now())
    }

    /// Create a request with an explicit enqueue time
    pub fn enqueued_at(
        attachment_id: AttachmentId,
        account_id: AccountId,
        message_id: MessageId,
        priority: PriorityClass,
        enqueued_at: Instant,
    ) -> Self {
        Self {
            attachment_id,
            account_id,
            message_id,
            priority,
            enqueued_at,
            in_progress: false,
            last_status: None,
            last_progress: 0,
            persisted_progress: 0,
            last_callback_at: None,
            started_at: None,
            retry_count: 0,
            retry_not_before: None,
        }
    }

    /// Copy of this request with a fresh enqueue time, so it sorts behind every
    /// request of its class that was already waiting.
    pub fn retry_copy(&self) -> Self {
        let now = Instant::now();
        let enqueued_at = if now > self.enqueued_at {
            now
        } else {
            self.enqueued_at + Duration::from_nanos(1)
        };
        Self {
            enqueued_at,
            ..self.clone()
        }
    }

    pub fn enqueue_time(&self) -> Instant {
        self.enqueued_at
    }

    /// Anything other than an explicit user request runs as a background transfer
    pub fn is_background(&self) -> bool {
        self.priority != PriorityClass::Foreground
    }

    /// Mark the request as handed to the backend
    pub fn mark_dispatched(&mut self, now: Instant) {
        self.in_progress = true;
        self.started_at = Some(now);
        self.last_callback_at = Some(now);
    }

    /// Time since the last sign of life from the backend
    pub fn silence(&self, now: Instant) -> Duration {
        let last = self.last_callback_at.or(self.started_at).unwrap_or(self.enqueued_at);
        now.saturating_duration_since(last)
    }

    /// Still waiting out a retry delay
    pub fn is_deferred(&self, now: Instant) -> bool {
        self.retry_not_before.is_some_and(|not_before| not_before > now)
    }
}

impl PartialEq for DownloadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.attachment_id == other.attachment_id
    }
}

impl Eq for DownloadRequest {}

impl Hash for DownloadRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.attachment_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_attachment_id() {
        let a = DownloadRequest::new(5, 1, 50, PriorityClass::Foreground);
        let mut b = DownloadRequest::new(5, 2, 51, PriorityClass::Background);
        b.retry_count = 3;

        assert_eq!(a, b);
        assert_ne!(a, DownloadRequest::new(6, 1, 50, PriorityClass::Foreground));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_copy_keeps_state_with_later_time() {
        let mut original = DownloadRequest::new(9, 1, 90, PriorityClass::SendMail);
        original.retry_count = 2;
        original.last_progress = 40;
        original.in_progress = true;

        // Clock is paused, so `now` equals the original enqueue time
        let copy = original.retry_copy();

        assert!(copy.enqueue_time() > original.enqueue_time());
        assert_eq!(copy.retry_count, 2);
        assert_eq!(copy.last_progress, 40);
        assert_eq!(copy.priority, PriorityClass::SendMail);
        assert_eq!(copy, original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_and_deferral() {
        let mut req = DownloadRequest::new(1, 1, 10, PriorityClass::Foreground);
        let start = Instant::now();
        req.mark_dispatched(start);
        assert!(req.in_progress);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(req.silence(Instant::now()), Duration::from_secs(12));

        req.retry_not_before = Some(Instant::now() + Duration::from_secs(5));
        assert!(req.is_deferred(Instant::now()));
        assert!(!req.is_deferred(Instant::now() + Duration::from_secs(6)));
    }

    #[test]
    fn test_background_flag() {
        assert!(!DownloadRequest::new(1, 1, 1, PriorityClass::Foreground).is_background());
        assert!(DownloadRequest::new(1, 1, 1, PriorityClass::SendMail).is_background());
    }
}
