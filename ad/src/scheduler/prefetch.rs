//! Opportunistic background downloads

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connectivity::NetworkClass;
use crate::domain::{Account, DownloadRequest, PriorityClass};

use super::core::AttachmentService;

impl AttachmentService {
    /// Admit at most one not-yet-requested attachment
    pub(super) async fn prefetch(&self) {
        let in_flight = self.registry.lock().await.len();
        // Keep one slot free for a foreground request that has not arrived yet
        if self.config.max_concurrent.saturating_sub(in_flight) < 2 {
            return;
        }
        if self.connectivity.network() != NetworkClass::Unmetered || !self.connectivity.auto_sync_allowed() {
            return;
        }
        debug!(in_flight, "AttachmentService::prefetch: called");

        let candidates = match self.store.prefetch_candidates(self.config.prefetch_candidates).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "AttachmentService::prefetch: candidate query failed");
                return;
            }
        };

        for attachment in candidates {
            if self.is_stopped() {
                return;
            }
            let id = attachment.id;

            let account = match self.store.account(attachment.account_id).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    info!(attachment_id = id, account_id = attachment.account_id, "AttachmentService::prefetch: deleting orphan");
                    if let Err(e) = self.store.delete_attachment(id).await {
                        warn!(attachment_id = id, error = %e, "AttachmentService::prefetch: orphan delete failed");
                    }
                    continue;
                }
                Err(e) => {
                    warn!(attachment_id = id, error = %e, "AttachmentService::prefetch: account lookup failed");
                    continue;
                }
            };

            if !self.policy.is_eligible(&attachment) {
                warn!(attachment_id = id, "AttachmentService::prefetch: skipping ineligible attachment");
                continue;
            }
            if self
                .failures
                .get(id)
                .is_some_and(|count| count > self.config.max_download_retries)
            {
                debug!(attachment_id = id, "AttachmentService::prefetch: too many failures");
                continue;
            }
            if self.queue.contains(id) {
                continue;
            }
            if !attachment.is_inline() && !self.can_prefetch_for_account(&account).await {
                continue;
            }

            let request = DownloadRequest::new(id, attachment.account_id, attachment.message_id, PriorityClass::Background);
            if self.try_start_download(request).await {
                break;
            }
        }
    }

    /// Whether the account's preference and storage budget allow a prefetch
    pub async fn can_prefetch_for_account(&self, account: &Account) -> bool {
        if !account.background_attachments {
            return false;
        }

        let (total, available) = match (self.storage.total_bytes(), self.storage.available_bytes()) {
            (Ok(total), Ok(available)) => (total, available),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "AttachmentService::can_prefetch_for_account: storage query failed");
                return false;
            }
        };
        let min_available = (total as f64 * self.config.prefetch_min_free_ratio) as u64;
        if available < min_available {
            debug!(available, min_available, "AttachmentService::can_prefetch_for_account: storage low");
            return false;
        }

        let accounts = match self.store.account_count().await {
            Ok(count) => count.max(1),
            Err(e) => {
                warn!(error = %e, "AttachmentService::can_prefetch_for_account: account count failed");
                return false;
            }
        };
        let share = (total as f64 * self.config.prefetch_max_storage_ratio / accounts as f64) as u64;

        let usage = match self.storage_ledger.get(account.id) {
            Some(usage) if usage <= share => usage,
            _ => match self.storage.account_usage(account.id) {
                Ok(usage) => {
                    self.storage_ledger.set(account.id, usage);
                    usage
                }
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "AttachmentService::can_prefetch_for_account: scan failed");
                    return false;
                }
            },
        };

        if usage >= share {
            debug!(account_id = account.id, usage, share, "AttachmentService::can_prefetch_for_account: share used up");
            return false;
        }
        true
    }

    /// Dispatch a request unless it is already in flight or its account is busy
    async fn try_start_download(&self, mut request: DownloadRequest) -> bool {
        let id = request.attachment_id;
        {
            let mut registry = self.registry.lock().await;
            if registry.contains(id) {
                return false;
            }
            if registry.count_for_account(request.account_id) >= self.config.max_per_account {
                debug!(attachment_id = id, account_id = request.account_id, "AttachmentService::try_start_download: account busy");
                return false;
            }
            request.mark_dispatched(Instant::now());
            registry.insert(request.clone());
        }
        info!(attachment_id = id, "AttachmentService::try_start_download: prefetching");
        self.start_download(&request).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Attachment;
    use crate::scheduler::SchedulerConfig;
    use crate::scheduler::testing::Harness;
    use crate::store::RecordStore;

    const GIB: u64 = 1 << 30;

    fn account(id: i64, background: bool) -> Account {
        Account {
            id,
            background_attachments: background,
        }
    }

    async fn prefetch_harness(total: u64, available: u64) -> Harness {
        let h = Harness::new(SchedulerConfig::default()).await;
        h.storage.set(total, available);
        h.store.insert_account(account(1, true)).await;
        h
    }

    #[tokio::test]
    async fn test_prefetches_newest_candidate_only() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        for id in 1..=3 {
            h.store.insert_attachment(Attachment::new(id, 10, 1)).await;
        }

        h.service.process_queue().await;

        let calls = h.backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].attachment_id, 3);
        assert!(calls[0].background);
        assert_eq!(h.service.in_flight(3).await.unwrap().priority, PriorityClass::Background);
    }

    #[tokio::test]
    async fn test_prefetch_respects_per_account_limit() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent = 3;
        let h = Harness::new(config).await;
        h.storage.set(100 * GIB, 80 * GIB);
        h.store.insert_account(account(1, true)).await;
        h.store.insert_account(account(2, true)).await;
        h.add_attachment(Attachment::new(1, 10, 1).with_flags(crate::domain::AttachmentFlags::DOWNLOAD_USER_REQUEST))
            .await;
        h.store.insert_attachment(Attachment::new(2, 20, 2)).await;
        h.store.insert_attachment(Attachment::new(3, 30, 1)).await;

        h.service.process_queue().await;

        // Candidate 3 is newest but account 1 already has a transfer
        let started: Vec<_> = h.backend.calls().iter().map(|c| c.attachment_id).collect();
        assert_eq!(started, vec![1, 2]);
        assert!(h.service.in_flight(3).await.is_none());
        assert_eq!(h.service.in_flight_count().await, 2);
    }

    #[tokio::test]
    async fn test_no_prefetch_on_metered_network() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.network.set_network(NetworkClass::Metered);
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;

        h.service.process_queue().await;
        assert!(h.backend.calls().is_empty());

        h.network.set_network(NetworkClass::Unmetered);
        h.network.set_auto_sync(false);
        h.service.process_queue().await;
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_prefetch_without_spare_slot() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.store.insert_account(account(2, true)).await;
        h.add_attachment(Attachment::new(1, 10, 2).with_flags(crate::domain::AttachmentFlags::DOWNLOAD_USER_REQUEST))
            .await;
        h.store.insert_attachment(Attachment::new(2, 20, 1)).await;

        // One download in flight leaves a single slot, reserved for foreground work
        h.service.process_queue().await;
        let started: Vec<_> = h.backend.calls().iter().map(|c| c.attachment_id).collect();
        assert_eq!(started, vec![1]);
    }

    #[tokio::test]
    async fn test_orphans_deleted_and_ineligible_skipped() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;
        h.store.insert_attachment(Attachment::new(2, 10, 1)).await;
        h.store.insert_attachment(Attachment::new(3, 30, 7)).await;
        h.policy.block(2);

        h.service.process_queue().await;

        assert!(h.store.attachment(3).await.unwrap().is_none());
        assert!(h.store.attachment(2).await.unwrap().is_some());
        let started: Vec<_> = h.backend.calls().iter().map(|c| c.attachment_id).collect();
        assert_eq!(started, vec![1]);
    }

    #[tokio::test]
    async fn test_repeated_failures_skip_candidate() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;
        h.store.insert_attachment(Attachment::new(2, 20, 1)).await;
        for _ in 0..6 {
            h.service.failures.settle(2, false);
        }

        h.service.process_queue().await;

        let started: Vec<_> = h.backend.calls().iter().map(|c| c.attachment_id).collect();
        assert_eq!(started, vec![1]);
    }

    #[tokio::test]
    async fn test_account_preference_and_inline_override() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.store.insert_account(account(1, false)).await;
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;

        h.service.process_queue().await;
        assert!(h.backend.calls().is_empty());

        let mut inline = Attachment::new(2, 10, 1);
        inline.content_id = Some("logo@example".to_string());
        h.store.insert_attachment(inline).await;
        h.service.process_queue().await;
        let started: Vec<_> = h.backend.calls().iter().map(|c| c.attachment_id).collect();
        assert_eq!(started, vec![2]);
    }

    #[tokio::test]
    async fn test_low_free_storage_blocks_prefetch() {
        let h = prefetch_harness(100 * GIB, 20 * GIB).await;
        assert!(!h.service.can_prefetch_for_account(&account(1, true)).await);
    }

    #[tokio::test]
    async fn test_share_uses_ledger_then_exact_scan() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.store.insert_account(account(2, true)).await;
        // Two accounts split 25 GiB: 12.5 GiB each
        let acct = account(1, true);

        h.service.storage_ledger().set(1, 0);
        assert!(h.service.can_prefetch_for_account(&acct).await);
        assert_eq!(h.storage.scans(), 0);

        // Ledger over the share triggers an exact scan that corrects it
        h.service.storage_ledger().set(1, 13 * GIB);
        h.storage.set_usage(1, GIB);
        assert!(h.service.can_prefetch_for_account(&acct).await);
        assert_eq!(h.storage.scans(), 1);
        assert_eq!(h.service.storage_ledger().get(1), Some(GIB));

        h.service.storage_ledger().set(1, 20 * GIB);
        h.storage.set_usage(1, 13 * GIB);
        assert!(!h.service.can_prefetch_for_account(&acct).await);
        assert_eq!(h.service.storage_ledger().get(1), Some(13 * GIB));
    }

    #[tokio::test]
    async fn test_missing_ledger_entry_is_scanned() {
        let h = prefetch_harness(100 * GIB, 80 * GIB).await;
        h.storage.set_usage(1, 30 * GIB);
        assert!(!h.service.can_prefetch_for_account(&account(1, true)).await);
        assert_eq!(h.storage.scans(), 1);
        assert_eq!(h.service.storage_ledger().get(1), Some(30 * GIB));
    }
}
