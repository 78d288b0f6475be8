//! In-order delivery of record change notifications

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{AttachmentFlags, AttachmentId};

use super::core::AttachmentService;

#[derive(Debug)]
pub(super) enum Change {
    Record {
        attachment_id: AttachmentId,
        flags: AttachmentFlags,
    },
    Shutdown,
}

/// FIFO of change notifications drained by a single worker
pub(super) struct ChangeFeed {
    tx: mpsc::UnboundedSender<Change>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Change>>>,
}

impl ChangeFeed {
    pub(super) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// The receiving end, handed out once
    pub(super) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Change>> {
        self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }

    fn send(&self, change: Change) {
        // The receiver is only dropped once the worker has exited
        if self.tx.send(change).is_err() {
            debug!("ChangeFeed::send: worker gone, dropping change");
        }
    }

    pub(super) fn shutdown(&self) {
        self.send(Change::Shutdown);
    }
}

impl AttachmentService {
    /// Report that an attachment record was inserted or updated.
    ///
    /// Callable from any task; never blocks and never fails. Notifications
    /// are applied in the order they were made.
    pub fn notify_changed(&self, attachment_id: AttachmentId, flags: AttachmentFlags) {
        debug!(attachment_id, flags = flags.bits(), "AttachmentService::notify_changed: called");
        if self.is_stopped() {
            return;
        }
        self.changes.send(Change::Record { attachment_id, flags });
    }

    pub(super) async fn run_change_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Change>) {
        info!("AttachmentService: change worker started");
        while let Some(change) = rx.recv().await {
            match change {
                Change::Shutdown => break,
                Change::Record { attachment_id, flags } => self.apply_change(attachment_id, flags).await,
            }
        }
        info!("AttachmentService: change worker exiting");
    }

    async fn apply_change(&self, attachment_id: AttachmentId, flags: AttachmentFlags) {
        match self.store.attachment(attachment_id).await {
            Ok(Some(mut attachment)) => {
                attachment.flags = flags;
                self.on_change(&attachment).await;
            }
            Ok(None) => debug!(attachment_id, "AttachmentService::apply_change: record gone"),
            Err(e) => warn!(attachment_id, error = %e, "AttachmentService::apply_change: lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Attachment;
    use crate::scheduler::SchedulerConfig;
    use crate::scheduler::testing::Harness;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notifications_are_applied_in_order() {
        let h = Harness::new(SchedulerConfig::default()).await;
        h.network.set_network(crate::connectivity::NetworkClass::None);
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;
        h.store.insert_attachment(Attachment::new(2, 20, 1)).await;
        let handle = h.service.start().unwrap();

        h.service.notify_changed(2, AttachmentFlags::DOWNLOAD_FORWARD);
        h.service.notify_changed(1, AttachmentFlags::DOWNLOAD_USER_REQUEST);
        h.service.notify_changed(2, AttachmentFlags::empty());
        h.service.notify_changed(99, AttachmentFlags::DOWNLOAD_USER_REQUEST);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !(h.service.queue().contains(1) && !h.service.queue().contains(2)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.service.queue().len(), 1);

        h.service.stop();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_notify_after_stop_is_dropped() {
        let h = Harness::new(SchedulerConfig::default()).await;
        h.store.insert_attachment(Attachment::new(1, 10, 1)).await;
        h.service.stop();
        h.service.notify_changed(1, AttachmentFlags::DOWNLOAD_USER_REQUEST);
        assert!(h.service.queue().is_empty());
    }
}
