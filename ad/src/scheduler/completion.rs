//! Consumption of backend status callbacks

use std::sync::Weak;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::CompletionSink;
use crate::domain::{Attachment, AttachmentFlags, AttachmentId, AttachmentUpdate, DownloadRequest, MessageId, TransferStatus, UiState};

use super::core::AttachmentService;

/// Progress is written back to the record store in steps of this many percent
const PROGRESS_PERSIST_STEP: u8 = 10;

/// Completion sink handed to the backend; outlives nothing it points at
pub struct ServiceCallback {
    service: Weak<AttachmentService>,
}

impl ServiceCallback {
    pub fn new(service: Weak<AttachmentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CompletionSink for ServiceCallback {
    async fn on_status(&self, message_id: MessageId, attachment_id: AttachmentId, status: TransferStatus, progress: u8) {
        match self.service.upgrade() {
            Some(service) => service.handle_status(message_id, attachment_id, status, progress).await,
            None => debug!(attachment_id, %status, "ServiceCallback::on_status: service gone"),
        }
    }
}

enum ConnectionRetry {
    Abandoned(DownloadRequest),
    Delayed,
    Immediate,
}

impl AttachmentService {
    /// Apply one backend callback
    pub async fn handle_status(&self, message_id: MessageId, attachment_id: AttachmentId, status: TransferStatus, progress: u8) {
        debug!(message_id, attachment_id, %status, progress, "AttachmentService::handle_status: called");

        let persist = {
            let mut registry = self.registry.lock().await;
            let Some(request) = registry.get_mut(attachment_id) else {
                debug!(attachment_id, %status, "AttachmentService::handle_status: not in flight, ignoring");
                return;
            };
            request.last_status = Some(status);
            request.last_callback_at = Some(Instant::now());
            if status.is_terminal() {
                None
            } else {
                request.last_progress = progress;
                if progress >= request.persisted_progress.saturating_add(PROGRESS_PERSIST_STEP) {
                    request.persisted_progress = progress;
                    Some(progress)
                } else {
                    None
                }
            }
        };

        if status.is_terminal() {
            self.end_download(attachment_id, status).await;
        } else if let Some(progress) = persist {
            self.persist_progress(attachment_id, progress).await;
        }
    }

    async fn persist_progress(&self, attachment_id: AttachmentId, progress: u8) {
        let size = match self.store.attachment(attachment_id).await {
            Ok(Some(attachment)) => attachment.size,
            Ok(None) => return,
            Err(e) => {
                warn!(attachment_id, error = %e, "AttachmentService::persist_progress: lookup failed");
                return;
            }
        };
        if let Err(e) = self
            .store
            .update_attachment(attachment_id, AttachmentUpdate::progress(size, progress))
            .await
        {
            warn!(attachment_id, error = %e, "AttachmentService::persist_progress: update failed");
        }
    }

    /// Settle a terminal callback
    async fn end_download(&self, attachment_id: AttachmentId, status: TransferStatus) {
        debug!(attachment_id, %status, "AttachmentService::end_download: called");

        let request = {
            let mut registry = self.registry.lock().await;
            let Some(mut request) = registry.remove(attachment_id) else {
                return;
            };
            request.in_progress = false;
            let failures = self.failures.settle(attachment_id, status == TransferStatus::Success);
            debug!(attachment_id, failures, "AttachmentService::end_download: failure ledger settled");

            if status == TransferStatus::ConnectionError {
                let outcome = self.retry_after_connection_error(request);
                drop(registry);
                match outcome {
                    ConnectionRetry::Abandoned(request) => {
                        self.abandon(&request);
                        self.kick();
                    }
                    ConnectionRetry::Delayed => self
                        .watchdog
                        .arm(self.config.connection_retry_delay(), self.config.callback_timeout()),
                    ConnectionRetry::Immediate => self.kick(),
                }
                return;
            }

            self.queue.remove(attachment_id);
            request
        };

        let attachment = match self.store.attachment(attachment_id).await {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!(attachment_id, error = %e, "AttachmentService::end_download: lookup failed");
                self.kick();
                return;
            }
        };

        let mut deleted = false;
        match status {
            TransferStatus::MessageNotFound => match self.store.message(request.message_id).await {
                Ok(Some(_)) => {
                    // Parent exists, the backend lost a race with a sync
                    debug!(attachment_id, "AttachmentService::end_download: parent present, retrying");
                    let abandoned = {
                        let _registry = self.registry.lock().await;
                        self.requeue_for_retry(request)
                    };
                    if let Some(request) = abandoned {
                        self.abandon(&request);
                    }
                    self.kick();
                    return;
                }
                Ok(None) => {
                    info!(attachment_id, "AttachmentService::end_download: parent message gone, deleting");
                    deleted = self.delete_record(attachment_id).await;
                }
                Err(e) => {
                    warn!(attachment_id, error = %e, "AttachmentService::end_download: parent lookup failed");
                }
            },
            TransferStatus::AttachmentNotFound if attachment.as_ref().is_some_and(is_forwarded) => {
                if let Some(attachment) = &attachment {
                    info!(attachment_id, "AttachmentService::end_download: forwarded attachment gone, deleting");
                    deleted = self.delete_record(attachment_id).await;
                    self.notifier.forward_download_failed(attachment);
                }
            }
            _ => {}
        }

        if !deleted && let Some(attachment) = &attachment {
            self.finish_record(attachment, status).await;
        }

        if let Some(attachment) = &attachment
            && is_forwarded(attachment)
            && (status == TransferStatus::Success || deleted)
        {
            self.send_if_complete(attachment).await;
        }

        self.kick();
    }

    /// Two-phase connection-error policy. Called with the registry lock held.
    fn retry_after_connection_error(&self, mut request: DownloadRequest) -> ConnectionRetry {
        let id = request.attachment_id;
        request.retry_count += 1;

        if request.retry_count > self.config.connection_max_retries {
            self.queue.remove(id);
            return ConnectionRetry::Abandoned(request);
        }

        let outcome = if request.retry_count > self.config.connection_delay_threshold {
            info!(attachment_id = id, retry_count = request.retry_count, "AttachmentService: connection error, retrying after delay");
            request.retry_not_before = Some(Instant::now() + self.config.connection_retry_delay());
            ConnectionRetry::Delayed
        } else {
            info!(attachment_id = id, retry_count = request.retry_count, "AttachmentService: connection error, retrying now");
            request.retry_not_before = None;
            ConnectionRetry::Immediate
        };

        self.queue.remove(id);
        if let Err(e) = self.queue.add(request) {
            warn!(attachment_id = id, error = %e, "AttachmentService: failed to requeue");
        }
        outcome
    }

    async fn finish_record(&self, attachment: &Attachment, status: TransferStatus) {
        let update = if status == TransferStatus::Success {
            let total = self.storage_ledger.add(attachment.account_id, attachment.size);
            debug!(account_id = attachment.account_id, total, "AttachmentService::finish_record: storage ledger updated");
            AttachmentUpdate {
                downloaded_size: Some(attachment.size),
                ..AttachmentUpdate::finished(attachment.flags, UiState::Saved)
            }
        } else {
            info!(attachment_id = attachment.id, %status, "AttachmentService::finish_record: download failed");
            AttachmentUpdate::finished(attachment.flags, UiState::Failed)
        };

        if let Err(e) = self.store.update_attachment(attachment.id, update).await {
            warn!(attachment_id = attachment.id, error = %e, "AttachmentService::finish_record: update failed");
        }
    }

    async fn delete_record(&self, attachment_id: AttachmentId) -> bool {
        match self.store.delete_attachment(attachment_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(attachment_id, error = %e, "AttachmentService::delete_record: failed");
                false
            }
        }
    }

    /// Send the parent message once none of its attachments is still missing
    async fn send_if_complete(&self, attachment: &Attachment) {
        match self.store.has_unloaded_attachments(attachment.message_id).await {
            Ok(true) => {
                debug!(message_id = attachment.message_id, "AttachmentService::send_if_complete: still waiting")
            }
            Ok(false) => {
                info!(
                    message_id = attachment.message_id,
                    account_id = attachment.account_id,
                    "AttachmentService::send_if_complete: sending pending mail"
                );
                if let Err(e) = self.backend.send_pending_mail(attachment.account_id).await {
                    warn!(account_id = attachment.account_id, error = %e, "AttachmentService::send_if_complete: failed");
                }
            }
            Err(e) => {
                warn!(message_id = attachment.message_id, error = %e, "AttachmentService::send_if_complete: lookup failed")
            }
        }
    }
}

fn is_forwarded(attachment: &Attachment) -> bool {
    attachment.flags.contains(AttachmentFlags::DOWNLOAD_FORWARD)
}
