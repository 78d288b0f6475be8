//! User-facing notifications raised by the scheduler

use tracing::warn;

use crate::domain::{AccountId, Attachment, AttachmentId};

/// Sink for events the user should hear about
pub trait Notifier: Send + Sync {
    /// An attachment needed to forward a message no longer exists on the server
    fn forward_download_failed(&self, attachment: &Attachment);

    /// A request exhausted its retries and was dropped
    fn download_abandoned(&self, attachment_id: AttachmentId, account_id: AccountId);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn forward_download_failed(&self, attachment: &Attachment) {
        warn!(
            attachment_id = attachment.id,
            message_id = attachment.message_id,
            account_id = attachment.account_id,
            file_name = attachment.file_name.as_deref().unwrap_or(""),
            "Forwarded attachment could not be downloaded"
        );
    }

    fn download_abandoned(&self, attachment_id: AttachmentId, account_id: AccountId) {
        warn!(attachment_id, account_id, "Download abandoned after repeated failures");
    }
}
