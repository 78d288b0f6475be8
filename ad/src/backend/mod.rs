//! Transfer backend boundary
//!
//! The backend moves the bytes; the scheduler only starts transfers and
//! consumes the status callbacks they emit.

mod error;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{AccountId, AttachmentId, MessageId, TransferStatus};

pub use error::TransferError;
pub use http::HttpBackend;

/// Receiver of transfer status callbacks
///
/// A transfer reports zero or more `InProgress` callbacks followed by exactly
/// one terminal status. Callbacks may arrive late, out of order across
/// attachments, or for transfers the scheduler has already given up on.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn on_status(&self, message_id: MessageId, attachment_id: AttachmentId, status: TransferStatus, progress: u8);
}

/// Something that can fetch attachment bytes
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Begin a transfer. Returning `Ok` promises a terminal callback on `sink`.
    async fn start_transfer(
        &self,
        sink: Arc<dyn CompletionSink>,
        account_id: AccountId,
        attachment_id: AttachmentId,
        background: bool,
    ) -> Result<(), TransferError>;

    /// Ask the account's outbox to send messages that were waiting on downloads
    async fn send_pending_mail(&self, account_id: AccountId) -> Result<(), TransferError> {
        info!(account_id, "TransferBackend::send_pending_mail: no outbox attached");
        Ok(())
    }
}
