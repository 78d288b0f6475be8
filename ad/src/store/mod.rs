//! Record store boundary
//!
//! Attachment, message and account metadata lives outside the scheduler. The
//! engine reads and updates it through [`RecordStore`]; [`MemoryStore`] is the
//! in-process implementation used by the CLI and the tests.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Account, AccountId, Attachment, AttachmentId, AttachmentUpdate, Message, MessageId};

pub use memory::{MemoryStore, Seed};

/// Errors from record store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),
}

/// Response from store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Access to persisted attachment metadata
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn attachment(&self, id: AttachmentId) -> StoreResult<Option<Attachment>>;

    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>>;

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn account_count(&self) -> StoreResult<usize>;

    async fn update_attachment(&self, id: AttachmentId, update: AttachmentUpdate) -> StoreResult<()>;

    async fn delete_attachment(&self, id: AttachmentId) -> StoreResult<()>;

    /// Records carrying a download-pending flag
    async fn pending_attachments(&self) -> StoreResult<Vec<Attachment>>;

    /// Newest not-yet-downloaded records that nobody asked for, newest first
    async fn prefetch_candidates(&self, limit: usize) -> StoreResult<Vec<Attachment>>;

    /// Whether any attachment of the message is still not downloaded
    async fn has_unloaded_attachments(&self, message_id: MessageId) -> StoreResult<bool>;
}
