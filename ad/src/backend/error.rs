//! Transfer backend error types

use thiserror::Error;

use crate::domain::{AttachmentId, TransferStatus};

/// Errors raised while dispatching or running a transfer
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Http(u16),

    #[error("Attachment {0} has no location")]
    NoLocation(AttachmentId),

    #[error("Attachment {0} not found")]
    AttachmentNotFound(AttachmentId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Status reported to the completion sink for this failure
    pub fn status(&self) -> TransferStatus {
        match self {
            TransferError::Unreachable(_) | TransferError::Network(_) => TransferStatus::ConnectionError,
            TransferError::Http(404) | TransferError::Http(410) => TransferStatus::AttachmentNotFound,
            TransferError::Http(status) if *status >= 500 => TransferStatus::ConnectionError,
            TransferError::Http(_) => TransferStatus::Failed,
            TransferError::NoLocation(_) => TransferStatus::Unsupported,
            TransferError::AttachmentNotFound(_) => TransferStatus::AttachmentNotFound,
            TransferError::Io(_) => TransferStatus::Failed,
        }
    }
}
