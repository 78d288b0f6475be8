//! Status codes reported by the transfer backend

use serde::{Deserialize, Serialize};

/// Status carried by a backend callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    /// Progress report; not terminal
    InProgress,
    Success,
    /// Transient network failure
    ConnectionError,
    /// The attachment itself is gone on the server
    AttachmentNotFound,
    /// The parent message could not be found
    MessageNotFound,
    /// Disallowed by account policy
    PolicyViolation,
    /// The backend cannot fetch this kind of attachment
    Unsupported,
    /// Any other failure
    Failed,
}

impl TransferStatus {
    /// Whether this status ends the transfer
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in-progress"),
            Self::Success => write!(f, "success"),
            Self::ConnectionError => write!(f, "connection-error"),
            Self::AttachmentNotFound => write!(f, "attachment-not-found"),
            Self::MessageNotFound => write!(f, "message-not-found"),
            Self::PolicyViolation => write!(f, "policy-violation"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
