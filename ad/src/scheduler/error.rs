//! Scheduler error types

use thiserror::Error;

use crate::domain::AttachmentId;
use crate::store::StoreError;

/// Errors surfaced by the scheduling engine
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid request id: {0}")]
    InvalidRequestId(AttachmentId),

    #[error("Service already started")]
    AlreadyStarted,

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_convert() {
        fn lookup() -> Result<(), SchedulerError> {
            Err(StoreError::Unavailable("offline".to_string()))?
        }

        let err = lookup().unwrap_err();
        assert!(matches!(err, SchedulerError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.to_string(), "Record store error: Store unavailable: offline");
        assert_eq!(SchedulerError::InvalidRequestId(-1).to_string(), "Invalid request id: -1");
    }
}
