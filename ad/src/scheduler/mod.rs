//! Attachment download scheduling
//!
//! Pending requests wait in a [`DownloadQueue`] ordered by priority class and
//! age; [`AttachmentService`] admits them to the transfer backend under global
//! and per-account limits, consumes the backend's status callbacks, and runs a
//! watchdog that requeues downloads whose callbacks stopped arriving.

mod changes;
mod completion;
mod config;
mod core;
mod error;
mod prefetch;
mod queue;
mod registry;
mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::ServiceCallback;
pub use config::SchedulerConfig;
pub use core::{AttachmentService, Collaborators};
pub use error::SchedulerError;
pub use queue::DownloadQueue;
pub use registry::{FailureLedger, RequestRegistry, StorageLedger};
pub use watchdog::Watchdog;
