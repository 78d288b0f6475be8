//! attachd - background attachment download scheduler
//!
//! Downloads of message attachments are queued by urgency (explicit user
//! requests, then attachments of outgoing mail, then opportunistic prefetch),
//! admitted under global and per-account concurrency limits, retried with a
//! two-phase backoff on connection errors, and requeued by a watchdog when the
//! transfer backend stops reporting.
//!
//! # Modules
//!
//! - [`scheduler`] - queue, in-flight registry, admission loop, completion handling, watchdog
//! - [`domain`] - records, flags, priority classes, download requests
//! - [`store`] - record store boundary and the in-memory store
//! - [`backend`] - transfer backend boundary and the HTTP backend
//! - [`connectivity`], [`storage`], [`policy`], [`notifier`] - environment the scheduler consults
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod backend;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod domain;
pub mod notifier;
pub mod policy;
pub mod scheduler;
pub mod storage;
pub mod store;

pub use backend::{CompletionSink, HttpBackend, TransferBackend, TransferError};
pub use config::Config;
pub use connectivity::{Connectivity, NetworkClass, NetworkMonitor};
pub use domain::{Attachment, AttachmentFlags, AttachmentId, DownloadRequest, PriorityClass, TransferStatus};
pub use scheduler::{AttachmentService, Collaborators, SchedulerConfig, SchedulerError};
pub use store::{MemoryStore, RecordStore, Seed};
