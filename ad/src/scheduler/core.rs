//! Attachment download service: admission loop, change handling and lifecycle

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{CompletionSink, TransferBackend};
use crate::connectivity::Connectivity;
use crate::domain::{Attachment, AttachmentFlags, AttachmentId, AttachmentUpdate, DownloadRequest, PriorityClass, UiState};
use crate::notifier::Notifier;
use crate::policy::DownloadPolicy;
use crate::storage::StorageMonitor;
use crate::store::RecordStore;

use super::changes::ChangeFeed;
use super::completion::ServiceCallback;
use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::queue::DownloadQueue;
use super::registry::{FailureLedger, RequestRegistry, StorageLedger};
use super::watchdog::Watchdog;

/// External capabilities the service drives
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub backend: Arc<dyn TransferBackend>,
    pub connectivity: Arc<dyn Connectivity>,
    pub storage: Arc<dyn StorageMonitor>,
    pub policy: Arc<dyn DownloadPolicy>,
    pub notifier: Arc<dyn Notifier>,
}

/// The attachment download scheduler
///
/// Pending requests live in the [`DownloadQueue`], dispatched ones in the
/// [`RequestRegistry`]. An id moves between the two only while the registry
/// lock is held, so it is never live in both. Store lookups and backend calls
/// are made with the lock released.
///
/// Lock order is `pass` then `registry`. `pass` serializes admission passes
/// with change handling, so a request set aside during a pass cannot be
/// shadowed by a fresh one.
pub struct AttachmentService {
    pub(super) config: SchedulerConfig,
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) backend: Arc<dyn TransferBackend>,
    pub(super) connectivity: Arc<dyn Connectivity>,
    pub(super) storage: Arc<dyn StorageMonitor>,
    pub(super) policy: Arc<dyn DownloadPolicy>,
    pub(super) notifier: Arc<dyn Notifier>,

    pub(super) queue: DownloadQueue,
    pub(super) registry: Mutex<RequestRegistry>,
    pass: Mutex<()>,
    pub(super) storage_ledger: StorageLedger,
    pub(super) failures: FailureLedger,
    pub(super) watchdog: Watchdog,
    pub(super) changes: ChangeFeed,

    wake: Notify,
    stopped: AtomicBool,
    this: Weak<AttachmentService>,
}

impl AttachmentService {
    /// Create a service; nothing runs until [`AttachmentService::start`]
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Arc<Self> {
        debug!(?config, "AttachmentService::new: called");
        let Collaborators {
            store,
            backend,
            connectivity,
            storage,
            policy,
            notifier,
        } = collaborators;

        Arc::new_cyclic(|this| Self {
            config,
            store,
            backend,
            connectivity,
            storage,
            policy,
            notifier,
            queue: DownloadQueue::new(),
            registry: Mutex::new(RequestRegistry::new()),
            pass: Mutex::new(()),
            storage_ledger: StorageLedger::new(),
            failures: FailureLedger::new(),
            watchdog: Watchdog::new(this.clone()),
            changes: ChangeFeed::new(),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Spawn the change worker and the main loop.
    ///
    /// The returned handle completes once the service has stopped.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, SchedulerError> {
        info!("AttachmentService::start: called");
        let rx = self.changes.take_receiver().ok_or(SchedulerError::AlreadyStarted)?;

        let worker = tokio::spawn(Arc::clone(self).run_change_worker(rx));
        let service = Arc::clone(self);
        Ok(tokio::spawn(async move {
            service.run().await;
            if let Err(e) = worker.await {
                error!(error = %e, "AttachmentService: change worker failed");
            }
            info!("AttachmentService: stopped");
        }))
    }

    /// Stop the service after the current pass; no dispatch happens afterwards
    pub fn stop(&self) {
        info!("AttachmentService::stop: called");
        self.stopped.store(true, Ordering::SeqCst);
        self.watchdog.disarm();
        self.changes.shutdown();
        self.kick();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wake the main loop
    pub fn kick(&self) {
        self.wake.notify_one();
    }

    /// Main loop: rescan, then alternate admission passes with waits
    pub async fn run(self: Arc<Self>) {
        info!("AttachmentService::run: starting");
        self.rescan_logged().await;

        while !self.is_stopped() {
            if !self.connectivity.is_connected() {
                debug!("AttachmentService::run: waiting for connectivity");
                tokio::select! {
                    _ = self.connectivity.wait_for_connectivity() => {}
                    _ = self.wake.notified() => continue,
                }
            }

            self.process_queue().await;
            if self.is_stopped() {
                break;
            }

            if tokio::time::timeout(self.config.idle_wait(), self.wake.notified()).await.is_err() {
                debug!("AttachmentService::run: idle wait elapsed, rescanning");
                self.rescan_logged().await;
            }
        }
        info!("AttachmentService::run: exiting");
    }

    async fn rescan_logged(&self) {
        match self.rescan_pending().await {
            Ok(count) => debug!(count, "AttachmentService: rescan complete"),
            Err(e) => warn!(error = %e, "AttachmentService: rescan failed"),
        }
    }

    /// Feed every download-pending record back through [`Self::on_change`]
    pub async fn rescan_pending(&self) -> Result<usize, SchedulerError> {
        debug!("AttachmentService::rescan_pending: called");
        let pending = self.store.pending_attachments().await?;
        for attachment in &pending {
            self.on_change(attachment).await;
        }
        Ok(pending.len())
    }

    /// React to an inserted or updated record
    pub async fn on_change(&self, attachment: &Attachment) {
        let id = attachment.id;
        let priority = PriorityClass::for_flags(attachment.flags);
        debug!(attachment_id = id, ?priority, flags = attachment.flags.bits(), "AttachmentService::on_change: called");

        let mark_failed = {
            let _pass = self.pass.lock().await;
            let registry = self.registry.lock().await;
            match priority {
                None => {
                    if self.queue.remove(id).is_some() {
                        debug!(attachment_id = id, "AttachmentService::on_change: no longer pending, dequeued");
                    }
                    false
                }
                Some(_) if registry.contains(id) => {
                    debug!(attachment_id = id, "AttachmentService::on_change: already in flight");
                    false
                }
                Some(_) if self.queue.contains(id) => false,
                Some(priority) => {
                    let direct = attachment
                        .flags
                        .intersects(AttachmentFlags::DOWNLOAD_USER_REQUEST | AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD);
                    if direct && !self.policy.is_eligible(attachment) {
                        true
                    } else {
                        let request = DownloadRequest::new(id, attachment.account_id, attachment.message_id, priority);
                        if let Err(e) = self.queue.add(request) {
                            warn!(attachment_id = id, error = %e, "AttachmentService::on_change: rejected");
                        }
                        false
                    }
                }
            }
        };

        if mark_failed {
            self.mark_failed(attachment).await;
        }
        self.kick();
    }

    /// Clear the pending flags of a record that may not be downloaded
    async fn mark_failed(&self, attachment: &Attachment) {
        info!(attachment_id = attachment.id, "AttachmentService::mark_failed: blocked by policy");
        let update = AttachmentUpdate::finished(attachment.flags, UiState::Failed);
        if let Err(e) = self.store.update_attachment(attachment.id, update).await {
            warn!(attachment_id = attachment.id, error = %e, "AttachmentService::mark_failed: update failed");
        }
    }

    /// One admission pass: fill free slots from the queue, then try a prefetch
    pub async fn process_queue(&self) {
        let _pass = self.pass.lock().await;
        debug!(queued = self.queue.len(), "AttachmentService::process_queue: called");

        let mut deferred = Vec::new();
        loop {
            if self.is_stopped() {
                break;
            }

            let mut request = {
                let registry = self.registry.lock().await;
                if registry.len() >= self.config.max_concurrent {
                    break;
                }
                let Some(request) = self.queue.pop_next() else {
                    break;
                };
                if registry.count_for_account(request.account_id) >= self.config.max_per_account {
                    debug!(
                        attachment_id = request.attachment_id,
                        account_id = request.account_id,
                        "AttachmentService::process_queue: account busy"
                    );
                    deferred.push(request);
                    continue;
                }
                request
            };
            let id = request.attachment_id;

            // Popped and set aside; only `pass` is held across the lookup
            match self.store.attachment(id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(attachment_id = id, "AttachmentService::process_queue: record gone, dropping");
                    continue;
                }
                Err(e) => {
                    warn!(attachment_id = id, error = %e, "AttachmentService::process_queue: lookup failed");
                    deferred.push(request);
                    continue;
                }
            }

            let now = Instant::now();
            if let Some(not_before) = request.retry_not_before
                && not_before > now
            {
                let delay = not_before - now;
                debug!(attachment_id = id, ?delay, "AttachmentService::process_queue: retry not yet due");
                self.watchdog.arm(delay, self.config.callback_timeout());
                deferred.push(request);
                continue;
            }

            {
                let mut registry = self.registry.lock().await;
                if registry.len() >= self.config.max_concurrent
                    || registry.count_for_account(request.account_id) >= self.config.max_per_account
                {
                    deferred.push(request);
                    break;
                }
                request.mark_dispatched(now);
                registry.insert(request.clone());
            }
            if !self.start_download(&request).await {
                // Backend unreachable; let the watchdog retry later
                break;
            }
        }

        if !deferred.is_empty() {
            let registry = self.registry.lock().await;
            for request in deferred {
                if registry.contains(request.attachment_id) {
                    continue;
                }
                if let Err(e) = self.queue.add(request) {
                    error!(error = %e, "AttachmentService::process_queue: failed to restore request");
                }
            }
        }

        if !self.is_stopped() {
            self.prefetch().await;
        }
    }

    /// Hand a registered request to the backend.
    ///
    /// On a dispatch failure the request is cancelled back into the queue, the
    /// watchdog is armed for the retry delay and `false` is returned.
    pub(super) async fn start_download(&self, request: &DownloadRequest) -> bool {
        let id = request.attachment_id;
        info!(
            attachment_id = id,
            account_id = request.account_id,
            priority = %request.priority,
            retry_count = request.retry_count,
            "AttachmentService::start_download: dispatching"
        );
        let result = self
            .backend
            .start_transfer(self.completion_sink(), request.account_id, id, request.is_background())
            .await;

        match result {
            Ok(()) => {
                self.watchdog
                    .arm(self.config.watchdog_interval(), self.config.callback_timeout());
                true
            }
            Err(e) => {
                warn!(attachment_id = id, error = %e, "AttachmentService::start_download: dispatch failed");
                self.cancel_download(id).await;
                self.watchdog
                    .arm(self.config.connection_retry_delay(), self.config.callback_timeout());
                false
            }
        }
    }

    /// Pull an in-flight request back into the queue with a fresh enqueue time
    pub(super) async fn cancel_download(&self, attachment_id: AttachmentId) {
        debug!(attachment_id, "AttachmentService::cancel_download: called");
        let abandoned = {
            let mut registry = self.registry.lock().await;
            let Some(mut request) = registry.remove(attachment_id) else {
                return;
            };
            request.in_progress = false;
            self.requeue_for_retry(request)
        };
        if let Some(request) = abandoned {
            self.abandon(&request);
        }
    }

    /// Count a retry and re-add a copy of the request behind its class.
    ///
    /// Must be called with the registry lock held. Returns the request when it
    /// has exhausted its retries instead.
    pub(super) fn requeue_for_retry(&self, mut request: DownloadRequest) -> Option<DownloadRequest> {
        self.queue.remove(request.attachment_id);
        request.retry_count += 1;
        if request.retry_count > self.config.connection_max_retries {
            return Some(request);
        }

        debug!(
            attachment_id = request.attachment_id,
            retry_count = request.retry_count,
            "AttachmentService::requeue_for_retry: moving to end of queue"
        );
        if let Err(e) = self.queue.add(request.retry_copy()) {
            error!(error = %e, "AttachmentService::requeue_for_retry: failed");
        }
        None
    }

    pub(super) fn abandon(&self, request: &DownloadRequest) {
        warn!(
            attachment_id = request.attachment_id,
            retry_count = request.retry_count,
            "AttachmentService: too many failures, giving up"
        );
        self.notifier
            .download_abandoned(request.attachment_id, request.account_id);
    }

    /// Sink handed to the backend for status callbacks
    pub fn completion_sink(&self) -> Arc<dyn CompletionSink> {
        Arc::new(ServiceCallback::new(self.this.clone()))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn storage_ledger(&self) -> &StorageLedger {
        &self.storage_ledger
    }

    /// Consecutive unsuccessful downloads of an attachment
    pub fn failure_count(&self, attachment_id: AttachmentId) -> Option<u32> {
        self.failures.get(attachment_id)
    }

    /// Copy of the in-flight request for this id
    pub async fn in_flight(&self, attachment_id: AttachmentId) -> Option<DownloadRequest> {
        self.registry.lock().await.get(attachment_id).cloned()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Human-readable listing of queued and in-flight requests
    pub async fn dump(&self) -> String {
        let queued = self.queue.snapshot();
        let in_flight = self.registry.lock().await.snapshot();
        let now = Instant::now();
        let mut out = String::new();

        let _ = writeln!(out, "Queue, {} entries", queued.len());
        for request in &queued {
            let _ = writeln!(out, "  {}", self.describe(request, now).await);
        }

        let _ = writeln!(out, "In progress, {} entries", in_flight.len());
        for request in &in_flight {
            let mut line = self.describe(request, now).await;
            let status = request.last_status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
            let _ = write!(
                line,
                ", Status: {}, Progress: {}%, Elapsed: {}, Last callback: {} ago",
                status,
                request.last_progress,
                format_age(request.started_at.map(|at| now.saturating_duration_since(at))),
                format_age(request.last_callback_at.map(|at| now.saturating_duration_since(at))),
            );
            let _ = writeln!(out, "  {}", line);
        }
        out
    }

    async fn describe(&self, request: &DownloadRequest, now: Instant) -> String {
        let mut line = format!(
            "Account: {}, Attachment: {}, Priority: {} ({}), Age: {}, Retries: {}",
            request.account_id,
            request.attachment_id,
            request.priority,
            request.priority.rank(),
            format_age(Some(now.saturating_duration_since(request.enqueue_time()))),
            request.retry_count,
        );
        match self.store.attachment(request.attachment_id).await {
            Ok(Some(attachment)) => {
                let (mime, inferred) = attachment.effective_mime_type();
                let _ = write!(
                    line,
                    ", Suffix: {}, Mime: {}{}, Size: {}",
                    attachment.suffix().unwrap_or("-"),
                    mime,
                    if inferred { " [inferred]" } else { "" },
                    attachment.size,
                );
            }
            Ok(None) => line.push_str(", Record: missing"),
            Err(e) => {
                let _ = write!(line, ", Record: {}", e);
            }
        }
        line
    }
}

fn format_age(age: Option<Duration>) -> String {
    match age {
        Some(age) if age.as_secs() > 0 => format!("{}s", age.as_secs()),
        Some(age) => format!("{}ms", age.as_millis()),
        None => "-".to_string(),
    }
}
