//! Test doubles for the scheduler's collaborators

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::backend::{CompletionSink, TransferBackend, TransferError};
use crate::connectivity::{NetworkClass, NetworkMonitor};
use crate::domain::{Account, AccountId, Attachment, AttachmentFlags, AttachmentId, AttachmentUpdate, Message, MessageId};
use crate::notifier::Notifier;
use crate::policy::DownloadPolicy;
use crate::storage::StorageMonitor;
use crate::store::{MemoryStore, RecordStore, StoreResult};

use super::config::SchedulerConfig;
use super::core::{AttachmentService, Collaborators};

/// A recorded `start_transfer` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub account_id: AccountId,
    pub attachment_id: AttachmentId,
    pub background: bool,
}

/// Backend that records dispatches and keeps the sinks for the test to drive
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<TransferCall>>,
    sinks: Mutex<HashMap<AttachmentId, Arc<dyn CompletionSink>>>,
    sent_mail: Mutex<Vec<AccountId>>,
    fail_next: AtomicBool,
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sink(&self, attachment_id: AttachmentId) -> Option<Arc<dyn CompletionSink>> {
        self.sinks.lock().unwrap().get(&attachment_id).cloned()
    }

    pub fn sent_mail(&self) -> Vec<AccountId> {
        self.sent_mail.lock().unwrap().clone()
    }

    /// Make the next `start_transfer` fail synchronously
    pub fn fail_next_start(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferBackend for RecordingBackend {
    async fn start_transfer(
        &self,
        sink: Arc<dyn CompletionSink>,
        account_id: AccountId,
        attachment_id: AttachmentId,
        background: bool,
    ) -> Result<(), TransferError> {
        debug!(attachment_id, "RecordingBackend::start_transfer: called");
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransferError::Unreachable("mock backend down".to_string()));
        }
        self.calls.lock().unwrap().push(TransferCall {
            account_id,
            attachment_id,
            background,
        });
        self.sinks.lock().unwrap().insert(attachment_id, sink);
        Ok(())
    }

    async fn send_pending_mail(&self, account_id: AccountId) -> Result<(), TransferError> {
        self.sent_mail.lock().unwrap().push(account_id);
        Ok(())
    }
}

/// Storage monitor with fixed capacity and scripted per-account usage
#[derive(Default)]
pub struct FakeStorage {
    capacity: Mutex<(u64, u64)>,
    usage: Mutex<HashMap<AccountId, u64>>,
    scans: AtomicUsize,
}

impl FakeStorage {
    pub fn set(&self, total: u64, available: u64) {
        *self.capacity.lock().unwrap() = (total, available);
    }

    pub fn set_usage(&self, account_id: AccountId, bytes: u64) {
        self.usage.lock().unwrap().insert(account_id, bytes);
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl StorageMonitor for FakeStorage {
    fn total_bytes(&self) -> io::Result<u64> {
        Ok(self.capacity.lock().unwrap().0)
    }

    fn available_bytes(&self) -> io::Result<u64> {
        Ok(self.capacity.lock().unwrap().1)
    }

    fn account_usage(&self, account_id: AccountId) -> io::Result<u64> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.usage.lock().unwrap().get(&account_id).copied().unwrap_or(0))
    }
}

/// Policy honouring the record flag plus an explicit block list
#[derive(Default)]
pub struct FakePolicy {
    blocked: Mutex<HashSet<AttachmentId>>,
}

impl FakePolicy {
    pub fn block(&self, attachment_id: AttachmentId) {
        self.blocked.lock().unwrap().insert(attachment_id);
    }
}

impl DownloadPolicy for FakePolicy {
    fn is_eligible(&self, attachment: &Attachment) -> bool {
        !attachment.flags.contains(AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD)
            && !self.blocked.lock().unwrap().contains(&attachment.id)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    forward_failures: Mutex<Vec<AttachmentId>>,
    abandoned: Mutex<Vec<AttachmentId>>,
}

impl RecordingNotifier {
    pub fn forward_failures(&self) -> Vec<AttachmentId> {
        self.forward_failures.lock().unwrap().clone()
    }

    pub fn abandoned(&self) -> Vec<AttachmentId> {
        self.abandoned.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn forward_download_failed(&self, attachment: &Attachment) {
        self.forward_failures.lock().unwrap().push(attachment.id);
    }

    fn download_abandoned(&self, attachment_id: AttachmentId, _account_id: AccountId) {
        self.abandoned.lock().unwrap().push(attachment_id);
    }
}

/// Store whose lookups of one attachment block until released
pub struct GatedStore {
    pub inner: MemoryStore,
    gated: AtomicI64,
    gate: Semaphore,
    entered: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gated: AtomicI64::new(-1),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }

    /// Block the next lookups of this attachment
    pub fn hold(&self, attachment_id: AttachmentId) {
        self.gated.store(attachment_id, Ordering::SeqCst);
    }

    /// Wait until a lookup is blocked at the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gated.store(-1, Ordering::SeqCst);
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn attachment(&self, id: AttachmentId) -> StoreResult<Option<Attachment>> {
        if self.gated.load(Ordering::SeqCst) == id {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.inner.attachment(id).await
    }

    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.inner.message(id).await
    }

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        self.inner.account(id).await
    }

    async fn account_count(&self) -> StoreResult<usize> {
        self.inner.account_count().await
    }

    async fn update_attachment(&self, id: AttachmentId, update: AttachmentUpdate) -> StoreResult<()> {
        self.inner.update_attachment(id, update).await
    }

    async fn delete_attachment(&self, id: AttachmentId) -> StoreResult<()> {
        self.inner.delete_attachment(id).await
    }

    async fn pending_attachments(&self) -> StoreResult<Vec<Attachment>> {
        self.inner.pending_attachments().await
    }

    async fn prefetch_candidates(&self, limit: usize) -> StoreResult<Vec<Attachment>> {
        self.inner.prefetch_candidates(limit).await
    }

    async fn has_unloaded_attachments(&self, message_id: MessageId) -> StoreResult<bool> {
        self.inner.has_unloaded_attachments(message_id).await
    }
}

/// A service wired to fakes, with handles on every fake
pub struct Harness {
    pub service: Arc<AttachmentService>,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<RecordingBackend>,
    pub network: NetworkMonitor,
    pub storage: Arc<FakeStorage>,
    pub policy: Arc<FakePolicy>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new(config: SchedulerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(RecordingBackend::default());
        let network = NetworkMonitor::new(NetworkClass::Unmetered, true);
        let storage = Arc::new(FakeStorage::default());
        let policy = Arc::new(FakePolicy::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let service = AttachmentService::new(
            config,
            Collaborators {
                store: store.clone(),
                backend: backend.clone(),
                connectivity: Arc::new(network.clone()),
                storage: storage.clone(),
                policy: policy.clone(),
                notifier: notifier.clone(),
            },
        );

        Self {
            service,
            store,
            backend,
            network,
            storage,
            policy,
            notifier,
        }
    }

    /// Insert a record and run it through change handling
    pub async fn add_attachment(&self, attachment: Attachment) {
        self.store.insert_attachment(attachment.clone()).await;
        self.service.on_change(&attachment).await;
    }
}
