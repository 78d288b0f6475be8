//! In-memory record store

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{Account, AccountId, Attachment, AttachmentId, AttachmentUpdate, Message, MessageId};

use super::{RecordStore, StoreError, StoreResult};

/// Initial contents of a [`MemoryStore`], usually read from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub accounts: Vec<Account>,
    pub messages: Vec<Message>,
    pub attachments: Vec<Attachment>,
}

impl Seed {
    pub fn from_yaml(content: &str) -> StoreResult<Self> {
        serde_yaml::from_str(content).map_err(|e| StoreError::InvalidSeed(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StoreError::InvalidSeed(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_yaml(&content)
    }
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    messages: BTreeMap<MessageId, Message>,
    attachments: BTreeMap<AttachmentId, Attachment>,
}

/// Record store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        info!(
            accounts = seed.accounts.len(),
            messages = seed.messages.len(),
            attachments = seed.attachments.len(),
            "MemoryStore::from_seed: loading"
        );
        let tables = Tables {
            accounts: seed.accounts.into_iter().map(|a| (a.id, a)).collect(),
            messages: seed.messages.into_iter().map(|m| (m.id, m)).collect(),
            attachments: seed.attachments.into_iter().map(|a| (a.id, a)).collect(),
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn insert_account(&self, account: Account) {
        self.tables.write().await.accounts.insert(account.id, account);
    }

    pub async fn remove_account(&self, id: AccountId) -> Option<Account> {
        self.tables.write().await.accounts.remove(&id)
    }

    pub async fn insert_message(&self, message: Message) {
        self.tables.write().await.messages.insert(message.id, message);
    }

    pub async fn remove_message(&self, id: MessageId) -> Option<Message> {
        self.tables.write().await.messages.remove(&id)
    }

    pub async fn insert_attachment(&self, attachment: Attachment) {
        self.tables.write().await.attachments.insert(attachment.id, attachment);
    }

    pub async fn attachment_count(&self) -> usize {
        self.tables.read().await.attachments.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn attachment(&self, id: AttachmentId) -> StoreResult<Option<Attachment>> {
        Ok(self.tables.read().await.attachments.get(&id).cloned())
    }

    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn account_count(&self) -> StoreResult<usize> {
        Ok(self.tables.read().await.accounts.len())
    }

    async fn update_attachment(&self, id: AttachmentId, update: AttachmentUpdate) -> StoreResult<()> {
        debug!(attachment_id = id, ?update, "MemoryStore::update_attachment: called");
        let mut tables = self.tables.write().await;
        let attachment = tables
            .attachments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Attachment {}", id)))?;
        update.apply(attachment);
        Ok(())
    }

    async fn delete_attachment(&self, id: AttachmentId) -> StoreResult<()> {
        debug!(attachment_id = id, "MemoryStore::delete_attachment: called");
        self.tables.write().await.attachments.remove(&id);
        Ok(())
    }

    async fn pending_attachments(&self) -> StoreResult<Vec<Attachment>> {
        let tables = self.tables.read().await;
        Ok(tables.attachments.values().filter(|a| a.is_pending()).cloned().collect())
    }

    async fn prefetch_candidates(&self, limit: usize) -> StoreResult<Vec<Attachment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .attachments
            .values()
            .rev()
            .filter(|a| !a.is_downloaded() && a.flags.is_empty())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn has_unloaded_attachments(&self, message_id: MessageId) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .attachments
            .values()
            .any(|a| a.message_id == message_id && !a.is_downloaded()))
    }
}
