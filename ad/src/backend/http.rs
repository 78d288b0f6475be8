//! HTTP transfer backend
//!
//! Streams an attachment's `location` into `<cache-dir>/<account-id>/<attachment-id>`,
//! reporting progress as chunks arrive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::domain::{AccountId, AttachmentId, MessageId, TransferStatus};
use crate::store::RecordStore;

use super::{CompletionSink, TransferBackend, TransferError};

/// Backend fetching attachment bytes over HTTP(S)
pub struct HttpBackend {
    client: reqwest::Client,
    store: Arc<dyn RecordStore>,
    cache_dir: PathBuf,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig, store: Arc<dyn RecordStore>, cache_dir: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            store,
            cache_dir: cache_dir.into(),
        })
    }

    /// Where a downloaded attachment is stored
    pub fn attachment_path(cache_dir: &Path, account_id: AccountId, attachment_id: AttachmentId) -> PathBuf {
        cache_dir.join(account_id.to_string()).join(attachment_id.to_string())
    }
}

#[async_trait]
impl TransferBackend for HttpBackend {
    async fn start_transfer(
        &self,
        sink: Arc<dyn CompletionSink>,
        account_id: AccountId,
        attachment_id: AttachmentId,
        background: bool,
    ) -> Result<(), TransferError> {
        debug!(account_id, attachment_id, background, "HttpBackend::start_transfer: called");
        let attachment = self
            .store
            .attachment(attachment_id)
            .await
            .map_err(|e| TransferError::Unreachable(e.to_string()))?
            .ok_or(TransferError::AttachmentNotFound(attachment_id))?;

        let path = Self::attachment_path(&self.cache_dir, account_id, attachment_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let client = self.client.clone();
        let message_id = attachment.message_id;
        let expected_size = attachment.size;
        let location = attachment.location;

        tokio::spawn(async move {
            let result = match location {
                Some(url) => fetch(&client, &url, &path, expected_size, sink.as_ref(), message_id, attachment_id).await,
                None => Err(TransferError::NoLocation(attachment_id)),
            };
            match result {
                Ok(bytes) => {
                    info!(attachment_id, bytes, "HttpBackend: transfer complete");
                    sink.on_status(message_id, attachment_id, TransferStatus::Success, 100).await;
                }
                Err(e) => {
                    warn!(attachment_id, error = %e, "HttpBackend: transfer failed");
                    sink.on_status(message_id, attachment_id, e.status(), 0).await;
                }
            }
        });

        Ok(())
    }
}

async fn fetch(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    expected_size: u64,
    sink: &dyn CompletionSink,
    message_id: MessageId,
    attachment_id: AttachmentId,
) -> Result<u64, TransferError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Http(status.as_u16()));
    }

    let total = response.content_length().filter(|len| *len > 0).unwrap_or(expected_size);
    let partial = path.with_extension("part");
    let result = write_body(response, &partial, path, total, sink, message_id, attachment_id).await;
    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(attachment_id, error = %e, "HttpBackend: failed to remove partial file");
    }
    result
}

/// Stream the body into `partial`, then move it to `path`
async fn write_body(
    response: reqwest::Response,
    partial: &Path,
    path: &Path,
    total: u64,
    sink: &dyn CompletionSink,
    message_id: MessageId,
    attachment_id: AttachmentId,
) -> Result<u64, TransferError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    let mut reported: u8 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        if total > 0 {
            // 100 is reserved for the terminal callback
            let percent = ((received.saturating_mul(100)) / total).min(99) as u8;
            if percent > reported {
                reported = percent;
                sink.on_status(message_id, attachment_id, TransferStatus::InProgress, percent)
                    .await;
            }
        }
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(partial, path).await?;
    Ok(received)
}
