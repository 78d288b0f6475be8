//! Download eligibility policy

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Attachment, AttachmentFlags};

/// Decides whether an attachment may be downloaded at all
pub trait DownloadPolicy: Send + Sync {
    fn is_eligible(&self, attachment: &Attachment) -> bool;
}

/// Policy section of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Largest attachment that may be downloaded; unlimited when unset
    #[serde(rename = "max-attachment-bytes", default)]
    pub max_attachment_bytes: Option<u64>,

    /// MIME type prefixes that may never be downloaded (e.g. `video/`)
    #[serde(rename = "blocked-mime-types", default)]
    pub blocked_mime_types: Vec<String>,
}

/// Policy built from [`PolicyConfig`] plus the record's own policy flag
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    config: PolicyConfig,
}

impl DefaultPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl DownloadPolicy for DefaultPolicy {
    fn is_eligible(&self, attachment: &Attachment) -> bool {
        if attachment.flags.contains(AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD) {
            debug!(attachment_id = attachment.id, "DefaultPolicy::is_eligible: flagged by policy");
            return false;
        }

        if let Some(max) = self.config.max_attachment_bytes
            && attachment.size > max
        {
            debug!(attachment_id = attachment.id, size = attachment.size, max, "DefaultPolicy::is_eligible: too large");
            return false;
        }

        let (mime, _) = attachment.effective_mime_type();
        let mime = mime.to_lowercase();
        if let Some(blocked) = self
            .config
            .blocked_mime_types
            .iter()
            .find(|prefix| mime.starts_with(&prefix.to_lowercase()))
        {
            debug!(attachment_id = attachment.id, %mime, %blocked, "DefaultPolicy::is_eligible: blocked type");
            return false;
        }

        true
    }
}
