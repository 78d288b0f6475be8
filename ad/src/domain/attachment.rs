//! Attachment, message and account records as seen through the record store

use serde::{Deserialize, Serialize};

/// Identifier of an attachment record; also the download request id
pub type AttachmentId = i64;

/// Identifier of a message record (the attachment's parent)
pub type MessageId = i64;

/// Identifier of an account (the owner of a download)
pub type AccountId = i64;

/// Bit set of attachment flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentFlags(u32);

impl AttachmentFlags {
    /// Needed to send a forwarded message
    pub const DOWNLOAD_FORWARD: Self = Self(1 << 1);
    /// Explicitly requested by the user
    pub const DOWNLOAD_USER_REQUEST: Self = Self(1 << 2);
    /// Download is disallowed by account policy
    pub const POLICY_DISALLOWS_DOWNLOAD: Self = Self(1 << 9);

    /// Flags that mark a record as waiting for download
    pub const PENDING: Self = Self(Self::DOWNLOAD_FORWARD.0 | Self::DOWNLOAD_USER_REQUEST.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// All bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for AttachmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for AttachmentFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// User-facing download state of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiState {
    #[default]
    Idle,
    Downloading,
    Saved,
    Failed,
}

impl std::fmt::Display for UiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Downloading => write!(f, "downloading"),
            Self::Saved => write!(f, "saved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An attachment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Attachment {
    pub id: AttachmentId,

    #[serde(rename = "message")]
    pub message_id: MessageId,

    #[serde(rename = "account")]
    pub account_id: AccountId,

    /// Size in bytes as advertised by the server
    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub flags: AttachmentFlags,

    #[serde(default)]
    pub file_name: Option<String>,

    #[serde(default)]
    pub mime_type: Option<String>,

    /// Set for inline (content-id referenced) parts
    #[serde(default)]
    pub content_id: Option<String>,

    /// Where the backend fetches the bytes from
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub ui_state: UiState,

    #[serde(default)]
    pub downloaded_size: u64,
}

impl Attachment {
    /// Create a bare attachment record
    pub fn new(id: AttachmentId, message_id: MessageId, account_id: AccountId) -> Self {
        Self {
            id,
            message_id,
            account_id,
            size: 0,
            flags: AttachmentFlags::empty(),
            file_name: None,
            mime_type: None,
            content_id: None,
            location: None,
            ui_state: UiState::Idle,
            downloaded_size: 0,
        }
    }

    pub fn with_flags(mut self, flags: AttachmentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Inline parts are prefetched regardless of the account preference
    pub fn is_inline(&self) -> bool {
        self.content_id.is_some()
    }

    pub fn is_downloaded(&self) -> bool {
        self.ui_state == UiState::Saved
    }

    pub fn is_pending(&self) -> bool {
        self.flags.intersects(AttachmentFlags::PENDING)
    }

    /// File suffix including the dot, if the name has one
    pub fn suffix(&self) -> Option<&str> {
        let name = self.file_name.as_deref()?;
        name.rfind('.').map(|idx| &name[idx..])
    }

    /// Declared MIME type, or one inferred from the file suffix
    pub fn effective_mime_type(&self) -> (String, bool) {
        match &self.mime_type {
            Some(mime) => (mime.clone(), false),
            None => (infer_mime_type(self.suffix()).to_string(), true),
        }
    }
}

/// Common suffixes only; the result is shown in the queue dump and nothing
/// else depends on it, so unknown suffixes fall back to octet-stream.
fn infer_mime_type(suffix: Option<&str>) -> &'static str {
    match suffix.map(|s| s.trim_start_matches('.').to_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("zip") => "application/zip",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// A message record, the parent of attachments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "account")]
    pub account_id: AccountId,
}

/// An account record, the owner of downloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Account {
    pub id: AccountId,

    /// Account preference: download attachments in the background
    #[serde(default)]
    pub background_attachments: bool,
}

/// Partial update of an attachment record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentUpdate {
    pub flags: Option<AttachmentFlags>,
    pub ui_state: Option<UiState>,
    pub downloaded_size: Option<u64>,
}

impl AttachmentUpdate {
    /// Clear the pending flags and settle the UI state
    pub fn finished(current: AttachmentFlags, ui_state: UiState) -> Self {
        Self {
            flags: Some(current.without(AttachmentFlags::PENDING)),
            ui_state: Some(ui_state),
            downloaded_size: None,
        }
    }

    /// Progress report for an in-flight download
    pub fn progress(size: u64, percent: u8) -> Self {
        Self {
            flags: None,
            ui_state: Some(UiState::Downloading),
            downloaded_size: Some((u128::from(size) * u128::from(percent.min(100)) / 100) as u64),
        }
    }

    /// Apply the update to a record in place
    pub fn apply(&self, attachment: &mut Attachment) {
        if let Some(flags) = self.flags {
            attachment.flags = flags;
        }
        if let Some(ui_state) = self.ui_state {
            attachment.ui_state = ui_state;
        }
        if let Some(size) = self.downloaded_size {
            attachment.downloaded_size = size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_operations() {
        let flags = AttachmentFlags::DOWNLOAD_FORWARD | AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD;
        assert!(flags.contains(AttachmentFlags::DOWNLOAD_FORWARD));
        assert!(!flags.contains(AttachmentFlags::PENDING));
        assert!(flags.intersects(AttachmentFlags::PENDING));

        let cleared = flags.without(AttachmentFlags::PENDING);
        assert_eq!(cleared, AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD);
        assert_eq!(AttachmentFlags::PENDING.bits(), 0b110);
    }

    #[test]
    fn test_finished_update_clears_pending() {
        let mut att = Attachment::new(1, 2, 3)
            .with_flags(AttachmentFlags::DOWNLOAD_USER_REQUEST | AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD);

        AttachmentUpdate::finished(att.flags, UiState::Failed).apply(&mut att);

        assert!(!att.is_pending());
        assert!(att.flags.contains(AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD));
        assert_eq!(att.ui_state, UiState::Failed);
    }

    #[test]
    fn test_progress_update() {
        let mut att = Attachment::new(1, 2, 3).with_size(2_000);
        AttachmentUpdate::progress(att.size, 30).apply(&mut att);

        assert_eq!(att.ui_state, UiState::Downloading);
        assert_eq!(att.downloaded_size, 600);
    }

    #[test]
    fn test_progress_update_huge_size() {
        let update = AttachmentUpdate::progress(u64::MAX, 50);
        assert_eq!(update.downloaded_size, Some(u64::MAX / 2));

        let done = AttachmentUpdate::progress(u64::MAX, 100);
        assert_eq!(done.downloaded_size, Some(u64::MAX));
    }

    #[test]
    fn test_suffix_and_mime() {
        let att = Attachment::new(1, 2, 3).with_file_name("report.final.PDF");
        assert_eq!(att.suffix(), Some(".PDF"));
        assert_eq!(att.effective_mime_type(), ("application/pdf".to_string(), true));

        let bare = Attachment::new(1, 2, 3).with_file_name("README");
        assert_eq!(bare.suffix(), None);
        assert_eq!(bare.effective_mime_type().0, "application/octet-stream");

        let unknown = Attachment::new(1, 2, 3).with_file_name("scan.heic");
        assert_eq!(unknown.effective_mime_type(), ("application/octet-stream".to_string(), true));
    }

    #[test]
    fn test_deserialize_attachment() {
        let yaml = r#"
id: 7
message: 70
account: 1
size: 1024
flags: 4
file-name: photo.jpg
"#;
        let att: Attachment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(att.id, 7);
        assert_eq!(att.message_id, 70);
        assert!(att.flags.contains(AttachmentFlags::DOWNLOAD_USER_REQUEST));
        assert_eq!(att.ui_state, UiState::Idle);
        assert!(!att.is_inline());
    }
}
