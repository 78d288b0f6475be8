//! Domain types for attachment downloads

mod attachment;
mod priority;
mod request;
mod status;

pub use attachment::{
    Account, AccountId, Attachment, AttachmentFlags, AttachmentId, AttachmentUpdate, Message, MessageId, UiState,
};
pub use priority::PriorityClass;
pub use request::DownloadRequest;
pub use status::TransferStatus;
