//! State management module
//!
//! Conversation data model, the reactive store and attachment lifecycle.

pub mod attachments;
pub mod models;
pub mod store;

pub use attachments::{
    AttachmentRegistry, FileRevoker, NoopRevoker, PendingAttachments, ResourceRevoker,
};
pub use models::{
    Attachment, AttachmentDraft, Conversation, DimensionMode, Message, MessageMeta, MessageRole,
    NewMessage, Snapshot, Theme,
};
pub use store::{Observer, Store, Subscription};
