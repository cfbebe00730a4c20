//! Conversation data models
//!
//! Defines conversations, messages, attachments and the global UI settings
//! held by the store. All types are plain data: `Clone` is a total structural
//! copy, which is what snapshots rely on.

use crate::util;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to conversations before their first message
pub const DEFAULT_TITLE: &str = "New conversation";

/// Name given to attachments that arrive without one
pub const UNTITLED_ATTACHMENT: &str = "Untitled attachment";

/// Open key-value bag for result and status annotations on a message
pub type MessageMeta = serde_json::Map<String, serde_json::Value>;

/// Well-known meta keys written by the orchestrator
pub mod meta_keys {
    /// Remote job identifier
    pub const JOB_ID: &str = "job_id";
    /// Direct result download reference
    pub const DOWNLOAD_URL: &str = "download_url";
    /// Marks a message as reporting a failure
    pub const IS_ERROR: &str = "is_error";
    /// Last status reported by the bridge
    pub const BRIDGE_STATUS: &str = "bridge_status";
    /// Translated requirement text
    pub const TRANSLATED_TEXT: &str = "translated_text";
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user
    User,
    /// Message from the assistant/orchestrator
    Assistant,
}

impl MessageRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Color theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Dark theme
    #[default]
    Dark,
    /// Light theme
    Light,
}

impl Theme {
    /// The other theme
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

/// Geometry dimension mode of the requested case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DimensionMode {
    /// Full three dimensional geometry
    #[default]
    #[serde(rename = "3D")]
    ThreeD,
    /// Two dimensional profile extruded one cell deep
    #[serde(rename = "2D_extruded")]
    TwoDExtruded,
}

impl DimensionMode {
    /// Parse a user-supplied mode; anything unrecognized means 3D
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == "2D_extruded" {
            DimensionMode::TwoDExtruded
        } else {
            DimensionMode::ThreeD
        }
    }
}

/// A file attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique identifier for the attachment
    pub id: String,
    /// File name shown to the user
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type, possibly empty
    pub mime_type: String,
    /// Local resource handle referencing the file bytes
    pub url: String,
}

/// Unvalidated attachment input as received from a front end
#[derive(Debug, Clone, Default)]
pub struct AttachmentDraft {
    /// Existing id, if the caller already assigned one
    pub id: Option<String>,
    /// File name
    pub name: Option<String>,
    /// Size in bytes; negative values are treated as unknown
    pub size: Option<i64>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Local resource handle
    pub url: Option<String>,
}

impl From<Attachment> for AttachmentDraft {
    fn from(a: Attachment) -> Self {
        Self {
            id: Some(a.id),
            name: Some(a.name),
            size: i64::try_from(a.size).ok(),
            mime_type: Some(a.mime_type),
            url: Some(a.url),
        }
    }
}

impl Attachment {
    /// Normalize a draft into a well-formed attachment
    pub fn normalize(draft: AttachmentDraft) -> Self {
        let name = draft
            .name
            .map(|n| util::single_line(&n))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_ATTACHMENT.to_string());
        let size = draft
            .size
            .and_then(|s| u64::try_from(s).ok())
            .unwrap_or(0);
        let id = draft
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| util::generate_id("file"));
        Self {
            id,
            name,
            size,
            mime_type: draft.mime_type.map(|m| m.trim().to_string()).unwrap_or_default(),
            url: draft.url.unwrap_or_default(),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message; may be empty when attachments are present
    pub content: String,
    /// Attached files, in upload order
    pub attachments: Vec<Attachment>,
    /// Result and status annotations
    pub meta: Option<MessageMeta>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// When the message was last patched
    pub updated_at: Option<DateTime<Utc>>,
    /// True only while an assistant message is still being produced
    pub streaming: bool,
}

impl Message {
    /// Whether the message is flagged as reporting a failure
    pub fn is_error(&self) -> bool {
        self.meta_value(meta_keys::IS_ERROR)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Look up one meta entry
    pub fn meta_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.as_ref().and_then(|m| m.get(key))
    }

    /// Look up one meta entry as a string
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta_value(key).and_then(|v| v.as_str())
    }
}

/// Input for appending a message; ids and timestamps are assigned by the store
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Message text (user text is trimmed by the store)
    pub content: String,
    /// Attachments to normalize and register
    pub attachments: Vec<AttachmentDraft>,
    /// Initial annotations
    pub meta: Option<MessageMeta>,
}

impl NewMessage {
    /// A user message
    pub fn user(content: impl Into<String>, attachments: Vec<AttachmentDraft>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            attachments,
            meta: None,
        }
    }

    /// An assistant message without attachments
    pub fn assistant(content: impl Into<String>, meta: Option<MessageMeta>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            attachments: Vec::new(),
            meta,
        }
    }
}

/// A conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier for the conversation
    pub id: String,
    /// Title (derived from the first message unless changed)
    pub title: String,
    /// Translation model id
    pub model: String,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation last saw activity
    pub updated_at: Option<DateTime<Utc>>,
    /// Messages in chronological order
    pub messages: Vec<Message>,
    /// Once true, no new user submissions are accepted
    pub ended: bool,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(model: impl Into<String>) -> Self {
        let now = util::now();
        Self {
            id: util::generate_id("conv"),
            title: DEFAULT_TITLE.to_string(),
            model: model.into(),
            created_at: now,
            updated_at: Some(now),
            messages: Vec::new(),
            ended: false,
        }
    }

    /// Timestamp used to order conversations by recent activity
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Whether the title was never derived or changed
    pub fn has_default_title(&self) -> bool {
        self.title.is_empty() || self.title == DEFAULT_TITLE
    }
}

/// Full application state, as held by the store and handed out in snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    /// Conversations, most recently active first
    pub conversations: Vec<Conversation>,
    /// Currently selected conversation, if any
    pub active_conversation_id: Option<String>,
    /// True while an orchestrator run is in flight
    pub is_streaming: bool,
    /// Color theme
    pub theme: Theme,
    /// Dimension mode
    pub dimension_mode: DimensionMode,
}

impl Snapshot {
    /// The active conversation, if one is selected
    pub fn active_conversation(&self) -> Option<&Conversation> {
        let id = self.active_conversation_id.as_ref()?;
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Look up a conversation by id
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }
}
