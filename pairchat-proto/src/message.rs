//! Data model for a one-to-one conversation.
//!
//! All types in this module represent messages as they exist in the local
//! ordered store and as they appear in server payloads (live events and the
//! bulk-history response). Serialization is UTF-8 JSON via serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Avatar substituted when a payload carries no `avatar_url`.
pub const DEFAULT_AVATAR_URL: &str = "/static/avatars/default.png";

/// Server-assigned message identifier, unique within a conversation.
///
/// Ordering in the store is by arrival, never by id or timestamp, so this
/// type deliberately does not implement `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Wraps a raw server-assigned identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the conversation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(i64);

impl ChatId {
    /// Wraps a raw conversation identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured descriptor carried by file messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Where the uploaded file can be fetched from.
    pub file_url: String,
    /// Original file name, for display.
    pub file_name: String,
    /// MIME type reported by the uploader.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: u64,
}

/// Message content: plain text or a structured file descriptor.
///
/// The `kind` discriminant from the wire format is carried by the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text content.
    Text(String),
    /// An uploaded file.
    File(FileDescriptor),
}

impl MessageBody {
    /// Returns the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File(_) => None,
        }
    }

    /// Returns `true` for file messages.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// A single entry in the local ordered store.
///
/// Created from a live event or a bulk-history entry; afterwards only
/// mutated via id-addressed content patches or removed via id-addressed
/// deletes — never replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier, unique across the store.
    pub id: MessageId,
    /// Username of the sender.
    pub sender: String,
    /// Text or file content.
    pub body: MessageBody,
    /// Server timestamp. Display ordering still follows arrival order;
    /// timestamps may collide or be client-skewed.
    pub timestamp: DateTime<Utc>,
    /// Weak reference to the message this one replies to. May point at an
    /// id no longer present in the store.
    pub reply_to: Option<MessageId>,
    /// Tombstone flag set by the server for soft-deleted content.
    pub is_deleted: bool,
    /// Denormalized display hint, never empty (defaulted on decode).
    pub avatar_url: String,
}

/// Payload of the bulk-history fetch: `{"history": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    /// Prior messages in chronological order.
    pub history: Vec<HistoryEntry>,
}

/// One raw entry from the bulk-history payload.
///
/// History entries are looser than live events: `kind`, `reply_to`,
/// `is_deleted`, and `avatar_url` may all be absent, and file content
/// arrives as a JSON string that must be decoded into a [`FileDescriptor`].
/// [`HistoryEntry::into_message`] applies all of that normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Username of the sender.
    pub sender: String,
    /// Text content, or embedded JSON for file messages.
    pub content: String,
    /// Server timestamp.
    pub timestamp: DateTime<Utc>,
    /// `"text"` or `"file"`; absent means text.
    #[serde(default)]
    pub kind: Option<String>,
    /// Weak reference to the replied-to message.
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    /// Tombstone flag; absent means live.
    #[serde(default)]
    pub is_deleted: Option<bool>,
    /// Display hint; absent means the default avatar.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl HistoryEntry {
    /// Normalizes a raw history entry into a store-ready [`Message`].
    ///
    /// File entries whose embedded descriptor fails to decode fall back to
    /// text content so a single odd entry cannot sink the whole bootstrap.
    #[must_use]
    pub fn into_message(self) -> Message {
        let body = if self.kind.as_deref() == Some("file") {
            match serde_json::from_str::<FileDescriptor>(&self.content) {
                Ok(descriptor) => MessageBody::File(descriptor),
                Err(_) => MessageBody::Text(self.content),
            }
        } else {
            MessageBody::Text(self.content)
        };

        Message {
            id: self.id,
            sender: self.sender,
            body,
            timestamp: self.timestamp,
            reply_to: self.reply_to,
            is_deleted: self.is_deleted.unwrap_or(false),
            avatar_url: self
                .avatar_url
                .unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
        }
    }
}
