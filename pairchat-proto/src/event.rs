//! Event taxonomy for the live channel.
//!
//! Inbound frames decode into the closed [`InboundEvent`] union; locally
//! initiated mutations serialize from [`OutboundIntent`]. Both sides of the
//! wire are flat JSON objects discriminated by a `type` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{
    ChatId, DEFAULT_AVATAR_URL, FileDescriptor, Message, MessageBody, MessageId,
};

/// A decoded frame from the live channel.
///
/// `NewMessage`, `NewFile`, and `ChatDeleted` carry a `chat_id` so stale
/// frames from a previous subscription can be discarded; `Edited`,
/// `Deleted`, and `Error` are scoped by the channel itself. Any frame with
/// an unrecognized `type` tag is a decode error, never a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A new text message was committed by the server.
    NewMessage {
        /// Conversation this frame belongs to.
        chat_id: ChatId,
        /// Server-assigned message id.
        id: MessageId,
        /// Username of the sender.
        sender: String,
        /// Plain text content.
        content: String,
        /// Server timestamp.
        timestamp: DateTime<Utc>,
        /// Display hint; absent means the default avatar.
        #[serde(default)]
        avatar_url: Option<String>,
        /// Weak reference to the replied-to message.
        #[serde(default)]
        reply_to: Option<MessageId>,
        /// Tombstone flag.
        #[serde(default)]
        is_deleted: bool,
    },
    /// A new file message was committed by the server.
    NewFile {
        /// Conversation this frame belongs to.
        chat_id: ChatId,
        /// Server-assigned message id.
        id: MessageId,
        /// Username of the sender.
        sender: String,
        /// Structured file descriptor.
        file: FileDescriptor,
        /// Server timestamp.
        timestamp: DateTime<Utc>,
        /// Display hint; absent means the default avatar.
        #[serde(default)]
        avatar_url: Option<String>,
        /// Weak reference to the replied-to message.
        #[serde(default)]
        reply_to: Option<MessageId>,
        /// Tombstone flag.
        #[serde(default)]
        is_deleted: bool,
    },
    /// The server confirmed an edit; content replace by id.
    Edited {
        /// Target message.
        message_id: MessageId,
        /// Replacement content.
        new_content: String,
    },
    /// The server confirmed a delete; removal by id.
    Deleted {
        /// Target message.
        message_id: MessageId,
    },
    /// The whole conversation was deleted by the counterpart.
    ChatDeleted {
        /// Conversation that was deleted.
        chat_id: ChatId,
    },
    /// An explicit application-level error from the server.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl InboundEvent {
    /// Returns the conversation scope of this event, for the variants that
    /// carry one.
    #[must_use]
    pub const fn chat_id(&self) -> Option<ChatId> {
        match self {
            Self::NewMessage { chat_id, .. }
            | Self::NewFile { chat_id, .. }
            | Self::ChatDeleted { chat_id } => Some(*chat_id),
            Self::Edited { .. } | Self::Deleted { .. } | Self::Error { .. } => None,
        }
    }

    /// Converts an append-producing event into a store-ready [`Message`].
    ///
    /// Returns `None` for the variants that do not create a message.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::NewMessage {
                id,
                sender,
                content,
                timestamp,
                avatar_url,
                reply_to,
                is_deleted,
                ..
            } => Some(Message {
                id,
                sender,
                body: MessageBody::Text(content),
                timestamp,
                reply_to,
                is_deleted,
                avatar_url: avatar_url.unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
            }),
            Self::NewFile {
                id,
                sender,
                file,
                timestamp,
                avatar_url,
                reply_to,
                is_deleted,
                ..
            } => Some(Message {
                id,
                sender,
                body: MessageBody::File(file),
                timestamp,
                reply_to,
                is_deleted,
                avatar_url: avatar_url.unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
            }),
            Self::Edited { .. } | Self::Deleted { .. } | Self::ChatDeleted { .. }
            | Self::Error { .. } => None,
        }
    }
}

/// A locally-initiated mutation, serialized onto the live channel.
///
/// Exactly three shapes exist; no other outbound frame is ever produced.
/// The new/edited message itself only enters the store via the confirming
/// inbound event — sends are never applied optimistically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundIntent {
    /// Send a new text message, optionally as a reply.
    SendMessage {
        /// Text content.
        content: String,
        /// Replied-to message id; omitted from the frame when `None`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },
    /// Replace the content of an existing message.
    EditMessage {
        /// Target message.
        message_id: MessageId,
        /// Replacement content.
        content: String,
    },
    /// Delete an existing message.
    DeleteMessage {
        /// Target message.
        message_id: MessageId,
    },
}
