//! Compose-box intent tracking.
//!
//! At most one contextual intent is active at a time: composing a reply to
//! a specific message, or editing one. Starting either cancels the other,
//! and a delete confirmation for the targeted message clears the intent so
//! a send can never reference a message that no longer exists.

use pairchat_proto::event::OutboundIntent;
use pairchat_proto::message::MessageId;

/// The active compose-box context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Intent {
    /// Plain send, no context.
    #[default]
    None,
    /// The next send is a reply to this message.
    ReplyingTo(MessageId),
    /// The next send replaces this message's content.
    Editing {
        /// Target of the edit.
        id: MessageId,
        /// Content at the time the edit began, for pre-filling the input.
        original_content: String,
    },
}

/// Tracks the single active intent and folds it into outbound frames.
#[derive(Debug, Default)]
pub struct IntentTracker {
    current: Intent,
}

impl IntentTracker {
    /// Creates a tracker with no active intent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active intent.
    #[must_use]
    pub const fn current(&self) -> &Intent {
        &self.current
    }

    /// Begins a reply to the given message, displacing any active intent.
    pub fn begin_reply(&mut self, id: MessageId) {
        self.current = Intent::ReplyingTo(id);
    }

    /// Begins an edit of the given message, displacing any active intent.
    ///
    /// `original_content` is what the compose box should be pre-filled
    /// with; the tracker keeps it so a cancelled edit can restore nothing.
    pub fn begin_edit(&mut self, id: MessageId, original_content: String) {
        self.current = Intent::Editing {
            id,
            original_content,
        };
    }

    /// Clears the active intent without sending anything.
    pub fn cancel(&mut self) {
        self.current = Intent::None;
    }

    /// Consumes the active intent and shapes the outbound frame for the
    /// given compose-box content. The tracker resets to [`Intent::None`].
    pub fn take_for_send(&mut self, content: String) -> OutboundIntent {
        match std::mem::take(&mut self.current) {
            Intent::None => OutboundIntent::SendMessage {
                content,
                reply_to: None,
            },
            Intent::ReplyingTo(id) => OutboundIntent::SendMessage {
                content,
                reply_to: Some(id),
            },
            Intent::Editing { id, .. } => OutboundIntent::EditMessage {
                message_id: id,
                content,
            },
        }
    }

    /// Drops the active intent if it targets the removed message.
    ///
    /// Called when a delete confirmation lands, so a half-composed reply or
    /// edit cannot be sent against a dead id.
    pub fn on_message_removed(&mut self, id: MessageId) {
        let targets_removed = match &self.current {
            Intent::ReplyingTo(target) => *target == id,
            Intent::Editing { id: target, .. } => *target == id,
            Intent::None => false,
        };
        if targets_removed {
            tracing::debug!(%id, "active intent target deleted, clearing");
            self.current = Intent::None;
        }
    }
}
