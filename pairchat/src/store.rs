//! Ordered, id-addressable message store.
//!
//! The store is the single local source of truth for a conversation's
//! timeline. Entries keep strict arrival order (history first, then live
//! events as they land) and every mutation is addressed by server id, so
//! replays and duplicate frames converge instead of corrupting the list.

use std::collections::HashMap;

use chrono::{Local, NaiveDate, TimeZone};
use pairchat_proto::message::{Message, MessageBody, MessageId};

/// Day headers rendered for grouped display, e.g. `May 1, 2024`.
const DAY_LABEL_FORMAT: &str = "%B %-d, %Y";

/// What a reply banner should show for a referenced message.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplyPreview<'a> {
    /// The referenced message is present and live.
    Original(&'a Message),
    /// The referenced message is gone or tombstoned.
    Deleted,
}

/// A run of consecutive messages sharing a calendar day.
#[derive(Debug, PartialEq, Eq)]
pub struct DayGroup<'a> {
    /// Formatted day header.
    pub label: String,
    /// Messages in arrival order within the day.
    pub messages: &'a [Message],
}

/// Lazy iterator over [`DayGroup`]s; see
/// [`OrderedMessageStore::grouped_by_day`].
#[derive(Debug, Clone)]
pub struct DayGroups<'a, Tz: TimeZone> {
    remaining: &'a [Message],
    tz: Tz,
}

impl<'a, Tz: TimeZone> Iterator for DayGroups<'a, Tz> {
    type Item = DayGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.remaining.first()?;
        let day: NaiveDate = first.timestamp.with_timezone(&self.tz).date_naive();
        let run_len = self
            .remaining
            .iter()
            .take_while(|m| m.timestamp.with_timezone(&self.tz).date_naive() == day)
            .count();
        let (run, rest) = self.remaining.split_at(run_len);
        self.remaining = rest;
        Some(DayGroup {
            label: day.format(DAY_LABEL_FORMAT).to_string(),
            messages: run,
        })
    }
}

/// Append-ordered message list with an id index.
///
/// Duplicate ids are rejected on append, and patch/remove on an absent id
/// are silent no-ops, which makes every operation safe to apply more than
/// once. The store never reorders: display position is arrival position.
#[derive(Debug, Default)]
pub struct OrderedMessageStore {
    entries: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl OrderedMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the end, unless its id is already present.
    ///
    /// Returns `true` if the message was inserted, `false` if the id was a
    /// duplicate and the existing entry was kept untouched.
    pub fn append(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            tracing::debug!(id = %message.id, "duplicate append ignored");
            return false;
        }
        self.index.insert(message.id, self.entries.len());
        self.entries.push(message);
        true
    }

    /// Replaces the content of the message with the given id.
    ///
    /// The body becomes plain text regardless of what it was before, which
    /// matches how edits are confirmed on the wire. Returns `false` if no
    /// such id exists.
    pub fn patch_content(&mut self, id: MessageId, new_content: String) -> bool {
        match self.index.get(&id) {
            Some(&pos) => {
                self.entries[pos].body = MessageBody::Text(new_content);
                true
            }
            None => {
                tracing::debug!(%id, "patch for unknown id ignored");
                false
            }
        }
    }

    /// Removes the message with the given id, preserving the order of the
    /// rest. Returns the removed message, or `None` for an absent id.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let pos = self.index.remove(&id)?;
        let removed = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn find_by_id(&self, id: MessageId) -> Option<&Message> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    /// Resolves what a reply to `id` should preview.
    ///
    /// A missing id and a tombstoned message both read as deleted; the
    /// distinction is invisible to the person composing the reply.
    #[must_use]
    pub fn reply_preview(&self, id: MessageId) -> ReplyPreview<'_> {
        match self.find_by_id(id) {
            Some(message) if !message.is_deleted => ReplyPreview::Original(message),
            _ => ReplyPreview::Deleted,
        }
    }

    /// Groups consecutive messages by local calendar day.
    ///
    /// A pure, lazy projection over the current contents; call again to
    /// restart from the top after any mutation.
    pub fn grouped_by_day(&self) -> DayGroups<'_, Local> {
        self.grouped_by_day_in(Local)
    }

    /// Groups consecutive messages by calendar day in the given timezone.
    ///
    /// Grouping is over consecutive runs, not a sort: if arrival order ever
    /// interleaves days, each run gets its own header.
    pub fn grouped_by_day_in<Tz: TimeZone>(&self, tz: Tz) -> DayGroups<'_, Tz> {
        DayGroups {
            remaining: &self.entries,
            tz,
        }
    }

    /// All messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Number of messages in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry, for conversation teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
