// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Property tests for the ordered message store.
//!
//! A naive model (a `Vec` with linear scans) is driven with the same
//! arbitrary operation sequences as the real store; afterwards both must
//! agree on order and content. Separately checked invariants: ids are
//! unique at all times, and appends never reorder earlier entries.

use chrono::{DateTime, TimeZone, Utc};
use pairchat::store::OrderedMessageStore;
use pairchat_proto::message::{Message, MessageBody, MessageId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Append { id: i64, text: String },
    Patch { id: i64, text: String },
    Remove { id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // A small id range forces duplicate appends and hits on patch/remove.
    let id = 0..12i64;
    prop_oneof![
        (id.clone(), "[a-z]{1,8}").prop_map(|(id, text)| Op::Append { id, text }),
        (id.clone(), "[a-z]{1,8}").prop_map(|(id, text)| Op::Patch { id, text }),
        id.prop_map(|id| Op::Remove { id }),
    ]
}

fn message(id: i64, text: &str) -> Message {
    Message {
        id: MessageId::new(id),
        sender: "prop".into(),
        body: MessageBody::Text(text.into()),
        timestamp: fixed_time(),
        reply_to: None,
        is_deleted: false,
        avatar_url: "/static/avatars/default.png".into(),
    }
}

fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Reference implementation: a plain vec with linear scans.
#[derive(Default)]
struct ModelStore {
    entries: Vec<(i64, String)>,
}

impl ModelStore {
    fn append(&mut self, id: i64, text: &str) {
        if !self.entries.iter().any(|(existing, _)| *existing == id) {
            self.entries.push((id, text.to_string()));
        }
    }

    fn patch(&mut self, id: i64, text: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            entry.1 = text.to_string();
        }
    }

    fn remove(&mut self, id: i64) {
        self.entries.retain(|(existing, _)| *existing != id);
    }
}

proptest! {
    #[test]
    fn store_matches_naive_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut store = OrderedMessageStore::new();
        let mut model = ModelStore::default();

        for op in &ops {
            match op {
                Op::Append { id, text } => {
                    store.append(message(*id, text));
                    model.append(*id, text);
                }
                Op::Patch { id, text } => {
                    store.patch_content(MessageId::new(*id), text.clone());
                    model.patch(*id, text);
                }
                Op::Remove { id } => {
                    store.remove(MessageId::new(*id));
                    model.remove(*id);
                }
            }

            // Ids stay unique after every step.
            let mut seen = std::collections::HashSet::new();
            for m in store.messages() {
                prop_assert!(seen.insert(m.id), "duplicate id {} in store", m.id);
            }
        }

        // Same order, same content.
        let got: Vec<(i64, String)> = store
            .messages()
            .iter()
            .map(|m| (m.id.get(), m.body.as_text().unwrap().to_string()))
            .collect();
        prop_assert_eq!(got, model.entries.clone());

        // The index agrees with the list for every surviving id.
        for (id, text) in &model.entries {
            let found = store.find_by_id(MessageId::new(*id));
            prop_assert_eq!(found.and_then(|m| m.body.as_text()), Some(text.as_str()));
        }
    }

    #[test]
    fn append_never_moves_existing_entries(
        ids in prop::collection::vec(0..20i64, 1..32),
    ) {
        let mut store = OrderedMessageStore::new();
        let mut expected: Vec<i64> = Vec::new();

        for id in ids {
            let before: Vec<i64> = store.messages().iter().map(|m| m.id.get()).collect();
            let inserted = store.append(message(id, "x"));
            let after: Vec<i64> = store.messages().iter().map(|m| m.id.get()).collect();

            prop_assert_eq!(&after[..before.len()], &before[..], "append reordered the prefix");
            if inserted {
                expected.push(id);
            }
            prop_assert_eq!(&after, &expected);
        }
    }
}
