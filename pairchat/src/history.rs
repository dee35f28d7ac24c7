//! Bulk-history bootstrap for a conversation.
//!
//! Exactly one history fetch runs per activation of a conversation view.
//! The loader guards that with its own load state, and with an
//! [`ActivationGuard`] that marks results stale once the view has been
//! left, so a slow response can never write into the next activation's
//! store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pairchat_proto::message::{ChatId, HistoryResponse};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::store::OrderedMessageStore;

/// Where the one-per-activation history fetch currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryLoadState {
    /// No fetch attempted yet.
    #[default]
    NotStarted,
    /// Request in flight.
    InFlight,
    /// History merged into the store.
    Done,
    /// The fetch failed; no retry happens within this activation.
    Failed,
}

/// Result of a history load attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// History fetched and merged; `count` messages were new to the store.
    Loaded {
        /// Messages actually appended (duplicates excluded).
        count: usize,
    },
    /// A fetch already ran (or is running) for this activation.
    AlreadyStarted,
    /// The server rejected the token; the session must surface this.
    AuthFailure,
    /// Transport or decode failure.
    Failed(String),
    /// The activation ended before the response landed; nothing was merged.
    Stale,
}

/// Identity of one activation of a conversation view.
///
/// Cloned guards share liveness: revoking any clone (on teardown) marks
/// every in-flight operation from that activation stale.
#[derive(Debug, Clone)]
pub struct ActivationGuard {
    id: Uuid,
    live: Arc<AtomicBool>,
}

impl Default for ActivationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationGuard {
    /// Creates a fresh, live activation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Unique id of this activation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this activation is still the current one.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Marks the activation over. Idempotent.
    pub fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// Fetches prior messages over HTTP and merges them into the store.
#[derive(Debug)]
pub struct HistoryLoader {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    chat_id: ChatId,
    state: HistoryLoadState,
}

impl HistoryLoader {
    /// Creates a loader scoped to one conversation.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: Url, token: String, chat_id: ChatId) -> Self {
        Self {
            http,
            base_url,
            token,
            chat_id,
            state: HistoryLoadState::NotStarted,
        }
    }

    /// Current load state.
    #[must_use]
    pub const fn state(&self) -> HistoryLoadState {
        self.state
    }

    /// Runs the one-per-activation history fetch and merges the result.
    ///
    /// Messages are appended in payload order ahead of any live events that
    /// land afterwards; ids already present (from a racing live event) are
    /// skipped by the store's own dedup. A second call within the same
    /// activation returns [`HistoryOutcome::AlreadyStarted`] without
    /// touching the network.
    pub async fn load(
        &mut self,
        store: &Mutex<OrderedMessageStore>,
        guard: &ActivationGuard,
    ) -> HistoryOutcome {
        if self.state != HistoryLoadState::NotStarted {
            tracing::debug!(chat_id = %self.chat_id, state = ?self.state, "history fetch already ran");
            return HistoryOutcome::AlreadyStarted;
        }
        self.state = HistoryLoadState::InFlight;

        let url = match self
            .base_url
            .join(&format!("/messages/history/{}", self.chat_id))
        {
            Ok(url) => url,
            Err(error) => {
                self.state = HistoryLoadState::Failed;
                return HistoryOutcome::Failed(error.to_string());
            }
        };

        let response = match self.http.get(url).bearer_auth(&self.token).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(chat_id = %self.chat_id, %error, "history fetch failed");
                self.state = HistoryLoadState::Failed;
                return HistoryOutcome::Failed(error.to_string());
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(chat_id = %self.chat_id, "history fetch rejected: token expired");
            self.state = HistoryLoadState::Failed;
            return HistoryOutcome::AuthFailure;
        }
        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(chat_id = %self.chat_id, %status, "history fetch failed");
            self.state = HistoryLoadState::Failed;
            return HistoryOutcome::Failed(format!("unexpected status {status}"));
        }

        let payload: HistoryResponse = match response.json().await {
            Ok(payload) => payload,
            Err(error) => {
                self.state = HistoryLoadState::Failed;
                return HistoryOutcome::Failed(error.to_string());
            }
        };

        if !guard.is_live() {
            tracing::debug!(
                chat_id = %self.chat_id,
                activation = %guard.id(),
                "history response for ended activation discarded"
            );
            return HistoryOutcome::Stale;
        }

        let mut store = store.lock().await;
        let mut appended = 0;
        for entry in payload.history {
            if store.append(entry.into_message()) {
                appended += 1;
            }
        }
        self.state = HistoryLoadState::Done;
        tracing::info!(chat_id = %self.chat_id, appended, "history loaded");
        HistoryOutcome::Loaded { count: appended }
    }
}
