//! Per-activation session orchestration.
//!
//! A [`Session`] owns everything one activation of a conversation view
//! needs: the ordered store, the history bootstrap, the live channel, and
//! the compose-box intent. It runs as a task driven by [`SessionCommand`]s
//! and reports [`SessionEvent`]s back; the host renders from the shared
//! store whenever an event says something changed.
//!
//! Every activation builds a fresh session. Nothing here is shared across
//! conversations or across re-entries into the same conversation.

use std::sync::Arc;
use std::time::Duration;

use pairchat_proto::event::{InboundEvent, OutboundIntent};
use pairchat_proto::message::{ChatId, MessageId};
use reqwest::multipart;
use tokio::sync::{Mutex, mpsc};
use url::Url;

use crate::connection::{ConnectionConfig, LinkEvent, spawn_connection};
use crate::history::{ActivationGuard, HistoryLoader, HistoryOutcome};
use crate::intent::IntentTracker;
use crate::store::OrderedMessageStore;

/// Fixed delay between live-channel reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Pause between surfacing an auth failure and asking the host to leave.
pub const DEFAULT_AUTH_REDIRECT_DELAY: Duration = Duration::from_secs(2);
/// How long a transient notice stays up before auto-dismissal.
pub const DEFAULT_NOTICE_DISMISS: Duration = Duration::from_millis(1500);
/// Default bound for the command, event, and intent channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Everything needed to run one conversation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// HTTP API base, e.g. `http://host:port`.
    pub base_url: Url,
    /// `WebSocket` base, e.g. `ws://host:port`.
    pub ws_url: Url,
    /// Bearer token for both surfaces.
    pub token: String,
    /// Conversation to synchronize.
    pub chat_id: ChatId,
    /// Whether the counterpart already deleted the conversation; if so the
    /// live channel stays down and only history is shown.
    pub peer_deleted: bool,
    /// Fixed reconnect backoff.
    pub reconnect_delay: Duration,
    /// Delay before [`SessionEvent::NavigateBack`] follows an auth failure.
    pub auth_redirect_delay: Duration,
    /// Auto-dismiss delay for transient notices.
    pub notice_dismiss: Duration,
    /// Channel bound for commands, events, and outbound intents.
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Builds a config with the standard timing defaults.
    #[must_use]
    pub fn new(base_url: Url, ws_url: Url, token: String, chat_id: ChatId) -> Self {
        Self {
            base_url,
            ws_url,
            token,
            chat_id,
            peer_deleted: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auth_redirect_delay: DEFAULT_AUTH_REDIRECT_DELAY,
            notice_dismiss: DEFAULT_NOTICE_DISMISS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Host-initiated actions on the session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send the compose-box content, shaped by the active intent.
    SendText {
        /// Text to send.
        text: String,
    },
    /// Start composing a reply to this message.
    BeginReply {
        /// Replied-to message.
        id: MessageId,
    },
    /// Start editing this message; its current text pre-fills the input.
    BeginEdit {
        /// Message to edit.
        id: MessageId,
    },
    /// Drop the active reply/edit intent.
    CancelIntent,
    /// Ask the server to delete this message.
    DeleteMessage {
        /// Message to delete.
        id: MessageId,
    },
    /// Upload a file into the conversation.
    UploadFile {
        /// Display name for the file.
        file_name: String,
        /// Raw file bytes.
        bytes: Vec<u8>,
    },
    /// Delete the whole conversation.
    DeleteChat,
    /// End the activation; tears the live channel down cleanly.
    Shutdown,
}

/// Notifications the session reports to its host.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The history bootstrap merged into the store.
    HistoryLoaded {
        /// Messages the bootstrap appended.
        count: usize,
    },
    /// The history bootstrap failed; no retry happens this activation.
    HistoryFailed {
        /// Human-readable reason.
        reason: String,
    },
    /// The token was rejected; [`SessionEvent::NavigateBack`] follows.
    AuthExpired,
    /// The host should leave the conversation view.
    NavigateBack,
    /// A message was appended to the store.
    MessageAppended {
        /// Id of the new message.
        id: MessageId,
    },
    /// A message's content was replaced in the store.
    MessageEdited {
        /// Id of the edited message.
        id: MessageId,
    },
    /// A message was removed from the store.
    MessageRemoved {
        /// Id of the removed message.
        id: MessageId,
    },
    /// The counterpart deleted the whole conversation.
    ChatDeleted,
    /// Live-channel status changed.
    ConnectionStatus {
        /// `true` when the channel is up.
        connected: bool,
    },
    /// A transient notice to surface; auto-dismissed later.
    Notice {
        /// Notice text.
        text: String,
    },
    /// The most recent notice timed out.
    NoticeCleared,
}

/// Error returned when the session task is gone.
#[derive(Debug, thiserror::Error)]
#[error("session is no longer running")]
pub struct SessionClosed;

/// Host-side handle to a running session.
#[derive(Debug)]
pub struct Session {
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_rx: mpsc::Receiver<SessionEvent>,
    store: Arc<Mutex<OrderedMessageStore>>,
    guard: ActivationGuard,
}

impl Session {
    /// Starts a session for one activation of a conversation view.
    ///
    /// The history bootstrap and the live channel both start immediately;
    /// a `peer_deleted` conversation skips the live channel entirely.
    #[must_use]
    pub fn spawn(config: SessionConfig) -> Self {
        let store = Arc::new(Mutex::new(OrderedMessageStore::new()));
        let guard = ActivationGuard::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);

        tokio::spawn(run_session(
            config,
            Arc::clone(&store),
            guard.clone(),
            cmd_rx,
            event_tx,
        ));

        Self {
            cmd_tx,
            event_rx,
            store,
            guard,
        }
    }

    /// Shared handle to the ordered store, for rendering.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<OrderedMessageStore>> {
        Arc::clone(&self.store)
    }

    /// Activation identity backing this session.
    #[must_use]
    pub const fn activation(&self) -> &ActivationGuard {
        &self.guard
    }

    /// Next event from the session, or `None` once it has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Sends a command to the session task.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has already ended.
    pub async fn command(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.cmd_tx.send(command).await.map_err(|_| SessionClosed)
    }
}

async fn run_session(
    config: SessionConfig,
    store: Arc<Mutex<OrderedMessageStore>>,
    guard: ActivationGuard,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let http = reqwest::Client::new();

    let history_task = tokio::spawn(run_history(
        HistoryLoader::new(
            http.clone(),
            config.base_url.clone(),
            config.token.clone(),
            config.chat_id,
        ),
        Arc::clone(&store),
        guard.clone(),
        event_tx.clone(),
        config.auth_redirect_delay,
    ));

    let (intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(config.channel_capacity);
    let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(config.channel_capacity);
    let link_task = spawn_connection(
        ConnectionConfig {
            ws_url: config.ws_url.clone(),
            token: config.token.clone(),
            chat_id: config.chat_id,
            peer_deleted: config.peer_deleted,
            reconnect_delay: config.reconnect_delay,
        },
        intent_rx,
        link_tx,
    );

    // Dropped to initiate a clean close of the live channel.
    let mut intent_tx = Some(intent_tx);
    let mut intents = IntentTracker::new();
    let mut link_open = true;

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Shutdown) | None => break,
                Some(command) => {
                    handle_command(
                        command,
                        &config,
                        &http,
                        &store,
                        &mut intents,
                        &mut intent_tx,
                        &event_tx,
                    )
                    .await;
                }
            },
            link = link_rx.recv(), if link_open => match link {
                Some(link) => {
                    handle_link_event(
                        link,
                        &config,
                        &store,
                        &mut intents,
                        &mut intent_tx,
                        &event_tx,
                    )
                    .await;
                }
                None => {
                    // Supervisor ended; keep serving commands so the host
                    // can still read the store and shut down normally.
                    link_open = false;
                }
            },
        }
    }

    guard.revoke();
    drop(intent_tx);
    // Drain lifecycle events so the clean close completes.
    while link_rx.recv().await.is_some() {}
    let _ = link_task.await;
    history_task.abort();
    tracing::info!(chat_id = %config.chat_id, "session ended");
}

async fn handle_command(
    command: SessionCommand,
    config: &SessionConfig,
    http: &reqwest::Client,
    store: &Mutex<OrderedMessageStore>,
    intents: &mut IntentTracker,
    intent_tx: &mut Option<mpsc::Sender<OutboundIntent>>,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    match command {
        SessionCommand::SendText { text } => {
            if text.trim().is_empty() {
                return;
            }
            // The store is only ever mutated by the confirming inbound
            // event, never by the send itself.
            let frame = intents.take_for_send(text);
            send_intent(intent_tx, frame).await;
        }
        SessionCommand::BeginReply { id } => intents.begin_reply(id),
        SessionCommand::BeginEdit { id } => {
            let original = {
                let store = store.lock().await;
                store
                    .find_by_id(id)
                    .filter(|message| !message.is_deleted)
                    .and_then(|message| message.body.as_text().map(str::to_owned))
            };
            match original {
                Some(original_content) => intents.begin_edit(id, original_content),
                None => tracing::debug!(%id, "edit of missing or non-text message refused"),
            }
        }
        SessionCommand::CancelIntent => intents.cancel(),
        SessionCommand::DeleteMessage { id } => {
            send_intent(intent_tx, OutboundIntent::DeleteMessage { message_id: id }).await;
        }
        SessionCommand::UploadFile { file_name, bytes } => {
            upload_file(config, http, event_tx, file_name, bytes);
        }
        SessionCommand::DeleteChat => {
            delete_chat(config, http, intent_tx, event_tx).await;
        }
        SessionCommand::Shutdown => unreachable!("handled by the session loop"),
    }
}

async fn handle_link_event(
    link: LinkEvent,
    config: &SessionConfig,
    store: &Mutex<OrderedMessageStore>,
    intents: &mut IntentTracker,
    intent_tx: &mut Option<mpsc::Sender<OutboundIntent>>,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    match link {
        LinkEvent::Up => {
            let _ = event_tx
                .send(SessionEvent::ConnectionStatus { connected: true })
                .await;
        }
        LinkEvent::Down { .. } => {
            let _ = event_tx
                .send(SessionEvent::ConnectionStatus { connected: false })
                .await;
        }
        LinkEvent::Inbound(event) => {
            apply_inbound(event, config, store, intents, intent_tx, event_tx).await;
        }
    }
}

/// Applies one decoded frame to the store and reports what changed.
async fn apply_inbound(
    event: InboundEvent,
    config: &SessionConfig,
    store: &Mutex<OrderedMessageStore>,
    intents: &mut IntentTracker,
    intent_tx: &mut Option<mpsc::Sender<OutboundIntent>>,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    // Frames scoped to another conversation are dropped without effect.
    if let Some(chat_id) = event.chat_id()
        && chat_id != config.chat_id
    {
        tracing::debug!(%chat_id, expected = %config.chat_id, "frame for other conversation dropped");
        return;
    }

    match event {
        InboundEvent::NewMessage { .. } | InboundEvent::NewFile { .. } => {
            if let Some(message) = event.into_message() {
                let id = message.id;
                let appended = store.lock().await.append(message);
                if appended {
                    let _ = event_tx.send(SessionEvent::MessageAppended { id }).await;
                }
            }
        }
        InboundEvent::Edited {
            message_id,
            new_content,
        } => {
            let patched = store.lock().await.patch_content(message_id, new_content);
            if patched {
                let _ = event_tx
                    .send(SessionEvent::MessageEdited { id: message_id })
                    .await;
            }
        }
        InboundEvent::Deleted { message_id } => {
            let removed = store.lock().await.remove(message_id);
            if removed.is_some() {
                intents.on_message_removed(message_id);
                let _ = event_tx
                    .send(SessionEvent::MessageRemoved { id: message_id })
                    .await;
            }
        }
        InboundEvent::ChatDeleted { .. } => {
            // The conversation is gone on the server; take the live channel
            // down for good and tell the host.
            intent_tx.take();
            let _ = event_tx.send(SessionEvent::ChatDeleted).await;
        }
        InboundEvent::Error { message } => {
            notify(event_tx, config.notice_dismiss, message);
        }
    }
}

async fn send_intent(intent_tx: &mut Option<mpsc::Sender<OutboundIntent>>, frame: OutboundIntent) {
    match intent_tx {
        Some(tx) => {
            if tx.send(frame).await.is_err() {
                tracing::warn!("live channel gone, outbound intent dropped");
                intent_tx.take();
            }
        }
        None => tracing::debug!("no live channel, outbound intent dropped"),
    }
}

/// Fire-and-forget multipart upload; the message itself arrives as a
/// `new_file` event once the server commits it.
fn upload_file(
    config: &SessionConfig,
    http: &reqwest::Client,
    event_tx: &mpsc::Sender<SessionEvent>,
    file_name: String,
    bytes: Vec<u8>,
) {
    let Ok(url) = config.base_url.join("/messages/upload") else {
        return;
    };
    let request = http
        .post(url)
        .bearer_auth(&config.token)
        .multipart(
            multipart::Form::new()
                .part("file", multipart::Part::bytes(bytes).file_name(file_name))
                .text("chat_id", config.chat_id.to_string()),
        );
    let event_tx = event_tx.clone();
    let dismiss = config.notice_dismiss;
    tokio::spawn(async move {
        match request.send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "file upload rejected");
                notify(&event_tx, dismiss, "file upload failed".into());
            }
            Err(error) => {
                tracing::warn!(%error, "file upload failed");
                notify(&event_tx, dismiss, "file upload failed".into());
            }
        }
    });
}

async fn delete_chat(
    config: &SessionConfig,
    http: &reqwest::Client,
    intent_tx: &mut Option<mpsc::Sender<OutboundIntent>>,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    let Ok(url) = config
        .base_url
        .join(&format!("/chats/delete/{}", config.chat_id))
    else {
        return;
    };
    match http.delete(url).bearer_auth(&config.token).send().await {
        Ok(response) if response.status().is_success() => {
            intent_tx.take();
            let _ = event_tx.send(SessionEvent::NavigateBack).await;
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), "chat deletion rejected");
            notify(event_tx, config.notice_dismiss, "could not delete chat".into());
        }
        Err(error) => {
            tracing::warn!(%error, "chat deletion failed");
            notify(event_tx, config.notice_dismiss, "could not delete chat".into());
        }
    }
}

/// Emits a notice and schedules its auto-dismissal.
fn notify(event_tx: &mpsc::Sender<SessionEvent>, dismiss: Duration, text: String) {
    let event_tx = event_tx.clone();
    tokio::spawn(async move {
        if event_tx.send(SessionEvent::Notice { text }).await.is_err() {
            return;
        }
        tokio::time::sleep(dismiss).await;
        let _ = event_tx.send(SessionEvent::NoticeCleared).await;
    });
}

async fn run_history(
    mut loader: HistoryLoader,
    store: Arc<Mutex<OrderedMessageStore>>,
    guard: ActivationGuard,
    event_tx: mpsc::Sender<SessionEvent>,
    auth_redirect_delay: Duration,
) {
    match loader.load(&store, &guard).await {
        HistoryOutcome::Loaded { count } => {
            let _ = event_tx.send(SessionEvent::HistoryLoaded { count }).await;
        }
        HistoryOutcome::AuthFailure => {
            let _ = event_tx.send(SessionEvent::AuthExpired).await;
            tokio::time::sleep(auth_redirect_delay).await;
            let _ = event_tx.send(SessionEvent::NavigateBack).await;
        }
        HistoryOutcome::Failed(reason) => {
            let _ = event_tx.send(SessionEvent::HistoryFailed { reason }).await;
        }
        HistoryOutcome::Stale | HistoryOutcome::AlreadyStarted => {}
    }
}
