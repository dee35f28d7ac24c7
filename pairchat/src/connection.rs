//! Live-channel connection lifecycle.
//!
//! [`ConnectionManager`] is the pure state machine: it decides, from close
//! codes alone, whether a drop is clean (stay down) or abnormal (retry
//! after a fixed delay). [`spawn_connection`] is the async supervisor that
//! owns the `WebSocket`, feeds decoded frames upward as [`LinkEvent`]s, and
//! writes outbound intents, reconnecting for as long as the manager says to.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairchat_proto::codec::{decode_frame, encode_intent};
use pairchat_proto::event::{InboundEvent, OutboundIntent};
use pairchat_proto::message::ChatId;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Normal closure, sent when tearing down deliberately.
pub const NORMAL_CLOSE: u16 = 1000;
/// Closure without a status code; treated the same as normal.
pub const NO_STATUS_CLOSE: u16 = 1005;
/// Synthesized when the stream ends without any close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Where the live channel currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected, or torn down for good.
    #[default]
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Channel established and readable.
    Open,
    /// We initiated a close and are draining until the server confirms.
    Closing,
    /// The channel ended cleanly; no retry will happen.
    ClosedClean,
    /// The channel dropped; a retry is due.
    ClosedAbnormal,
}

/// Raw transport observations fed into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// A transport-level error surfaced. Errors alone never trigger a
    /// retry; the close that follows them does.
    Error(String),
    /// The channel closed with this status code.
    Closed {
        /// Close status code, or [`ABNORMAL_CLOSE`] if none was sent.
        code: u16,
    },
}

/// What the supervisor should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Keep the current channel running.
    Continue,
    /// Dial again after this delay.
    Reconnect {
        /// Fixed backoff before the next attempt.
        delay: Duration,
    },
    /// Stay down; the channel ended on purpose.
    Stop,
}

/// Pure reconnect policy for one conversation's live channel.
///
/// Deliberate teardown is marked with [`begin_close`](Self::begin_close)
/// before the close frame goes out, so the eventual close event reads as
/// clean regardless of the code the server echoes back.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    chat_id: ChatId,
    peer_deleted: bool,
    reconnect_delay: Duration,
}

impl ConnectionManager {
    /// Creates a manager for one conversation.
    ///
    /// A conversation already deleted by the counterpart never connects.
    #[must_use]
    pub const fn new(chat_id: ChatId, peer_deleted: bool, reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            chat_id,
            peer_deleted,
            reconnect_delay,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Conversation this channel is scoped to.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Moves to [`ConnectionState::Connecting`] if a dial is permitted.
    ///
    /// Returns `false` when the counterpart deleted the conversation, or
    /// when a channel is already being established or is up.
    pub fn begin_connect(&mut self) -> bool {
        if self.peer_deleted {
            tracing::debug!(chat_id = %self.chat_id, "conversation deleted, not connecting");
            return false;
        }
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => false,
            ConnectionState::Idle
            | ConnectionState::ClosedClean
            | ConnectionState::ClosedAbnormal => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// Marks the upcoming close as deliberate.
    pub fn begin_close(&mut self) {
        self.state = ConnectionState::Closing;
    }

    /// Records that the counterpart deleted the conversation, which pins
    /// the channel down for good.
    pub fn mark_peer_deleted(&mut self) {
        self.peer_deleted = true;
    }

    /// Applies a transport observation and returns what to do next.
    pub fn apply_transport_event(&mut self, event: TransportEvent) -> Directive {
        match event {
            TransportEvent::Opened => {
                self.state = ConnectionState::Open;
                Directive::Continue
            }
            TransportEvent::Error(reason) => {
                tracing::warn!(chat_id = %self.chat_id, %reason, "live channel error");
                Directive::Continue
            }
            TransportEvent::Closed { code } => {
                if self.state == ConnectionState::Closing {
                    self.state = ConnectionState::ClosedClean;
                    return Directive::Stop;
                }
                if self.peer_deleted || matches!(code, NORMAL_CLOSE | NO_STATUS_CLOSE) {
                    self.state = ConnectionState::ClosedClean;
                    Directive::Stop
                } else {
                    self.state = ConnectionState::ClosedAbnormal;
                    Directive::Reconnect {
                        delay: self.reconnect_delay,
                    }
                }
            }
        }
    }
}

/// What the supervisor reports upward to the session.
#[derive(Debug)]
pub enum LinkEvent {
    /// The channel came up (first connect or a successful retry).
    Up,
    /// A decoded frame arrived.
    Inbound(InboundEvent),
    /// The channel went down. `will_retry` distinguishes a pending retry
    /// from a terminal stop.
    Down {
        /// Whether a reconnect attempt follows.
        will_retry: bool,
    },
}

/// Connection parameters for one conversation's live channel.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base `WebSocket` endpoint, e.g. `ws://host:port`.
    pub ws_url: Url,
    /// Bearer token, passed as a query parameter on the handshake.
    pub token: String,
    /// Conversation to subscribe to.
    pub chat_id: ChatId,
    /// Whether the counterpart already deleted the conversation.
    pub peer_deleted: bool,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl ConnectionConfig {
    /// Builds the per-conversation subscription URL.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the base URL cannot take a path.
    pub fn subscription_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self
            .ws_url
            .join(&format!("/ws/chat/{}", self.chat_id))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the supervisor task for one conversation's live channel.
///
/// Outbound intents are read from `intent_rx`; closing that channel tears
/// the connection down cleanly. Lifecycle and inbound frames are reported
/// on `event_tx`. The task ends once the manager decides to stay down.
pub fn spawn_connection(
    config: ConnectionConfig,
    intent_rx: mpsc::Receiver<OutboundIntent>,
    event_tx: mpsc::Sender<LinkEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_connection(config, intent_rx, event_tx))
}

async fn run_connection(
    config: ConnectionConfig,
    mut intent_rx: mpsc::Receiver<OutboundIntent>,
    event_tx: mpsc::Sender<LinkEvent>,
) {
    let mut manager =
        ConnectionManager::new(config.chat_id, config.peer_deleted, config.reconnect_delay);

    loop {
        if !manager.begin_connect() {
            return;
        }
        let url = match config.subscription_url() {
            Ok(url) => url,
            Err(error) => {
                tracing::error!(%error, "invalid live channel URL");
                return;
            }
        };

        let directive = match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                manager.apply_transport_event(TransportEvent::Opened);
                tracing::info!(chat_id = %config.chat_id, "live channel up");
                if event_tx.send(LinkEvent::Up).await.is_err() {
                    return;
                }
                let code = drive_socket(ws, &mut intent_rx, &event_tx, &mut manager).await;
                manager.apply_transport_event(TransportEvent::Closed { code })
            }
            Err(error) => {
                tracing::warn!(chat_id = %config.chat_id, %error, "live channel dial failed");
                manager.apply_transport_event(TransportEvent::Closed {
                    code: ABNORMAL_CLOSE,
                })
            }
        };

        match directive {
            Directive::Reconnect { delay } => {
                if event_tx
                    .send(LinkEvent::Down { will_retry: true })
                    .await
                    .is_err()
                {
                    return;
                }
                tracing::info!(chat_id = %config.chat_id, ?delay, "reconnecting");
                if !wait_for_redial(delay, &mut intent_rx).await {
                    tracing::info!(chat_id = %config.chat_id, "session ended while redialing");
                    return;
                }
            }
            Directive::Stop => {
                let _ = event_tx.send(LinkEvent::Down { will_retry: false }).await;
                tracing::info!(chat_id = %config.chat_id, "live channel stopped");
                return;
            }
            Directive::Continue => {}
        }
    }
}

/// Sleeps out the reconnect delay while watching the intent channel.
///
/// Returns `false` if the channel closed in the meantime: the session is
/// tearing down and no redial must happen. Intents arriving while the
/// channel is down have nowhere to go and are dropped.
async fn wait_for_redial(delay: Duration, intent_rx: &mut mpsc::Receiver<OutboundIntent>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            intent = intent_rx.recv() => match intent {
                Some(_) => tracing::debug!("live channel down, outbound intent dropped"),
                None => return false,
            },
        }
    }
}

/// Pumps one established socket until it closes; returns the close code.
async fn drive_socket(
    mut ws: WsStream,
    intent_rx: &mut mpsc::Receiver<OutboundIntent>,
    event_tx: &mpsc::Sender<LinkEvent>,
    manager: &mut ConnectionManager,
) -> u16 {
    let mut intents_open = true;
    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(&text) {
                    Ok(event) => {
                        if event_tx.send(LinkEvent::Inbound(event)).await.is_err() {
                            return ABNORMAL_CLOSE;
                        }
                    }
                    Err(error) => {
                        // One bad frame must not take the stream down.
                        tracing::warn!(%error, "dropping undecodable frame");
                    }
                },
                Some(Ok(WsMessage::Close(close))) => {
                    return close.map_or(NO_STATUS_CLOSE, |frame| u16::from(frame.code));
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    manager.apply_transport_event(TransportEvent::Error(error.to_string()));
                }
                None => return ABNORMAL_CLOSE,
            },
            intent = intent_rx.recv(), if intents_open => match intent {
                Some(intent) => match encode_intent(&intent) {
                    Ok(frame) => {
                        if let Err(error) = ws.send(WsMessage::Text(frame.into())).await {
                            tracing::warn!(%error, "outbound frame failed");
                        }
                    }
                    Err(error) => tracing::error!(%error, "intent encoding failed"),
                },
                None => {
                    // Session dropped its sender: close deliberately and
                    // drain until the server confirms.
                    intents_open = false;
                    manager.begin_close();
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "session ended".into(),
                    };
                    if let Err(error) = ws.close(Some(frame)).await {
                        tracing::debug!(%error, "close handshake failed");
                        return NORMAL_CLOSE;
                    }
                }
            },
        }
    }
}
