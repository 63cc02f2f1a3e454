use std::time::Duration;

use event_log::{EventEntry, EventKind, EventSink};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::message::{self, Delivery};

/// How long a graceful close may take before the transport is dropped anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives every delivery decoded by a [`Session`].
///
/// `dispatch` is called from the read loop, so implementations must hand the
/// work off (typically by spawning a task) rather than perform it inline.
pub trait DeliveryHandler: Send + Sync {
    fn dispatch(&self, delivery: Delivery);
}

/// Why a [`Session`] could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid upstream address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to connect to upstream: {0}")]
    Transport(#[from] WsError),

    #[error("connect cancelled")]
    Cancelled,
}

/// How a [`Session`]'s read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The relay closed the connection.
    PeerClosed,
    /// The transport failed with something other than a closing signal.
    ReadError(String),
    /// The process asked to shut down; a normal-closure frame was sent.
    Cancelled,
}

/// One live connection to the relay.
///
/// A session is opened once, run once, and then gone: reconnecting always
/// means opening a new one.
pub struct Session {
    id: uuid::Uuid,
    ws: UpstreamStream,
    cancel: CancellationToken,
}

enum Step {
    Cancel,
    Frame(Option<Result<Message, WsError>>),
}

impl Session {
    /// Connect to `address`, which must be a `ws://` or `wss://` URL.
    ///
    /// Fails with [`ConnectError::Cancelled`] if `cancel` fires before the
    /// handshake completes.
    pub async fn open(address: &str, cancel: CancellationToken) -> Result<Self, ConnectError> {
        validate_address(address)?;

        let (ws, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectError::Cancelled),
            result = tokio_tungstenite::connect_async(address) => result?,
        };

        let id = uuid::Uuid::new_v4();
        tracing::debug!(session = %id, "upstream connected");

        Ok(Self { id, ws, cancel })
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Read frames until the connection ends or the session is cancelled.
    ///
    /// Every decoded delivery is logged as `webhook_received` and passed to
    /// `handler` without waiting for it. Frames that fail to decode are
    /// logged and skipped.
    pub async fn run(
        mut self,
        handler: &dyn DeliveryHandler,
        events: &EventSink,
    ) -> TerminationReason {
        let cancel = self.cancel.clone();

        let reason = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancel,
                frame = self.ws.next() => Step::Frame(frame),
            };

            let frame = match step {
                Step::Cancel => {
                    self.close().await;
                    break TerminationReason::Cancelled;
                }
                Step::Frame(frame) => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    self.handle_payload(text.as_bytes(), handler, events).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    self.handle_payload(&data, handler, events).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    // The close reply goes out on the next read, which then
                    // reports the end of the stream.
                    tracing::debug!(session = %self.id, ?frame, "close frame received");
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) if is_closing(&err) => break TerminationReason::PeerClosed,
                Some(Err(err)) => break TerminationReason::ReadError(err.to_string()),
                None => break TerminationReason::PeerClosed,
            }
        };

        match &reason {
            TerminationReason::ReadError(err) => {
                tracing::warn!(session = %self.id, %err, "read error");
            }
            other => {
                tracing::info!(session = %self.id, reason = ?other, "session ended");
            }
        }

        reason
    }

    async fn handle_payload(
        &self,
        payload: &[u8],
        handler: &dyn DeliveryHandler,
        events: &EventSink,
    ) {
        let delivery = match message::decode(payload) {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::warn!(session = %self.id, %err, "failed to parse message, skipping");
                return;
            }
        };

        tracing::debug!(
            session = %self.id,
            id = delivery.record.id,
            method = %delivery.record.method,
            path = %delivery.record.path,
            "webhook received"
        );

        events
            .log(
                EventEntry::new(EventKind::WebhookReceived)
                    .with_request(&delivery.record.method, &delivery.record.path)
                    .with_balance_sats(delivery.balance_sats),
            )
            .await;

        handler.dispatch(delivery);
    }

    /// Best-effort normal closure; failures only get logged.
    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, self.ws.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => tracing::debug!(session = %self.id, "close frame sent"),
            Ok(Err(err)) => tracing::debug!(session = %self.id, %err, "failed to send close frame"),
            Err(_) => tracing::debug!(session = %self.id, "timed out sending close frame"),
        }
    }
}

fn validate_address(address: &str) -> Result<(), ConnectError> {
    let invalid = |reason: String| ConnectError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let url = reqwest::Url::parse(address).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other:?}, expected ws or wss"))),
    }
}

/// Errors that mean the peer went away rather than the transport breaking.
fn is_closing(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
