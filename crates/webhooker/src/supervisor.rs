use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use event_log::EventSink;
use ws_relay::{ConnectError, DeliveryHandler, Session, TerminationReason};

/// Configuration for the relay connection supervisor.
pub struct SupervisorConfig {
    /// Full relay endpoint, account token included.
    pub upstream_url: String,
    /// Fixed delay between a session ending and the next connection attempt.
    pub backoff: Duration,
}

/// Keeps exactly one relay [`Session`] alive at a time.
///
/// Whenever a session fails to open or ends for any reason other than
/// cancellation, the supervisor waits [`SupervisorConfig::backoff`] and opens
/// a fresh one. There is no retry limit; the only way out is the
/// cancellation token.
pub struct Supervisor {
    config: SupervisorConfig,
    handler: Arc<dyn DeliveryHandler>,
    events: EventSink,
    cancel: CancellationToken,
    attempts: u32,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        handler: Arc<dyn DeliveryHandler>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            handler,
            events,
            cancel,
            attempts: 0,
        }
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Main supervision loop. Returns once the cancellation token fires.
    pub async fn run(&mut self) {
        loop {
            self.attempts += 1;
            info!(attempt = self.attempts, "connecting to relay");

            let ended = match Session::open(&self.config.upstream_url, self.cancel.clone()).await {
                Ok(session) => {
                    info!(
                        attempt = self.attempts,
                        session = %session.id(),
                        "connected, waiting for webhooks"
                    );
                    // A session opened after cancellation sends its close
                    // frame and returns straight away.
                    match session.run(self.handler.as_ref(), &self.events).await {
                        TerminationReason::Cancelled => break,
                        TerminationReason::PeerClosed => "connection closed".to_string(),
                        TerminationReason::ReadError(err) => format!("read error: {err}"),
                    }
                }
                Err(ConnectError::Cancelled) => break,
                Err(err) => err.to_string(),
            };

            if self.cancel.is_cancelled() {
                break;
            }

            warn!(attempt = self.attempts, reason = %ended, "connection error");
            info!(
                delay_secs = self.config.backoff.as_secs_f64(),
                "reconnecting after backoff"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.backoff) => {}
            }
        }

        info!("shutting down");
    }
}
