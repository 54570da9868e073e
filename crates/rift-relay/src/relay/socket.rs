//! WebSocket drivers.
//!
//! Each socket gets a writer task fed by its outbox and a read loop that
//! runs the session state machine and carries out its effects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rift_proto::{is_valid_code, Frame, NotificationKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::auth::TokenKind;
use crate::registry::{Outbound, Outbox, Pairing, CLOSE_ERROR, CLOSE_NORMAL, CLOSE_POLICY};
use crate::state::AppState;
use crate::storage::DatabaseError;

use super::session::{
    HostEffect, HostEvent, HostSession, HostState, PeerEffect, PeerEvent, PeerSession, PeerState,
};

/// How long a closing socket may take to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

enum Inbound {
    Text(Utf8Bytes),
    Binary,
    Closed,
}

/// Writer half of a socket plus its liveness flag.
struct Link {
    outbox: Outbox,
    alive: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    writer_done: bool,
}

impl Link {
    fn spawn(sink: SplitSink<WebSocket, Message>, ping_interval: Duration) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&alive), ping_interval));
        Self {
            outbox,
            alive,
            writer,
            writer_done: false,
        }
    }

    /// Wait for the next message from the socket, or for the writer to stop
    /// (close queued, write failure or missed pong).
    async fn next(&mut self, stream: &mut SplitStream<WebSocket>) -> Inbound {
        if self.writer_done {
            return Inbound::Closed;
        }
        tokio::select! {
            inbound = read_next(stream, &self.alive) => inbound,
            _ = &mut self.writer => {
                self.writer_done = true;
                Inbound::Closed
            }
        }
    }

    fn send(&self, frame: Frame) {
        let _ = self.outbox.send(Outbound::Frame(frame));
    }

    fn close(&self, code: u16, reason: &'static str) {
        let _ = self.outbox.send(Outbound::Close { code, reason });
    }

    /// Close the socket (if still open) and wait for the writer to finish.
    async fn shutdown(mut self) {
        if self.writer_done {
            return;
        }
        self.close(CLOSE_NORMAL, "closing");
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut self.writer)
            .await
            .is_err()
        {
            self.writer.abort();
        }
    }
}

async fn read_next(stream: &mut SplitStream<WebSocket>, alive: &AtomicBool) -> Inbound {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Inbound::Text(text),
            Some(Ok(Message::Binary(_))) => return Inbound::Binary,
            Some(Ok(Message::Pong(_))) => alive.store(true, Ordering::Release),
            // Pings are answered by the websocket layer.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_)) | Err(_)) | None => return Inbound::Closed,
        }
    }
}

/// Drain the outbox onto the socket and ping it every `ping_interval`.
///
/// A socket that has not answered the previous ping by the next tick is
/// considered dead and closed.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    alive: Arc<AtomicBool>,
    ping_interval: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(opcode = %frame.opcode(), error = %e, "Dropping unencodable frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(reason),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !alive.swap(false, Ordering::AcqRel) {
                    debug!("No pong since last ping; closing socket");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_NORMAL,
                            reason: Utf8Bytes::from_static("ping timeout"),
                        })))
                        .await;
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

// =============================================================================
// Host
// =============================================================================

/// Drive an authenticated Host socket for `code` until it closes.
#[instrument(name = "host", skip_all, fields(code = %code))]
pub async fn run_host(socket: WebSocket, state: AppState, code: String) {
    let (sink, mut stream) = socket.split();
    let mut link = Link::spawn(sink, state.ping_interval);

    let handle = state.registry.attach_host(&code, link.outbox.clone()).await;
    let mut session = HostSession::new();

    while session.state() != HostState::Closed {
        let event = match link.next(&mut stream).await {
            Inbound::Text(text) => match Frame::decode(text.as_str()) {
                Ok(frame) => HostEvent::Frame(frame),
                Err(e) => HostEvent::Malformed(e.to_string()),
            },
            Inbound::Binary => HostEvent::Binary,
            Inbound::Closed => HostEvent::Closed,
        };

        let mut effects = VecDeque::from(session.handle(event));
        while let Some(effect) = effects.pop_front() {
            match effect {
                HostEffect::DeliverToPeer {
                    pairing_id,
                    payload,
                } => {
                    if !state
                        .registry
                        .deliver_to_peer(&handle, &pairing_id, payload)
                        .await
                    {
                        trace!(pairing_id = %pairing_id, "Reply for closed pairing dropped");
                    }
                }
                HostEffect::Subscribe { token, platform } => {
                    if !subscribe_device(&state, &code, &token, platform).await {
                        effects.extend(session.handle(HostEvent::SubscriptionRejected));
                    }
                }
                HostEffect::Notify { kind, context } => {
                    state.notifications.send(&code, kind, context);
                }
                HostEffect::Clear => {
                    state.notifications.send(&code, NotificationKind::Clear, None);
                }
                HostEffect::Close(violation) => {
                    warn!(%violation, "Closing host socket");
                    link.close(CLOSE_POLICY, violation.reason());
                }
                HostEffect::Detach => {
                    state.registry.detach_host(&handle).await;
                }
            }
        }
    }

    link.shutdown().await;
    info!("Host socket closed");
}

/// Apply a Host's `PN_SUBSCRIBE`. Returns `false` if the token is not a
/// device-bound push-subscription token for this Host's code.
async fn subscribe_device(
    state: &AppState,
    code: &str,
    token: &str,
    platform: rift_proto::Platform,
) -> bool {
    let Some(claims) = state.tokens.verify(TokenKind::PushSubscription, token) else {
        return false;
    };
    if claims.code != code {
        debug!(token_code = %claims.code, "Subscription token issued for another code");
        return false;
    }
    let Some(device) = claims.device else {
        debug!("Subscription token is not bound to a device");
        return false;
    };

    if let Err(e) = state
        .notifications
        .subscribe(code, &device, Some(platform), &NotificationKind::SUBSCRIBABLE)
        .await
    {
        warn!(error = %e, "Failed to store host subscription");
    }
    true
}

// =============================================================================
// Peer
// =============================================================================

/// Drive a mobile Peer socket until it closes.
#[instrument(name = "peer", skip_all)]
pub async fn run_peer(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let mut link = Link::spawn(sink, state.ping_interval);

    let mut session = PeerSession::new();
    let mut pairing: Option<Pairing> = None;

    while session.state() != &PeerState::Closed {
        let event = match link.next(&mut stream).await {
            Inbound::Text(text) => match Frame::decode(text.as_str()) {
                Ok(frame) => PeerEvent::Frame(frame),
                Err(e) => PeerEvent::Malformed(e.to_string()),
            },
            Inbound::Binary => PeerEvent::Binary,
            Inbound::Closed => PeerEvent::Closed,
        };

        let mut effects = VecDeque::from(session.handle(event));
        while let Some(effect) = effects.pop_front() {
            match effect {
                PeerEffect::Pair { code } => {
                    let outcome = match pair_with_host(&state, &code, &link.outbox).await {
                        Ok(Some((paired, public_key))) => {
                            debug!(code = %code, pairing_id = %paired.pairing_id, "Peer paired");
                            let event = PeerEvent::Paired {
                                pairing_id: paired.pairing_id.clone(),
                                public_key,
                            };
                            pairing = Some(paired);
                            event
                        }
                        Ok(None) => {
                            debug!(code = %code, "No desktop reachable");
                            PeerEvent::Unavailable
                        }
                        Err(e) => {
                            warn!(code = %code, error = %e, "Code lookup failed");
                            link.close(CLOSE_ERROR, "storage failure");
                            PeerEvent::Closed
                        }
                    };
                    effects.extend(session.handle(outcome));
                }
                PeerEffect::ForwardToHost { payload } => {
                    let forwarded = pairing.as_ref().is_some_and(|p| p.forward(payload));
                    if !forwarded {
                        trace!("Host gone; payload dropped");
                    }
                }
                PeerEffect::Send(frame) => link.send(frame),
                PeerEffect::Close(violation) => {
                    warn!(%violation, "Closing peer socket");
                    link.close(CLOSE_POLICY, violation.reason());
                }
                PeerEffect::Unpair => {
                    if let Some(pairing) = pairing.take() {
                        state.registry.unpair(&pairing).await;
                    }
                }
            }
        }
    }

    link.shutdown().await;
    debug!("Peer socket closed");
}

/// Resolve `code` and pair with its live Host.
///
/// `Ok(None)` covers both an unknown code and a code without a live Host.
async fn pair_with_host(
    state: &AppState,
    code: &str,
    outbox: &Outbox,
) -> Result<Option<(Pairing, String)>, DatabaseError> {
    if !is_valid_code(code) {
        return Ok(None);
    }
    let Some(registration) = state.db.lookup_code(code).await? else {
        return Ok(None);
    };

    Ok(state
        .registry
        .pair(code, outbox.clone())
        .await
        .map(|pairing| (pairing, registration.public_key)))
}
