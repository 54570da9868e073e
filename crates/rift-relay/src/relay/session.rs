//! Per-socket protocol state machines.
//!
//! Sessions never touch sockets, storage or the registry; they turn inbound
//! events into effects that the socket drivers carry out.

use std::fmt;

use rift_proto::{Frame, NotificationKind, Opcode, PairingId, Payload, Platform};

/// Why a socket is being closed for misbehaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Malformed(String),
    Unexpected(Opcode),
    NotPaired,
    AlreadyPaired,
    BinaryMessage,
    InvalidPlatform(Platform),
    BadSubscriptionToken,
}

impl Violation {
    /// Short reason sent in the close frame.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed frame",
            Self::Unexpected(_) => "unexpected frame",
            Self::NotPaired => "not paired",
            Self::AlreadyPaired => "already paired",
            Self::BinaryMessage => "binary messages not supported",
            Self::InvalidPlatform(_) => "invalid platform",
            Self::BadSubscriptionToken => "invalid subscription token",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed frame: {detail}"),
            Self::Unexpected(opcode) => write!(f, "unexpected {opcode} frame"),
            Self::InvalidPlatform(platform) => write!(f, "cannot subscribe platform {platform}"),
            other => f.write_str(other.reason()),
        }
    }
}

// =============================================================================
// Host
// =============================================================================

#[derive(Debug)]
pub enum HostEvent {
    Frame(Frame),
    Malformed(String),
    Binary,
    /// The token of a `Subscribe` effect did not check out.
    SubscriptionRejected,
    Closed,
}

#[derive(Debug, PartialEq)]
pub enum HostEffect {
    DeliverToPeer {
        pairing_id: PairingId,
        payload: Payload,
    },
    Subscribe {
        token: String,
        platform: Platform,
    },
    Notify {
        kind: NotificationKind,
        context: Option<Payload>,
    },
    Clear,
    Close(Violation),
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Active,
    Closed,
}

/// Protocol state of one authenticated Host socket.
#[derive(Debug)]
pub struct HostSession {
    state: HostState,
}

impl Default for HostSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSession {
    pub const fn new() -> Self {
        Self {
            state: HostState::Active,
        }
    }

    pub const fn state(&self) -> HostState {
        self.state
    }

    pub fn handle(&mut self, event: HostEvent) -> Vec<HostEffect> {
        if self.state == HostState::Closed {
            return Vec::new();
        }

        match event {
            HostEvent::Frame(frame) => self.on_frame(frame),
            HostEvent::Malformed(detail) => self.violation(Violation::Malformed(detail)),
            HostEvent::Binary => self.violation(Violation::BinaryMessage),
            HostEvent::SubscriptionRejected => self.violation(Violation::BadSubscriptionToken),
            HostEvent::Closed => {
                self.state = HostState::Closed;
                vec![HostEffect::Detach]
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Vec<HostEffect> {
        match frame {
            Frame::HostReply {
                pairing_id,
                payload,
            } => vec![HostEffect::DeliverToPeer {
                pairing_id,
                payload,
            }],
            Frame::PnSubscribe { platform, .. } if !platform.is_device() => {
                self.violation(Violation::InvalidPlatform(platform))
            }
            Frame::PnSubscribe { token, platform } => {
                vec![HostEffect::Subscribe { token, platform }]
            }
            Frame::PnSend {
                kind: NotificationKind::Clear,
                ..
            }
            | Frame::PnSend { payload: None, .. } => vec![HostEffect::Clear],
            Frame::PnSend {
                kind,
                payload: Some(context),
            } => vec![HostEffect::Notify {
                kind,
                context: Some(context),
            }],
            other => self.violation(Violation::Unexpected(other.opcode())),
        }
    }

    fn violation(&mut self, violation: Violation) -> Vec<HostEffect> {
        self.state = HostState::Closed;
        vec![HostEffect::Close(violation), HostEffect::Detach]
    }
}

// =============================================================================
// Peer
// =============================================================================

#[derive(Debug)]
pub enum PeerEvent {
    Frame(Frame),
    Malformed(String),
    Binary,
    /// Pairing succeeded with a Host holding `public_key`.
    Paired {
        pairing_id: PairingId,
        public_key: String,
    },
    /// No live Host for the requested code.
    Unavailable,
    Closed,
}

#[derive(Debug, PartialEq)]
pub enum PeerEffect {
    /// Resolve `code` and try to pair with its Host, then report back with
    /// `Paired` or `Unavailable`.
    Pair { code: String },
    ForwardToHost { payload: Payload },
    Send(Frame),
    Close(Violation),
    Unpair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Unpaired,
    Pairing { code: String },
    Paired { pairing_id: PairingId },
    Closed,
}

/// Protocol state of one mobile Peer socket.
#[derive(Debug)]
pub struct PeerSession {
    state: PeerState,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSession {
    pub const fn new() -> Self {
        Self {
            state: PeerState::Unpaired,
        }
    }

    pub const fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn handle(&mut self, event: PeerEvent) -> Vec<PeerEffect> {
        if self.state == PeerState::Closed {
            return Vec::new();
        }

        match event {
            PeerEvent::Frame(frame) => self.on_frame(frame),
            PeerEvent::Malformed(detail) => self.violation(Violation::Malformed(detail)),
            PeerEvent::Binary => self.violation(Violation::BinaryMessage),
            PeerEvent::Paired {
                pairing_id,
                public_key,
            } => {
                self.state = PeerState::Paired { pairing_id };
                vec![PeerEffect::Send(Frame::ConnectResult {
                    public_key: Some(public_key),
                })]
            }
            PeerEvent::Unavailable => {
                self.state = PeerState::Unpaired;
                vec![PeerEffect::Send(Frame::ConnectResult { public_key: None })]
            }
            PeerEvent::Closed => {
                let was_paired = matches!(self.state, PeerState::Paired { .. });
                self.state = PeerState::Closed;
                if was_paired {
                    vec![PeerEffect::Unpair]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Vec<PeerEffect> {
        let paired = matches!(self.state, PeerState::Paired { .. });
        let unpaired = self.state == PeerState::Unpaired;

        match frame {
            Frame::Connect { code } if unpaired => {
                self.state = PeerState::Pairing { code: code.clone() };
                vec![PeerEffect::Pair { code }]
            }
            Frame::Connect { .. } if paired => self.violation(Violation::AlreadyPaired),
            Frame::PeerSend { payload } if paired => vec![PeerEffect::ForwardToHost { payload }],
            Frame::PeerSend { .. } => self.violation(Violation::NotPaired),
            other => self.violation(Violation::Unexpected(other.opcode())),
        }
    }

    fn violation(&mut self, violation: Violation) -> Vec<PeerEffect> {
        let was_paired = matches!(self.state, PeerState::Paired { .. });
        self.state = PeerState::Closed;

        let mut effects = vec![PeerEffect::Close(violation)];
        if was_paired {
            effects.push(PeerEffect::Unpair);
        }
        effects
    }
}
