//! Socket frames.
//!
//! Every message on a Host or Peer socket is a JSON array whose first
//! element is a numeric [`Opcode`] followed by positional arguments. The
//! array is decoded exactly once, at the transport boundary, into a
//! [`Frame`]; nothing past that point touches raw arrays.
//!
//! Decoding is strict. Unknown opcodes, missing or surplus arguments and
//! mistyped arguments are all rejected, and the relay treats any rejection
//! as a protocol violation.

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::types::{NotificationKind, PairingId, Platform};

/// Numeric frame discriminator, the first element of every frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Open = 0,
    Msg = 1,
    Close = 2,
    Connect = 3,
    ConnectResult = 4,
    PeerSend = 5,
    HostReply = 6,
    PeerReceive = 7,
    PnSubscribe = 8,
    PnSend = 9,
    PnRespond = 10,
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Msg => "MSG",
            Self::Close => "CLOSE",
            Self::Connect => "CONNECT",
            Self::ConnectResult => "CONNECT_RESULT",
            Self::PeerSend => "PEER_SEND",
            Self::HostReply => "HOST_REPLY",
            Self::PeerReceive => "PEER_RECEIVE",
            Self::PnSubscribe => "PN_SUBSCRIBE",
            Self::PnSend => "PN_SEND",
            Self::PnRespond => "PN_RESPOND",
        }
    }
}

impl TryFrom<u64> for Opcode {
    type Error = FrameError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Open,
            1 => Self::Msg,
            2 => Self::Close,
            3 => Self::Connect,
            4 => Self::ConnectResult,
            5 => Self::PeerSend,
            6 => Self::HostReply,
            7 => Self::PeerReceive,
            8 => Self::PnSubscribe,
            9 => Self::PnSend,
            10 => Self::PnRespond,
            other => return Err(FrameError::UnknownOpcode(other)),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque JSON value relayed between a Peer and its Host.
///
/// Holds the exact JSON text received; it is written back out unchanged.
#[derive(Debug, Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wrap a JSON document, validating only that it is well-formed JSON.
    pub fn from_json(json: impl Into<String>) -> Result<Self, FrameError> {
        RawValue::from_string(json.into())
            .map(Self)
            .map_err(FrameError::Json)
    }

    /// Serialize any value into a payload.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, FrameError> {
        serde_json::value::to_raw_value(value)
            .map(Self)
            .map_err(FrameError::Json)
    }

    /// The raw JSON text, exactly as received.
    pub fn as_json(&self) -> &str {
        self.0.get()
    }

    /// Parse into a `serde_json::Value`, for payloads the relay itself consumes.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(self.0.get())
    }

    fn is_null(raw: &RawValue) -> bool {
        raw.get().trim() == "null"
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// A decoded socket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Relay tells a Host that a new Peer paired under `pairing_id`.
    Open { pairing_id: PairingId },
    /// Relay hands a Host a Peer's payload.
    Msg {
        pairing_id: PairingId,
        payload: Payload,
    },
    /// Relay tells a Host that the Peer behind `pairing_id` went away.
    Close { pairing_id: PairingId },
    /// Peer asks to be paired with the Host registered under `code`.
    Connect { code: String },
    /// Relay answers a `Connect`; `None` means no desktop is reachable.
    ConnectResult { public_key: Option<String> },
    /// Peer sends a payload to its Host.
    PeerSend { payload: Payload },
    /// Host sends a payload to one of its Peers.
    HostReply {
        pairing_id: PairingId,
        payload: Payload,
    },
    /// Relay hands a Peer its Host's payload.
    PeerReceive { payload: Payload },
    /// Host subscribes a device to its notifications.
    PnSubscribe { token: String, platform: Platform },
    /// Host fires (or, with no payload, clears) a notification.
    PnSend {
        kind: NotificationKind,
        payload: Option<Payload>,
    },
    /// Relay forwards an instant response from a notification to the Host.
    PnRespond {
        kind: NotificationKind,
        response: String,
    },
}

impl Frame {
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Open { .. } => Opcode::Open,
            Self::Msg { .. } => Opcode::Msg,
            Self::Close { .. } => Opcode::Close,
            Self::Connect { .. } => Opcode::Connect,
            Self::ConnectResult { .. } => Opcode::ConnectResult,
            Self::PeerSend { .. } => Opcode::PeerSend,
            Self::HostReply { .. } => Opcode::HostReply,
            Self::PeerReceive { .. } => Opcode::PeerReceive,
            Self::PnSubscribe { .. } => Opcode::PnSubscribe,
            Self::PnSend { .. } => Opcode::PnSend,
            Self::PnRespond { .. } => Opcode::PnRespond,
        }
    }

    /// Decode a frame from the text of one socket message.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let parts: Vec<&RawValue> = serde_json::from_str(text).map_err(FrameError::Json)?;
        let (head, rest) = parts.split_first().ok_or(FrameError::Empty)?;
        let raw_opcode: u64 =
            serde_json::from_str(head.get()).map_err(|_| FrameError::BadOpcode)?;
        let opcode = Opcode::try_from(raw_opcode)?;
        let mut args = Args {
            opcode,
            items: rest.iter(),
        };

        let frame = match opcode {
            Opcode::Open => Self::Open {
                pairing_id: args.next()?,
            },
            Opcode::Msg => Self::Msg {
                pairing_id: args.next()?,
                payload: args.payload()?,
            },
            Opcode::Close => Self::Close {
                pairing_id: args.next()?,
            },
            Opcode::Connect => Self::Connect { code: args.next()? },
            Opcode::ConnectResult => Self::ConnectResult {
                public_key: args.next()?,
            },
            Opcode::PeerSend => Self::PeerSend {
                payload: args.payload()?,
            },
            Opcode::HostReply => Self::HostReply {
                pairing_id: args.next()?,
                payload: args.payload()?,
            },
            Opcode::PeerReceive => Self::PeerReceive {
                payload: args.payload()?,
            },
            Opcode::PnSubscribe => Self::PnSubscribe {
                token: args.next()?,
                platform: args.next()?,
            },
            Opcode::PnSend => Self::PnSend {
                kind: args.next()?,
                payload: args.optional_payload()?,
            },
            Opcode::PnRespond => Self::PnRespond {
                kind: args.next()?,
                response: args.next()?,
            },
        };

        args.finish()?;
        Ok(frame)
    }

    /// Encode this frame as the text of one socket message.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Json)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        seq.serialize_element(&(self.opcode() as u8))?;
        match self {
            Self::Open { pairing_id } | Self::Close { pairing_id } => {
                seq.serialize_element(pairing_id)?;
            }
            Self::Msg {
                pairing_id,
                payload,
            }
            | Self::HostReply {
                pairing_id,
                payload,
            } => {
                seq.serialize_element(pairing_id)?;
                seq.serialize_element(payload)?;
            }
            Self::Connect { code } => seq.serialize_element(code)?,
            Self::ConnectResult { public_key } => seq.serialize_element(public_key)?,
            Self::PeerSend { payload } | Self::PeerReceive { payload } => {
                seq.serialize_element(payload)?;
            }
            Self::PnSubscribe { token, platform } => {
                seq.serialize_element(token)?;
                seq.serialize_element(platform)?;
            }
            Self::PnSend { kind, payload } => {
                seq.serialize_element(kind)?;
                seq.serialize_element(payload)?;
            }
            Self::PnRespond { kind, response } => {
                seq.serialize_element(kind)?;
                seq.serialize_element(response)?;
            }
        }
        seq.end()
    }
}

/// Positional argument reader for one frame.
struct Args<'a> {
    opcode: Opcode,
    items: std::slice::Iter<'a, &'a RawValue>,
}

impl<'a> Args<'a> {
    fn raw(&mut self) -> Result<&'a RawValue, FrameError> {
        self.items
            .next()
            .copied()
            .ok_or(FrameError::Arity(self.opcode))
    }

    fn next<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        let raw = self.raw()?;
        serde_json::from_str(raw.get()).map_err(|source| FrameError::Argument {
            opcode: self.opcode,
            source,
        })
    }

    fn payload(&mut self) -> Result<Payload, FrameError> {
        Ok(Payload(self.raw()?.to_owned()))
    }

    fn optional_payload(&mut self) -> Result<Option<Payload>, FrameError> {
        let raw = self.raw()?;
        if Payload::is_null(raw) {
            Ok(None)
        } else {
            Ok(Some(Payload(raw.to_owned())))
        }
    }

    fn finish(mut self) -> Result<(), FrameError> {
        if self.items.next().is_some() {
            return Err(FrameError::Arity(self.opcode));
        }
        Ok(())
    }
}

/// Why a message could not be decoded into a [`Frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not a JSON array: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame is empty")]
    Empty,

    #[error("frame opcode is not an unsigned integer")]
    BadOpcode,

    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),

    #[error("wrong number of arguments for {0}")]
    Arity(Opcode),

    #[error("invalid argument for {opcode}: {source}")]
    Argument {
        opcode: Opcode,
        #[source]
        source: serde_json::Error,
    },
}
