//! Rift wire protocol
//!
//! Types shared by the relay and its two kinds of clients:
//! - [`Frame`]: the decoded form of every `[opcode, ...args]` socket message
//! - [`Payload`]: opaque, end-to-end encrypted JSON carried verbatim
//! - [`Platform`] and [`NotificationKind`] used by the push subscription flow

pub mod frame;
pub mod types;

pub use frame::{Frame, FrameError, Opcode, Payload};
pub use types::{is_valid_code, NotificationKind, PairingId, Platform, CODE_LENGTH};
