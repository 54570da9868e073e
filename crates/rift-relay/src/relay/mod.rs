//! Relay Manager: the Host and Peer WebSocket endpoints.
//!
//! A Conduit (Host) holds one authenticated socket per code. Mobile clients
//! (Peers) `CONNECT` to a code and are paired with that Host; their payloads
//! are relayed verbatim in both directions.

pub mod session;
pub mod socket;
pub mod upgrade;

pub use session::{
    HostEffect, HostEvent, HostSession, HostState, PeerEffect, PeerEvent, PeerSession, PeerState,
    Violation,
};
pub use upgrade::{authenticate_host, host_upgrade, peer_upgrade, HostQuery};
