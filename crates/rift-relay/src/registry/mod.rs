//! Relay Manager bookkeeping: live Hosts and their paired Peers.

pub mod connection;

pub use connection::{
    HostHandle, Outbound, Outbox, Pairing, RelayRegistry, CLOSE_ERROR, CLOSE_NORMAL, CLOSE_POLICY,
};
