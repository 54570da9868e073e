//! Rift Relay Server Library
//!
//! Rendezvous relay between desktop Conduits and mobile clients:
//! - SQLite Code Registry (code ↔ public key, push devices, subscriptions)
//! - Signed connection / push-subscription / instant-response tokens
//! - Host and Peer WebSocket relaying keyed by six-digit codes
//! - Push notification dispatch with scheduled clears
//! - HTTP façade over all of the above

pub mod auth;
pub mod config;
pub mod notifications;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
pub mod storage;

pub use config::RelayConfig;
pub use server::build_router;
pub use state::AppState;
