//! SQLite storage for the Rift relay: the Code Registry.
//!
//! Persists Conduit registrations (code ↔ public key), mobile device push
//! tokens and per-code push subscriptions.

mod db;
mod models;
mod queries;
mod queries_notifications;


pub use db::{DatabaseError, RelayDatabase};
pub use models::*;
