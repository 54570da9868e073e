//! SQLite database handle for the Rift relay.

pub use rift_core::db::DatabaseError;

rift_core::define_database!(RelayDatabase, "relay");
