//! Rift Core Library
//!
//! Plumbing shared by Rift components:
//! - SQLite pool creation and the `define_database!` macro
//! - Tracing subscriber initialisation

pub mod db;
pub mod tracing_init;

pub use db::{unix_timestamp, DatabaseError};
