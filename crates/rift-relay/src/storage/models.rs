//! Data models for relay storage.

use rift_proto::{NotificationKind, Platform};
use serde::Serialize;

use super::db::DatabaseError;

/// A Conduit's registered public key and the code it is reachable under.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConduitRegistration {
    pub code: String,
    pub public_key: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The current push token of one mobile device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDevice {
    pub device_id: String,
    pub platform: Platform,
    pub token: String,
}

/// One device subscribed to one notification kind for one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
    pub code: String,
    pub device_id: String,
    pub platform: Platform,
    pub kind: NotificationKind,
    pub token: String,
}

/// Where a notification for a code should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub token: String,
    pub device_id: String,
    pub platform: Platform,
}

pub(super) fn parse_platform(raw: &str) -> Result<Platform, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::Query(format!("corrupt platform column: {e}")))
}

pub(super) fn parse_kind(raw: &str) -> Result<NotificationKind, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::Query(format!("corrupt type column: {e}")))
}
