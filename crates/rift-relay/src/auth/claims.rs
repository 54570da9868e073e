//! JWT claims for Rift tokens.

use rift_proto::NotificationKind;
use serde::{Deserialize, Serialize};

/// What a token may be used for.
///
/// Every kind is signed with the same secret; `kind` is the only thing that
/// keeps one from standing in for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    /// Lets a Conduit open its Host socket for `code`.
    Connection,
    /// Lets a device subscribe to pushes for `code`.
    PushSubscription,
    /// Lets a notification action reach the Host for `code` once.
    InstantResponse,
}

/// JWT claims embedded in every Rift token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// JWT ID (unique per token).
    pub jti: String,
    pub kind: TokenKind,
    /// Conduit code the token is bound to.
    pub code: String,
    /// Device a push-subscription token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Notification an instant-response token answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<NotificationKind>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp); long-lived tokens carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}
