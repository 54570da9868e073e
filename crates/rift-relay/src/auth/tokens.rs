//! Token issuance and verification.

use std::collections::HashSet;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rift_core::db::unix_timestamp;
use rift_proto::NotificationKind;
use tracing::debug;

use super::claims::{Claims, TokenKind};

/// Lifetimes of each token kind, in seconds. `None` never expires.
#[derive(Debug, Clone, Copy)]
pub struct TokenTtls {
    pub connection: Option<i64>,
    pub push_subscription: Option<i64>,
    pub instant_response: i64,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            connection: None,
            push_subscription: None,
            instant_response: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to sign token: {0}")]
pub struct TokenError(#[from] jsonwebtoken::errors::Error);

/// Signs and verifies Rift tokens with a single shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttls: TokenTtls,
}

impl TokenService {
    /// Create a `TokenService` with default lifetimes.
    pub fn new(secret: &[u8]) -> Self {
        Self::with_ttls(secret, TokenTtls::default())
    }

    pub fn with_ttls(secret: &[u8], ttls: TokenTtls) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Long-lived tokens have no `exp`; it is still checked when present.
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttls,
        }
    }

    /// Token a Conduit presents when opening its Host socket.
    pub fn issue_connection(&self, code: &str) -> Result<String, TokenError> {
        self.issue(TokenKind::Connection, code, None, None, self.ttls.connection)
    }

    /// Token that lets a device subscribe to pushes for `code`, optionally
    /// bound to one device id.
    pub fn issue_push_subscription(
        &self,
        code: &str,
        device: Option<&str>,
    ) -> Result<String, TokenError> {
        self.issue(
            TokenKind::PushSubscription,
            code,
            device,
            None,
            self.ttls.push_subscription,
        )
    }

    /// Short-lived token embedded in a notification so the device can answer
    /// it without pairing.
    pub fn issue_instant_response(
        &self,
        code: &str,
        kind: NotificationKind,
    ) -> Result<String, TokenError> {
        self.issue(
            TokenKind::InstantResponse,
            code,
            None,
            Some(kind),
            Some(self.ttls.instant_response),
        )
    }

    /// Verify a token and return its claims if it is a valid token of `kind`.
    ///
    /// Bad signatures, expired tokens, malformed claims and kind mismatches
    /// all yield `None`.
    pub fn verify(&self, kind: TokenKind, token: &str) -> Option<Claims> {
        let claims = match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
        {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "Token rejected");
                return None;
            }
        };

        if claims.kind != kind {
            debug!(expected = ?kind, actual = ?claims.kind, "Token kind mismatch");
            return None;
        }

        Some(claims)
    }

    fn issue(
        &self,
        kind: TokenKind,
        code: &str,
        device: Option<&str>,
        notification_type: Option<NotificationKind>,
        ttl: Option<i64>,
    ) -> Result<String, TokenError> {
        let now = unix_timestamp();
        let claims = Claims {
            jti: uuid::Uuid::new_v4().to_string(),
            kind,
            code: code.to_string(),
            device: device.map(str::to_string),
            notification_type,
            iat: now,
            exp: ttl.map(|ttl| now + ttl),
        };

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }
}
