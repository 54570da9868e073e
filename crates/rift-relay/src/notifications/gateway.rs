//! Push gateway client.
//!
//! The relay does not talk to APNs or FCM directly. It posts one JSON
//! [`PushMessage`] per platform group to a gateway that fans it out.

use std::time::Duration;

use async_trait::async_trait;
use rift_proto::{NotificationKind, Platform};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::NotificationError;

/// How long a single gateway request may take.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// iOS presentation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IosAlert {
    pub title: String,
    pub body: String,
    pub sound: String,
    pub badge: u32,
    pub category: String,
}

/// Android presentation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidAlert {
    pub channel_id: String,
    pub title: String,
    pub body: String,
}

/// One push request covering every device token of one platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub platform: Platform,
    pub tokens: Vec<String>,
    /// Delivered to the app untouched; always carries `type` and `code`.
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ios: Option<IosAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidAlert>,
}

struct AlertText {
    title: &'static str,
    body: &'static str,
    channel: &'static str,
}

/// Visible text for a notification kind; `Clear` is data-only.
const fn alert_text(kind: NotificationKind) -> Option<AlertText> {
    match kind {
        NotificationKind::ReadyCheck => Some(AlertText {
            title: "Match found",
            body: "Your ready check is waiting. Accept or decline.",
            channel: "ready-check",
        }),
        NotificationKind::GameStarted => Some(AlertText {
            title: "Game started",
            body: "Your game is loading.",
            channel: "game-started",
        }),
        NotificationKind::Clear => None,
    }
}

impl PushMessage {
    /// Build the message for one platform group.
    ///
    /// `Web` has no native presentation fields; callers skip it.
    pub fn for_kind(
        platform: Platform,
        kind: NotificationKind,
        tokens: Vec<String>,
        data: Map<String, Value>,
    ) -> Self {
        let text = alert_text(kind);

        let ios = match (platform, &text) {
            (Platform::Ios, Some(text)) => Some(IosAlert {
                title: text.title.to_string(),
                body: text.body.to_string(),
                sound: "default".to_string(),
                badge: 1,
                category: kind.as_str().to_string(),
            }),
            _ => None,
        };
        let android = match (platform, &text) {
            (Platform::Android, Some(text)) => Some(AndroidAlert {
                channel_id: text.channel.to_string(),
                title: text.title.to_string(),
                body: text.body.to_string(),
            }),
            _ => None,
        };

        Self {
            platform,
            tokens,
            data,
            ios,
            android,
        }
    }
}

/// Outbound seam to the push gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), NotificationError>;
}

/// Where the HTTP push gateway lives.
#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    pub url: String,
    /// Sent as a bearer token when present.
    pub token: Option<String>,
}

/// [`PushGateway`] that POSTs each message as JSON.
#[derive(Debug)]
pub struct HttpPushGateway {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpPushGateway {
    /// Build the client.
    ///
    /// Installs the `ring` crypto provider, since reqwest is built with
    /// `rustls-no-provider` (no-op if a provider is already installed).
    pub fn new(config: PushGatewayConfig) -> Result<Self, NotificationError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;

        debug!(url = %config.url, has_token = config.token.is_some(), "Push gateway client initialized");

        Ok(Self {
            http,
            url: config.url,
            token: config.token,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), NotificationError> {
        let mut request = self.http.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(platform = %message.platform, tokens = message.tokens.len(), "Push sent");
            Ok(())
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "Push gateway returned error");
            Err(NotificationError::Gateway {
                status: status_code,
                body,
            })
        }
    }
}

/// [`PushGateway`] used when no gateway is configured: drops everything.
#[derive(Debug, Default)]
pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), NotificationError> {
        debug!(
            platform = %message.platform,
            tokens = message.tokens.len(),
            "No push gateway configured; dropping notification"
        );
        Ok(())
    }
}
