//! Fan a notification out to every device subscribed to a code.

use std::sync::Arc;

use rift_proto::{NotificationKind, Payload, Platform};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::auth::TokenService;
use crate::storage::{PushTarget, RelayDatabase};

use super::{NotificationError, PushGateway, PushMessage};

/// Resolves subscribers and hands platform-grouped messages to the gateway.
pub struct NotificationDispatcher {
    db: RelayDatabase,
    tokens: Arc<TokenService>,
    gateway: Arc<dyn PushGateway>,
}

impl NotificationDispatcher {
    pub fn new(db: RelayDatabase, tokens: Arc<TokenService>, gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            db,
            tokens,
            gateway,
        }
    }

    /// Push `kind` to every device subscribed to it under `code`.
    ///
    /// Issues at most one gateway call per native platform; web
    /// subscriptions are not pushed. Gateway failures are logged and
    /// swallowed. Returns how many device tokens were handed to the gateway.
    #[instrument(skip(self, context), fields(code = %code, kind = %kind))]
    pub async fn broadcast(
        &self,
        code: &str,
        kind: NotificationKind,
        context: Option<&Payload>,
    ) -> Result<usize, NotificationError> {
        let targets = self.db.tokens_for(code, kind).await?;
        if targets.is_empty() {
            debug!("No subscribers");
            return Ok(0);
        }

        let data = self.envelope(code, kind, context)?;
        let (ios, android) = partition(targets);

        let mut delivered = 0;
        for (platform, tokens) in [(Platform::Ios, ios), (Platform::Android, android)] {
            if tokens.is_empty() {
                continue;
            }
            let count = tokens.len();
            let message = PushMessage::for_kind(platform, kind, tokens, data.clone());
            match self.gateway.send(&message).await {
                Ok(()) => delivered += count,
                Err(e) => warn!(platform = %platform, error = %e, "Push delivery failed"),
            }
        }

        debug!(delivered, "Broadcast complete");
        Ok(delivered)
    }

    /// The `data` object shared by every platform's message.
    ///
    /// Object contexts are merged in; any other non-null context is carried
    /// under `payload`. `type` and `code` always win over context keys.
    fn envelope(
        &self,
        code: &str,
        kind: NotificationKind,
        context: Option<&Payload>,
    ) -> Result<Map<String, Value>, NotificationError> {
        let mut data = Map::new();

        if let Some(context) = context {
            match context
                .to_value()
                .map_err(|e| NotificationError::Context(e.to_string()))?
            {
                Value::Object(fields) => data.extend(fields),
                Value::Null => {}
                other => {
                    data.insert("payload".into(), other);
                }
            }
        }

        data.insert("type".into(), Value::String(kind.as_str().into()));
        data.insert("code".into(), Value::String(code.into()));

        if kind == NotificationKind::ReadyCheck {
            let token = self.tokens.issue_instant_response(code, kind)?;
            data.insert("respondToken".into(), Value::String(token));
        }

        Ok(data)
    }
}

fn partition(targets: Vec<PushTarget>) -> (Vec<String>, Vec<String>) {
    let mut ios = Vec::new();
    let mut android = Vec::new();
    for target in targets {
        match target.platform {
            Platform::Ios => ios.push(target.token),
            Platform::Android => android.push(target.token),
            Platform::Web => {}
        }
    }
    (ios, android)
}
