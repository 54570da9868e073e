//! Push device and subscription queries.
//!
//! One dedup rule applies to every write path: a push token belongs to at
//! most one device. When a token shows up under a new device id, rows that
//! carry it for any other device are evicted first.

use rift_core::db::unix_timestamp;
use rift_proto::{NotificationKind, Platform};
use sqlx::{Sqlite, Transaction};

use super::db::{DatabaseError, RelayDatabase};
use super::models::{parse_kind, parse_platform, PushDevice, PushSubscription, PushTarget};

/// Remove every device and subscription row holding `token` for a device
/// other than `device_id`.
async fn evict_token_from_other_devices(
    tx: &mut Transaction<'_, Sqlite>,
    token: &str,
    device_id: &str,
) -> Result<u64, DatabaseError> {
    let subs = sqlx::query("DELETE FROM push_subscriptions WHERE token = ? AND device_id <> ?")
        .bind(token)
        .bind(device_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    let devices = sqlx::query("DELETE FROM push_devices WHERE token = ? AND device_id <> ?")
        .bind(token)
        .bind(device_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    Ok(subs + devices)
}

impl RelayDatabase {
    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Create, replace or (with `token = None`) delete the subscription of
    /// `device_id` to `kind` notifications for `code`.
    ///
    /// Runs as one transaction: eviction of the token from other devices,
    /// removal of the row being replaced, then insertion.
    pub async fn upsert_push_token(
        &self,
        code: &str,
        device_id: &str,
        platform: Platform,
        kind: NotificationKind,
        token: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let Some(token) = token else {
            sqlx::query(
                "DELETE FROM push_subscriptions WHERE code = ? AND device_id = ? AND type = ?",
            )
            .bind(code)
            .bind(device_id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(());
        };

        let evicted = evict_token_from_other_devices(&mut tx, token, device_id).await?;
        if evicted > 0 {
            tracing::info!(device_id, evicted, "Evicted stale device holding reused push token");
        }

        sqlx::query("DELETE FROM push_subscriptions WHERE code = ? AND device_id = ? AND type = ?")
            .bind(code)
            .bind(device_id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO push_subscriptions (code, device_id, platform, type, token, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(code)
        .bind(device_id)
        .bind(platform.as_str())
        .bind(kind.as_str())
        .bind(token)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drop one subscription row. Returns whether a row existed.
    pub async fn remove_subscription(
        &self,
        code: &str,
        device_id: &str,
        kind: NotificationKind,
    ) -> Result<bool, DatabaseError> {
        let removed =
            sqlx::query("DELETE FROM push_subscriptions WHERE code = ? AND device_id = ? AND type = ?")
                .bind(code)
                .bind(device_id)
                .bind(kind.as_str())
                .execute(self.pool())
                .await?
                .rows_affected();

        Ok(removed > 0)
    }

    /// Delivery targets for a notification of `kind` sent under `code`.
    ///
    /// `Clear` reaches every device subscribed to anything for the code.
    pub async fn tokens_for(
        &self,
        code: &str,
        kind: NotificationKind,
    ) -> Result<Vec<PushTarget>, DatabaseError> {
        let rows = if kind == NotificationKind::Clear {
            sqlx::query_as::<_, (String, String, String)>(
                "SELECT DISTINCT token, device_id, platform FROM push_subscriptions \
                 WHERE code = ? ORDER BY device_id",
            )
            .bind(code)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, (String, String, String)>(
                "SELECT token, device_id, platform FROM push_subscriptions \
                 WHERE code = ? AND type = ? ORDER BY device_id",
            )
            .bind(code)
            .bind(kind.as_str())
            .fetch_all(self.pool())
            .await?
        };

        rows.into_iter()
            .map(|(token, device_id, platform)| {
                Ok(PushTarget {
                    token,
                    device_id,
                    platform: parse_platform(&platform)?,
                })
            })
            .collect()
    }

    /// All subscription rows of one device.
    pub async fn subscriptions_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<PushSubscription>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String)>(
            "SELECT code, device_id, platform, type, token FROM push_subscriptions \
             WHERE device_id = ? ORDER BY code, type",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(code, device_id, platform, kind, token)| {
                Ok(PushSubscription {
                    code,
                    device_id,
                    platform: parse_platform(&platform)?,
                    kind: parse_kind(&kind)?,
                    token,
                })
            })
            .collect()
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Record the current push token of a device, or forget the device
    /// entirely when `token` is `None`.
    ///
    /// A new token is copied onto every existing subscription of the device.
    pub async fn register_device(
        &self,
        device_id: &str,
        platform: Platform,
        token: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let Some(token) = token else {
            sqlx::query("DELETE FROM push_subscriptions WHERE device_id = ?")
                .bind(device_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM push_devices WHERE device_id = ?")
                .bind(device_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(());
        };

        let evicted = evict_token_from_other_devices(&mut tx, token, device_id).await?;
        if evicted > 0 {
            tracing::info!(device_id, evicted, "Evicted stale device holding reused push token");
        }

        sqlx::query(
            "INSERT INTO push_devices (device_id, platform, token, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET platform = excluded.platform, \
             token = excluded.token, updated_at = excluded.updated_at",
        )
        .bind(device_id)
        .bind(platform.as_str())
        .bind(token)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE push_subscriptions SET token = ?, platform = ? WHERE device_id = ?")
            .bind(token)
            .bind(platform.as_str())
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Look up a device's current push token.
    pub async fn device(&self, device_id: &str) -> Result<Option<PushDevice>, DatabaseError> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT device_id, platform, token FROM push_devices WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|(device_id, platform, token)| {
            Ok(PushDevice {
                device_id,
                platform: parse_platform(&platform)?,
                token,
            })
        })
        .transpose()
    }
}
