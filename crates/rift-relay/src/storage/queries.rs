//! Conduit registration queries.

use rand::RngExt;
use rift_core::db::unix_timestamp;
use sqlx::{Sqlite, Transaction};

use super::db::{DatabaseError, RelayDatabase};
use super::models::ConduitRegistration;

/// Draw a uniformly random six-digit code, zero padded.
fn random_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

impl RelayDatabase {
    // =========================================================================
    // Conduit registrations
    // =========================================================================

    /// Return the code registered for `public_key`, registering it under a
    /// fresh random code if it is not known yet.
    ///
    /// Registration is idempotent: the same key always yields the same code.
    /// Runs in one transaction that opens with a write, so the key check and
    /// the insert see a single consistent state. Code collisions are retried.
    pub async fn generate_code(&self, public_key: &str) -> Result<String, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        loop {
            let candidate = random_code();
            let now = unix_timestamp();

            // Ignores both a taken code and an already registered key.
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO conduit_registrations (code, public_key, created_at, updated_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&candidate)
            .bind(public_key)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let code = if inserted == 1 {
                Some(candidate)
            } else {
                code_for_key(&mut tx, public_key).await?
            };

            if let Some(code) = code {
                tx.commit().await?;
                return Ok(code);
            }
            tracing::debug!("Code collision during registration, retrying");
        }
    }

    /// Look up the registration for a code.
    pub async fn lookup_code(
        &self,
        code: &str,
    ) -> Result<Option<ConduitRegistration>, DatabaseError> {
        let registration = sqlx::query_as::<_, ConduitRegistration>(
            "SELECT * FROM conduit_registrations WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await?;

        Ok(registration)
    }

    /// Replace the public key stored for `code`.
    ///
    /// Returns `false` if the code is unknown, or if the key is already
    /// registered under a different code.
    pub async fn try_update_key(&self, code: &str, public_key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE conduit_registrations SET public_key = ?, updated_at = ? WHERE code = ?",
        )
        .bind(public_key)
        .bind(unix_timestamp())
        .bind(code)
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn code_for_key(
    tx: &mut Transaction<'_, Sqlite>,
    public_key: &str,
) -> Result<Option<String>, DatabaseError> {
    let code = sqlx::query_scalar::<_, String>(
        "SELECT code FROM conduit_registrations WHERE public_key = ?",
    )
    .bind(public_key)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(code)
}
