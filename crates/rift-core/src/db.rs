//! SQLite plumbing shared by Rift's stores.
//!
//! [`connect`] opens a pool for a [`Location`]. [`define_database!`] wraps
//! such a pool in a typed handle that has already run the crate's
//! migrations by the time it is returned.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::debug;

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("cannot prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open database: {0}")]
    Open(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Where a pool keeps its data.
#[derive(Debug, Clone, Copy)]
pub enum Location<'a> {
    /// A file on disk, created along with its parent directory if missing.
    File(&'a Path),
    /// A private in-memory database that lives as long as the pool.
    Memory,
}

/// Open a `SQLite` pool at `location`.
///
/// File databases run in WAL mode with a five second busy timeout. An
/// in-memory pool is pinned to one connection that never expires, because
/// every connection to `:memory:` sees its own empty database.
pub async fn connect(location: Location<'_>) -> Result<Pool<Sqlite>, DatabaseError> {
    let (url, pool_options) = match location {
        Location::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            (
                format!("sqlite:{}?mode=rwc", path.display()),
                SqlitePoolOptions::new().max_connections(5),
            )
        }
        Location::Memory => (
            "sqlite::memory:".to_owned(),
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        ),
    };

    let mut options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| DatabaseError::Open(e.to_string()))?
        .foreign_keys(true);
    if let Location::File(_) = location {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Open(e.to_string()))?;
    debug!(?location, "SQLite pool ready");
    Ok(pool)
}

/// Seconds since the Unix epoch.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Declare a cloneable database handle backed by [`connect`].
///
/// The handle gets `open(path)`, `open_in_memory()` and `pool()`. Both
/// constructors apply the migrations in the calling crate's `./migrations`
/// directory before returning.
///
/// ```ignore
/// rift_core::define_database!(RelayDatabase, "relay");
/// ```
#[macro_export]
macro_rules! define_database {
    ($name:ident, $label:literal) => {
        #[derive(Clone)]
        pub struct $name {
            pool: ::sqlx::Pool<::sqlx::Sqlite>,
        }

        impl $name {
            /// Open or create the database file at `path`.
            pub async fn open(
                path: &::std::path::Path,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                Self::migrated($crate::db::Location::File(path)).await
            }

            /// Open a throwaway in-memory database.
            pub async fn open_in_memory() -> ::std::result::Result<Self, $crate::db::DatabaseError>
            {
                Self::migrated($crate::db::Location::Memory).await
            }

            async fn migrated(
                location: $crate::db::Location<'_>,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let pool = $crate::db::connect(location).await?;
                ::sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| $crate::db::DatabaseError::Migration(e.to_string()))?;
                ::tracing::info!(store = $label, "Migrations applied");
                Ok(Self { pool })
            }

            pub const fn pool(&self) -> &::sqlx::Pool<::sqlx::Sqlite> {
                &self.pool
            }
        }
    };
}
