use chrono::{NaiveDateTime, Utc};
use sqlx::{query, query_as, FromRow};
use std::sync::Arc;
use tracing::{error, info};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::normalize_database_url;
use crate::errors::{LicenseError, LicenseResult};

pub const STATUS_ACTIVE: &str = "active";

/// A row of the `licenses` table.
#[derive(Debug, Clone, FromRow)]
pub struct License {
    pub id: i64,
    pub email: String,
    pub license_key: String,
    pub product_code: String,
    pub paid_reference: String,
    pub status: String,
    pub machine_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl License {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// True when the license is bound to a machine other than `machine_id`.
    pub fn bound_elsewhere(&self, machine_id: &str) -> bool {
        matches!(self.machine_id.as_deref(), Some(bound) if bound != machine_id)
    }
}

/// Fields supplied when a license is first recorded.
#[derive(Debug, Clone)]
pub struct NewLicense<'a> {
    pub email: &'a str,
    pub license_key: &'a str,
    pub product_code: &'a str,
    pub paid_reference: &'a str,
    /// `None` when the license is created ahead of activation (webhook).
    pub machine_id: Option<&'a str>,
}

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        email          TEXT NOT NULL,
        license_key    TEXT NOT NULL UNIQUE,
        product_code   TEXT NOT NULL,
        paid_reference TEXT NOT NULL UNIQUE,
        status         TEXT NOT NULL DEFAULT 'active',
        machine_id     TEXT,
        created_at     TIMESTAMP NOT NULL,
        updated_at     TIMESTAMP NOT NULL,
        UNIQUE (email, paid_reference)
    )
"#;

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id             BIGSERIAL PRIMARY KEY,
        email          VARCHAR(255) NOT NULL,
        license_key    VARCHAR(64) NOT NULL UNIQUE,
        product_code   VARCHAR(64) NOT NULL,
        paid_reference VARCHAR(128) NOT NULL UNIQUE,
        status         VARCHAR(16) NOT NULL DEFAULT 'active',
        machine_id     VARCHAR(128),
        created_at     TIMESTAMP NOT NULL,
        updated_at     TIMESTAMP NOT NULL,
        UNIQUE (email, paid_reference)
    )
"#;

/// License registry over SQLite or Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Connect using the URL scheme to pick the backend.
    pub async fn connect(database_url: &str) -> LicenseResult<Arc<Self>> {
        let url = normalize_database_url(database_url);

        if url.starts_with("sqlite:") {
            #[cfg(feature = "sqlite")]
            {
                let pool = SqlitePool::connect(&url).await.map_err(|e| {
                    error!("Failed to connect to SQLite: {e}");
                    LicenseError::ServerError(format!("failed to connect to SQLite: {e}"))
                })?;
                return Ok(Arc::new(Database::SQLite(pool)));
            }
            #[cfg(not(feature = "sqlite"))]
            return Err(LicenseError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            ));
        }

        if url.starts_with("postgresql:") {
            #[cfg(feature = "postgres")]
            {
                let pool = PgPool::connect(&url).await.map_err(|e| {
                    error!("Failed to connect to PostgreSQL: {e}");
                    LicenseError::ServerError(format!("failed to connect to PostgreSQL: {e}"))
                })?;
                return Ok(Arc::new(Database::Postgres(pool)));
            }
            #[cfg(not(feature = "postgres"))]
            return Err(LicenseError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            ));
        }

        Err(LicenseError::ConfigError(format!(
            "unsupported database URL: {}",
            url.split(':').next().unwrap_or_default()
        )))
    }

    /// Create the `licenses` table if it does not exist.
    pub async fn migrate(&self) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(SQLITE_SCHEMA).execute(pool).await.map_err(|e| {
                    error!("SQLite migrate failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(POSTGRES_SCHEMA).execute(pool).await.map_err(|e| {
                    error!("Postgres migrate failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
        }
        info!("license registry schema ready");
        Ok(())
    }

    /// Fetch the license created for a payment reference.
    pub async fn get_by_reference(&self, reference: &str) -> LicenseResult<Option<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as::<_, License>("SELECT * FROM licenses WHERE paid_reference = ?")
                    .bind(reference)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_by_reference failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, License>("SELECT * FROM licenses WHERE paid_reference = $1")
                    .bind(reference)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_by_reference failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })
            }
        }
    }

    /// Fetch a license by its key.
    pub async fn get_by_key(&self, license_key: &str) -> LicenseResult<Option<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as::<_, License>("SELECT * FROM licenses WHERE license_key = ?")
                    .bind(license_key)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_by_key failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, License>("SELECT * FROM licenses WHERE license_key = $1")
                    .bind(license_key)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_by_key failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })
            }
        }
    }

    /// Record a license unless one already exists for the reference, then
    /// return whichever row is stored.
    ///
    /// Returns `(license, created)`. Concurrent callers for the same
    /// reference converge on a single row.
    pub async fn insert_if_absent(&self, new: &NewLicense<'_>) -> LicenseResult<(License, bool)> {
        let now = Utc::now().naive_utc();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                r#"
                INSERT INTO licenses (
                    email,
                    license_key,
                    product_code,
                    paid_reference,
                    status,
                    machine_id,
                    created_at,
                    updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(new.email)
            .bind(new.license_key)
            .bind(new.product_code)
            .bind(new.paid_reference)
            .bind(STATUS_ACTIVE)
            .bind(new.machine_id)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite insert_if_absent failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                r#"
                INSERT INTO licenses (
                    email,
                    license_key,
                    product_code,
                    paid_reference,
                    status,
                    machine_id,
                    created_at,
                    updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(new.email)
            .bind(new.license_key)
            .bind(new.product_code)
            .bind(new.paid_reference)
            .bind(STATUS_ACTIVE)
            .bind(new.machine_id)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres insert_if_absent failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        let license = self
            .get_by_reference(new.paid_reference)
            .await?
            .ok_or_else(|| {
                error!(
                    "license for reference {} missing after insert",
                    new.paid_reference
                );
                LicenseError::ServerError("license row missing after insert".to_string())
            })?;

        Ok((license, rows_affected > 0))
    }

    /// Bind an unbound license to `machine_id`.
    ///
    /// The update only applies while `machine_id` is still NULL, so two
    /// machines racing for the same license cannot both win. Returns whether
    /// this call performed the binding.
    pub async fn bind_machine_if_unbound(
        &self,
        reference: &str,
        machine_id: &str,
    ) -> LicenseResult<bool> {
        let now = Utc::now().naive_utc();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                "UPDATE licenses \
                     SET machine_id = ?, updated_at = ? \
                     WHERE paid_reference = ? AND machine_id IS NULL",
            )
            .bind(machine_id)
            .bind(now)
            .bind(reference)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite bind_machine_if_unbound failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                "UPDATE licenses \
                     SET machine_id = $1, updated_at = $2 \
                     WHERE paid_reference = $3 AND machine_id IS NULL",
            )
            .bind(machine_id)
            .bind(now)
            .bind(reference)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres bind_machine_if_unbound failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }
}
