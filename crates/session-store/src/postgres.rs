use async_trait::async_trait;
use common::CheckoutId;
use domain::CheckoutSession;
use sqlx::PgPool;

use crate::{Result, SessionStore, StoreError};

/// PostgreSQL-backed session store.
///
/// Sessions are stored as JSONB documents in `checkout_sessions`, with the
/// owner, status and expiry mirrored into plain columns for indexing.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Creates a new PostgreSQL session store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[tracing::instrument(skip(self, session), fields(checkout_id = %session.id))]
    async fn create(&self, session: &CheckoutSession) -> Result<()> {
        let document = serde_json::to_value(session)?;

        let result = sqlx::query(
            r#"
            INSERT INTO checkout_sessions (id, user_id, status, expires_at, created_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_str())
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(document)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(session.id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutSession>> {
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM checkout_sessions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    #[tracing::instrument(skip(self, session), fields(checkout_id = %session.id, status = %session.status))]
    async fn update(&self, session: &CheckoutSession) -> Result<()> {
        let document = serde_json::to_value(session)?;

        let result = sqlx::query(
            r#"
            UPDATE checkout_sessions
            SET user_id = $2, status = $3, expires_at = $4, updated_at = $5, document = $6
            WHERE id = $1
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_str())
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.updated_at)
        .bind(document)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session.id));
        }
        Ok(())
    }
}
