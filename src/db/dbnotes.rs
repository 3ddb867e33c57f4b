use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::time::Duration;
use tracing::{debug, error, info};

use super::store::{CollaboratorStore, NoteStore, StoreError};
use crate::models::Note;

/// Postgres-backed note and collaborator store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound on pooled connections
    ///
    /// # Returns
    /// * `Result<Self, SqlxError>` - Database connection pool or error
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    fn log_pool_state(&self, op: &str, note_id: i64) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} for note {}. Pool connections: {} idle, {} in use",
            op,
            note_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

#[async_trait]
impl NoteStore for PgStore {
    async fn get_note_by_id(&self, id: i64) -> Result<Note, StoreError> {
        self.log_pool_state("Loading note", id);

        // Ids are cast so INT and BIGINT schemas both decode into i64
        let query_sql = r#"
            SELECT
                id::BIGINT AS id,
                owner_id::BIGINT AS owner_id,
                title,
                content,
                is_archived,
                created_at,
                updated_at
            FROM notes
            WHERE id = $1
        "#;

        let note = sqlx::query_as::<_, Note>(query_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error loading note {}: {}", id, e);
                StoreError::from(e)
            })?;

        note.ok_or(StoreError::NotFound)
    }

    async fn update_note_content(&self, id: i64, content: &str) -> Result<(), StoreError> {
        self.log_pool_state("Updating note content", id);

        let result = sqlx::query("UPDATE notes SET content = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error updating note {}: {}", id, e);
                StoreError::from(e)
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CollaboratorStore for PgStore {
    async fn is_collaborator(&self, note_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let query_sql = r#"
            SELECT EXISTS (
                SELECT 1
                FROM note_collaborators
                WHERE note_id = $1
                  AND user_id = $2
            )
        "#;

        let exists: bool = sqlx::query_scalar(query_sql)
            .bind(note_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    "Database error checking collaborator {} on note {}: {}",
                    user_id, note_id, e
                );
                StoreError::from(e)
            })?;

        Ok(exists)
    }
}
