use async_trait::async_trait;
use thiserror::Error;

use crate::models::Note;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Note persistence consumed by the realtime layer.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn get_note_by_id(&self, id: i64) -> Result<Note, StoreError>;

    /// Overwrite the note's content. No merge, no version check: the last call
    /// to complete wins.
    async fn update_note_content(&self, id: i64, content: &str) -> Result<(), StoreError>;

    /// Cheap connectivity probe for the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CollaboratorStore: Send + Sync {
    async fn is_collaborator(&self, note_id: i64, user_id: i64) -> Result<bool, StoreError>;
}
