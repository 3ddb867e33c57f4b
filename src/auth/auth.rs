use axum::{http::StatusCode, Json};
use tracing::error;

use crate::db::CollaboratorStore;
use crate::models::{error_response, ErrorResponse, Note};

pub fn is_owner(note: &Note, user_id: i64) -> bool {
    note.owner_id == user_id
}

/// Allow the note's owner or any of its collaborators.
///
/// The collaborator lookup is skipped for the owner.
pub async fn ensure_note_access(
    note: &Note,
    user_id: i64,
    collaborators: &dyn CollaboratorStore,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if is_owner(note, user_id) {
        return Ok(());
    }

    match collaborators.is_collaborator(note.id, user_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(error_response(StatusCode::FORBIDDEN, "no access to this note")),
        Err(e) => {
            error!("Failed to check collaborator {} on note {}: {}", user_id, note.id, e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
