use tracing::{debug, error};

use super::connection::Connection;
use crate::models::{PatchBroadcast, PatchMessage, SendMessage, ERR_SAVE_FAILED};

/// Handle PatchMessage - Persist, then Broadcast.
///
/// The patch is the note's full new content and overwrites whatever is
/// stored. Concurrent writers on the same note are not coordinated: the last
/// save to complete wins. `version` is echoed back untouched.
pub async fn handle_patch_message(patch_msg: PatchMessage, conn: &Connection) {
    debug!(
        "Patch received for note {}: user={}, version={}",
        conn.note_id, conn.user_id, patch_msg.version
    );

    if let Err(e) = conn.notes.update_note_content(conn.note_id, &patch_msg.patch).await {
        error!("Failed to save note {} for user {}: {}", conn.note_id, conn.user_id, e);
        conn.reply_error(ERR_SAVE_FAILED);
        return;
    }

    let broadcast_msg = SendMessage::Patch(PatchBroadcast {
        note_id: conn.note_id,
        patch: patch_msg.patch,
        user_id: conn.user_id,
        version: patch_msg.version,
    });
    match broadcast_msg.encode() {
        Ok(payload) => conn.hub.broadcast(conn.note_id, payload),
        Err(e) => error!("Failed to encode patch for note {}: {}", conn.note_id, e),
    }
}
