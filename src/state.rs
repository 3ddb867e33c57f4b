use std::sync::Arc;

use crate::config::Config;
use crate::db::{CollaboratorStore, NoteStore};
use crate::ws::hub::HubHandle;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub notes: Arc<dyn NoteStore>,
    pub collaborators: Arc<dyn CollaboratorStore>,
    pub jwt_secret: Option<Arc<str>>,
    pub ws_send_buffer: usize,
    pub ws_max_message_bytes: usize,
}

impl AppState {
    pub fn new(
        config: &Config,
        hub: HubHandle,
        notes: Arc<dyn NoteStore>,
        collaborators: Arc<dyn CollaboratorStore>,
    ) -> Self {
        Self {
            hub,
            notes,
            collaborators,
            jwt_secret: config.jwt_secret.as_deref().map(Arc::from),
            ws_send_buffer: config.ws_send_buffer,
            ws_max_message_bytes: config.ws_max_message_bytes,
        }
    }
}

/// Caller identity resolved by the auth middleware
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}
