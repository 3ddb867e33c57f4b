use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::store::{CollaboratorStore, NoteStore, StoreError};
use crate::models::Note;

/// In-process store used by tests
#[derive(Default)]
pub struct MemoryStore {
    notes: Mutex<HashMap<i64, Note>>,
    collaborators: Mutex<HashSet<(i64, i64)>>,
    updates: AtomicUsize,
    fail_updates: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_note(&self, id: i64, owner_id: i64, content: &str) {
        let now = Utc::now();
        self.notes.lock().unwrap().insert(
            id,
            Note {
                id,
                owner_id,
                title: format!("note {}", id),
                content: content.to_string(),
                is_archived: false,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn add_collaborator(&self, note_id: i64, user_id: i64) {
        self.collaborators.lock().unwrap().insert((note_id, user_id));
    }

    pub fn content(&self, id: i64) -> Option<String> {
        self.notes.lock().unwrap().get(&id).map(|n| n.content.clone())
    }

    /// Number of content updates attempted
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn get_note_by_id(&self, id: i64) -> Result<Note, StoreError> {
        self.notes.lock().unwrap().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update_note_content(&self, id: i64, content: &str) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_updates.lock().unwrap() {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut notes = self.notes.lock().unwrap();
        let note = notes.get_mut(&id).ok_or(StoreError::NotFound)?;
        note.content = content.to_string();
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl CollaboratorStore for MemoryStore {
    async fn is_collaborator(&self, note_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.collaborators.lock().unwrap().contains(&(note_id, user_id)))
    }
}
