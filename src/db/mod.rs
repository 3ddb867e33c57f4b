pub mod store;
pub mod dbnotes;
#[cfg(test)]
pub mod memory;

pub use store::{CollaboratorStore, NoteStore, StoreError};
