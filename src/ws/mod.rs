pub mod hub;
pub mod connection;
pub mod handler;
pub mod msg_patch_handler;
