//! Core business logic modules.

pub mod audit_log;
pub mod config;
pub mod file_lock;
pub mod key_record;
pub mod lifecycle;
pub mod node_counter;
pub mod paths;
pub mod secret_sync;
