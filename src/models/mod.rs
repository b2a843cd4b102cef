//! Data structures shared by the core and the CLI.

pub mod access_key;
pub mod config;
pub mod identity;
pub mod policy;
pub mod secrets;
