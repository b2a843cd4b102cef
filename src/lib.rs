//! Provision an IAM user with an inline policy and one access key, and mirror
//! the key into a GitHub repository's Actions secrets. Teardown reverses it.
//!
//! ## Modules
//! - `cli`: Command-line handlers
//! - `core`: Lifecycle protocol, key records, config, audit, node counters
//! - `models`: Config and policy data structures
//! - `providers`: IAM and GitHub adapters behind the lifecycle's traits
//! - `util`: Filesystem helpers

pub mod cli;
pub mod constants;
pub mod core;
pub mod error;
pub mod models;
pub mod providers;
pub mod util;
