//! Filesystem helpers.

pub mod fs;
