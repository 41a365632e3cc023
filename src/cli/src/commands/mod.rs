//! Subcommand implementations.

pub mod access;
pub mod grants;
pub mod migrate;
