//! CLI command implementations.

pub mod archive;
pub mod backup;
pub mod list;
pub mod recover;
pub mod retention;
