//! Core data models for the temporary file host.
//!
//! Records map to database rows via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod archive;
