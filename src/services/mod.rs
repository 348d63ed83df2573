//! Ephemeral upload lifecycle: expiration policy, blob storage, archive
//! registry, the engine tying them together, and background reclamation.

pub mod blob_store;
pub mod expiration;
pub mod lifecycle;
pub mod reclaimer;
pub mod registry;
