//! Represents one uploaded file for as long as it is allowed to live.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single uploaded blob.
///
/// Every field is fixed at creation. The row is removed either by a
/// token-authenticated delete or by the reclamation loop once
/// `expiration` has passed.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq)]
pub struct Archive {
    /// Internal UUID assigned on insert.
    pub id: Uuid,

    /// Stored blob name (generated identifier plus original extension).
    /// Joins the record to its blob.
    pub name: String,

    /// When the upload was accepted.
    #[sqlx(rename = "upload")]
    pub uploaded_at: DateTime<Utc>,

    /// When the archive becomes eligible for reclamation.
    #[sqlx(rename = "expiration")]
    pub expires_at: DateTime<Utc>,

    /// Secret deletion credential. Never serialized back out of the registry.
    #[serde(skip_serializing)]
    pub token: String,
}
