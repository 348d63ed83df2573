//! Defines routes for the temporary file host.
//!
//! ## Structure
//! - `GET  /`        — usage notes
//! - `POST /`        — upload (multipart/form-data) or delete (form-encoded)
//! - `GET  /{name}`  — download a stored file
//! - `HEAD /{name}`  — existence check
//! - `GET  /healthz` — liveness
//! - `GET  /readyz`  — readiness

use crate::{
    handlers::{
        archive_handlers::{download, head, index, submit},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Room for multipart boundaries and the small text fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build and return the router. The body limit allows a full-size upload
/// plus multipart framing.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index).post(submit))
        .route("/{name}", get(download).head(head))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES),
        ))
}
