//! Shared handler state. Every field is a cheap handle; the state is
//! cloned into each request.

use crate::services::lifecycle::LifecycleEngine;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub engine: LifecycleEngine,
    /// Pool behind the registry, used directly only by readiness checks.
    pub db: Arc<SqlitePool>,
    pub storage_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub max_upload_bytes: usize,
}
