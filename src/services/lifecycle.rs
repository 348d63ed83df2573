//! src/services/lifecycle.rs
//!
//! LifecycleEngine: keeps blobs and archive records consistent across
//! upload, download and token-authenticated deletion.
//!
//! Ordering rules:
//! - upload writes the blob before inserting the record, and removes the
//!   blob again if the insert fails;
//! - deletion removes the blob before the record, treating an already
//!   missing blob as success.

use crate::{
    models::archive::Archive,
    services::{
        blob_store::{BlobError, BlobReader, BlobStore},
        expiration::ExpirationPolicy,
        registry::{ArchiveRegistry, RegistryError},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use std::{path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TOKEN_BYTES: usize = 32;
const SECRET_SUFFIX_BYTES: usize = 8;
const SHORT_NAME_LEN: usize = 8;
const MAX_EXTENSION_LEN: usize = 16;
const NAME_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Input(String),
    #[error("File too large. Maximum is {0} bytes")]
    TooLarge(usize),
    #[error("File not found or already deleted")]
    NotFound,
    #[error("storage failure: {0}")]
    Storage(#[from] BlobError),
    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Everything the serving layer extracted from an upload request.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub original_filename: Option<String>,
    /// Generate the longer, harder to enumerate name.
    pub long_name: bool,
    /// Raw duration request such as `"12h"`.
    pub expires: Option<String>,
}

/// What the uploader gets back.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub delete_token: String,
    pub advisory: Option<String>,
}

impl UploadReceipt {
    /// Public download reference: `{base}/{name}`.
    pub fn download_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.name)
    }
}

/// Orchestrates the blob store, registry and expiration policy. Cheap to
/// clone; every clone shares the same injected handles.
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn BlobStore>,
    registry: Arc<dyn ArchiveRegistry>,
    policy: ExpirationPolicy,
    max_upload_bytes: usize,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn BlobStore>,
        registry: Arc<dyn ArchiveRegistry>,
        policy: ExpirationPolicy,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
            max_upload_bytes,
        }
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    /// Store a new upload and register it.
    ///
    /// Input problems are rejected before anything is written. A registry
    /// failure after the blob landed rolls the blob back before the error
    /// is returned.
    pub async fn upload(
        &self,
        request: UploadRequest,
        now: DateTime<Utc>,
    ) -> LifecycleResult<UploadReceipt> {
        if request.bytes.is_empty() {
            return Err(LifecycleError::Input("No file provided".into()));
        }
        if request.bytes.len() > self.max_upload_bytes {
            return Err(LifecycleError::TooLarge(self.max_upload_bytes));
        }

        let ext = request.original_filename.as_deref().and_then(extension);
        let mut attempt = 0;
        let name = loop {
            attempt += 1;
            let stem = if request.long_name {
                long_name()
            } else {
                short_name()
            };
            let name = match &ext {
                Some(ext) => format!("{stem}.{ext}"),
                None => stem,
            };
            match self.store.put(&name, &request.bytes).await {
                Ok(()) => break name,
                Err(BlobError::AlreadyExists(_)) if attempt < NAME_ATTEMPTS => {
                    debug!("name {} already taken, regenerating", name);
                }
                Err(err) => return Err(err.into()),
            }
        };

        let expiration = self.policy.compute(now, request.expires.as_deref());
        let archive = Archive {
            id: Uuid::new_v4(),
            name,
            uploaded_at: now,
            expires_at: expiration.expires_at,
            token: delete_token(),
        };

        if let Err(err) = self.registry.insert(&archive).await {
            error!("registering upload {} failed: {}", archive.name, err);
            match self.store.delete(&archive.name).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {
                    debug!("rolled back blob {}", archive.name)
                }
                Err(rollback_err) => warn!(
                    "rollback of blob {} failed, it is now orphaned: {}",
                    archive.name, rollback_err
                ),
            }
            return Err(err.into());
        }

        info!(
            "stored {} ({} bytes), expires {}",
            archive.name,
            request.bytes.len(),
            archive.expires_at
        );

        Ok(UploadReceipt {
            name: archive.name,
            uploaded_at: archive.uploaded_at,
            expires_at: archive.expires_at,
            delete_token: archive.token,
            advisory: expiration.advisory,
        })
    }

    /// Delete an upload by its management token.
    ///
    /// Unknown and already-deleted tokens both yield `NotFound`.
    pub async fn delete(&self, token: &str) -> LifecycleResult<()> {
        if token.is_empty() {
            return Err(LifecycleError::Input("Missing delete token".into()));
        }

        let archive = match self.registry.find_by_token(token).await {
            Ok(archive) => archive,
            Err(RegistryError::NotFound) => return Err(LifecycleError::NotFound),
            Err(err) => return Err(err.into()),
        };

        match self.store.delete(&archive.name).await {
            Ok(()) => {}
            Err(BlobError::NotFound(_)) => debug!("blob {} already absent", archive.name),
            Err(err) => return Err(err.into()),
        }

        match self.registry.delete_by_token(token).await {
            Ok(()) => info!("deleted {} on request", archive.name),
            // Reclaimed concurrently; the end state is the same.
            Err(RegistryError::NotFound) => debug!("record {} already removed", archive.name),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Whether a blob is currently stored under `name`.
    pub async fn exists(&self, name: &str) -> LifecycleResult<bool> {
        Ok(self.store.exists(name).await?)
    }

    /// Open a stored blob for download. Invalid names read as not found.
    pub async fn open(&self, name: &str) -> LifecycleResult<BlobReader> {
        match self.store.open(name).await {
            Ok(blob) => Ok(blob),
            Err(BlobError::NotFound(_) | BlobError::InvalidName) => Err(LifecycleError::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}

/// First eight hex characters of a random UUID.
fn short_name() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_NAME_LEN);
    id
}

/// `{uuid}-{16 hex chars}`, for capability-style URLs.
fn long_name() -> String {
    let mut suffix = [0u8; SECRET_SUFFIX_BYTES];
    OsRng.fill_bytes(&mut suffix);
    format!("{}-{}", Uuid::new_v4(), hex::encode(suffix))
}

fn delete_token() -> String {
    let mut token = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut token);
    hex::encode(token)
}

/// Lowercased extension of the original filename's last component, kept
/// only when it is short and purely alphanumeric.
fn extension(original: &str) -> Option<String> {
    let last = original.rsplit(['/', '\\']).next()?;
    let ext = Path::new(last).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
