//! src/services/reclaimer.rs
//!
//! Background reclamation of expired uploads.
//!
//! Each pass asks the registry for everything expired as of `now`, then for
//! each record removes the blob followed by the record. A failure on one
//! record is logged and the pass moves on; a failed query ends the pass and
//! the next tick tries again. Because `expiration` never changes, anything
//! left half-done is picked up by a later pass.

use crate::services::{
    blob_store::{BlobError, BlobStore},
    registry::{ArchiveRegistry, RegistryResult},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters for a single pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub expired: usize,
    pub reclaimed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reclaimer {
    store: Arc<dyn BlobStore>,
    registry: Arc<dyn ArchiveRegistry>,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(
        store: Arc<dyn BlobStore>,
        registry: Arc<dyn ArchiveRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            interval,
        }
    }

    /// Run one reclamation pass against `now`.
    ///
    /// Only a failed expiry query is returned as an error. Per-record
    /// failures are counted in the report.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> RegistryResult<PassReport> {
        let expired = self.registry.list_expired(now).await?;
        let mut report = PassReport {
            expired: expired.len(),
            ..Default::default()
        };

        for archive in expired {
            match self.store.delete(&archive.name).await {
                Ok(()) => debug!("reclaimed blob {}", archive.name),
                Err(BlobError::NotFound(_)) => debug!("blob {} already absent", archive.name),
                Err(err) => {
                    warn!("could not remove expired blob {}: {}", archive.name, err);
                    report.failed += 1;
                    continue;
                }
            }

            match self.registry.delete_by_id(archive.id).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => debug!("record {} already removed", archive.name),
                Err(err) => {
                    warn!("could not remove expired record {}: {}", archive.name, err);
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 {
            info!(
                "reclamation pass: expired={} reclaimed={} failed={}",
                report.expired, report.reclaimed, report.failed
            );
        }
        Ok(report)
    }

    /// Run passes on the configured interval until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between passes, so a pass in progress is
    /// finished and no new one is started.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("reclaimer started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_pass(Utc::now()).await {
                        warn!("reclamation pass aborted: {}", err);
                    }
                }
            }
        }

        info!("reclaimer stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
