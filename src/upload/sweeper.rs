//! Abandoned upload sweeper
//!
//! Periodically expires idle session records and removes chunk working sets
//! whose last write is older than the session TTL. Only the `.chunks` trees
//! of known destinations are visited.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::service::UploadService;
use crate::error::Result;

/// Source of the directories whose working sets are swept
#[async_trait]
pub trait Destinations: Send + Sync {
    async fn destinations(&self) -> Result<Vec<PathBuf>>;
}

#[async_trait]
impl Destinations for Vec<PathBuf> {
    async fn destinations(&self) -> Result<Vec<PathBuf>> {
        Ok(self.clone())
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub removed_working_sets: usize,
    pub skipped_locked: usize,
}

/// Background cleanup of abandoned uploads
#[derive(Clone)]
pub struct Sweeper {
    service: UploadService,
    destinations: Arc<dyn Destinations>,
}

impl Sweeper {
    pub fn new(service: UploadService, destinations: impl Destinations + 'static) -> Self {
        Self {
            service,
            destinations: Arc::new(destinations),
        }
    }

    /// Run one sweep
    ///
    /// Targets whose lock is held (finalize, cancel or a direct upload in
    /// progress) are skipped until the next sweep.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let ttl = self.service.settings().session_ttl;
        let mut report = SweepReport {
            expired_sessions: self.service.sessions().cleanup_expired(ttl).await.len(),
            ..Default::default()
        };

        let destinations = self.destinations.destinations().await?;
        let store = self.service.store();
        for set in store.stale_working_sets(&destinations, ttl).await? {
            let Some(_guard) = self.service.locks().try_lock(&set.destination, &set.filename)
            else {
                report.skipped_locked += 1;
                continue;
            };

            // An open session keeps its chunks even when idle on disk
            let in_use = self
                .service
                .sessions()
                .active_sessions()
                .await
                .iter()
                .any(|s| s.destination == set.destination && s.filename == set.filename);
            if in_use {
                continue;
            }

            store.clear(&set.destination, &set.filename).await?;
            report.removed_working_sets += 1;

            tracing::debug!(
                destination = %set.destination.display(),
                filename = %set.filename,
                last_modified = %set.last_modified,
                "Removed abandoned working set"
            );
        }

        if report.expired_sessions > 0 || report.removed_working_sets > 0 {
            tracing::info!(
                expired_sessions = report.expired_sessions,
                removed_working_sets = report.removed_working_sets,
                skipped_locked = report.skipped_locked,
                "Upload sweep finished"
            );
        }

        Ok(report)
    }

    /// Start background sweep task
    pub fn start(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::error!(error = %e, "Upload sweep failed");
                }
            }
        })
    }
}
