//! Scheduled cloud sync worker.
//!
//! A single background loop scans for active destinations with auto backup
//! enabled, decides per destination whether a sync is due from its
//! frequency and last completed run, and pushes a freshly assembled backup
//! document to the provider. Every attempt opens a sync_history row up
//! front and finalizes it exactly once, success or failure, so the history
//! stays a faithful append-only log.

use crate::backup;
use crate::db::{self, Pool};
use crate::model::{BackupDestination, BackupFrequency, CloudProvider, SyncStatus};
use crate::provider::{CloudStorage, DropboxClient, GoogleDriveClient};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("destination {0} has no cloud provider")]
    NoProvider(i64),
    #[error("destination {0} has no stored credentials")]
    NoCredentials(i64),
    #[error(transparent)]
    Backup(#[from] backup::BackupError),
    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// When the next sync is due. `None` means the destination never syncs
/// automatically (should not happen for rows the scan returns).
pub fn next_due(
    frequency: BackupFrequency,
    last_completed: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let last = match last_completed {
        // Never synced: due immediately.
        None => return Some(DateTime::<Utc>::MIN_UTC),
        Some(last) => last,
    };
    match frequency {
        BackupFrequency::Immediate => Some(last),
        BackupFrequency::Daily => Some(last + ChronoDuration::days(1)),
        BackupFrequency::Weekly => Some(last + ChronoDuration::weeks(1)),
    }
}

pub fn is_due(
    frequency: BackupFrequency,
    last_completed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match next_due(frequency, last_completed) {
        Some(due) => due <= now,
        None => false,
    }
}

/// Builds a provider client for a destination's stored credentials.
pub trait StorageFactory: Send + Sync {
    fn client_for(&self, dest: &BackupDestination) -> Result<Arc<dyn CloudStorage>, SyncError>;
}

pub struct ProviderRegistry {
    http: Client,
}

impl ProviderRegistry {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl StorageFactory for ProviderRegistry {
    fn client_for(&self, dest: &BackupDestination) -> Result<Arc<dyn CloudStorage>, SyncError> {
        let provider = dest.cloud_provider.ok_or(SyncError::NoProvider(dest.id))?;
        let token = dest
            .access_token
            .clone()
            .ok_or(SyncError::NoCredentials(dest.id))?;
        Ok(match provider {
            CloudProvider::GoogleDrive => {
                Arc::new(GoogleDriveClient::new(self.http.clone(), token))
            }
            CloudProvider::Dropbox => Arc::new(DropboxClient::new(self.http.clone(), token)),
        })
    }
}

pub struct SyncWorker {
    pool: Pool,
    factory: Arc<dyn StorageFactory>,
    poll_interval: Duration,
}

impl SyncWorker {
    pub fn new(pool: Pool, factory: Arc<dyn StorageFactory>, poll_interval: Duration) -> Self {
        Self {
            pool,
            factory,
            poll_interval,
        }
    }

    /// Run the scan loop until the task is aborted. Errors in a pass are
    /// logged and the loop keeps going.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                if let Err(err) = self.run_once().await {
                    error!(?err, "sync pass failed");
                }
            }
        })
    }

    /// One scan: sync every destination that is due. Returns how many
    /// destinations were synced.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> anyhow::Result<u32> {
        let now = Utc::now();
        let mut synced = 0;
        for dest in db::auto_backup_destinations(&self.pool).await? {
            let last = db::last_completed_sync_at(&self.pool, dest.id).await?;
            if !is_due(dest.backup_frequency, last, now) {
                continue;
            }
            match self.sync_destination(&dest).await {
                Ok(()) => synced += 1,
                Err(err) => {
                    warn!(?err, destination = dest.id, "destination sync failed");
                }
            }
        }
        if synced > 0 {
            info!(synced, "sync pass finished");
        }
        Ok(synced)
    }

    /// Push one backup to one destination, bracketed by its history row.
    #[instrument(skip_all, fields(destination = dest.id))]
    pub async fn sync_destination(&self, dest: &BackupDestination) -> anyhow::Result<()> {
        let history_id = db::start_sync(&self.pool, dest.id).await?;

        match self.push_backup(dest).await {
            Ok(size) => {
                db::finalize_sync(&self.pool, history_id, SyncStatus::Completed, 1, size, None)
                    .await?;
                debug!(bytes = size, "backup pushed");
                Ok(())
            }
            Err(err) => {
                db::finalize_sync(
                    &self.pool,
                    history_id,
                    SyncStatus::Failed,
                    0,
                    0,
                    Some(&err.to_string()),
                )
                .await?;
                Err(err.into())
            }
        }
    }

    async fn push_backup(&self, dest: &BackupDestination) -> Result<i64, SyncError> {
        let client = self.factory.client_for(dest)?;
        let doc = backup::assemble(&self.pool, &dest.tenant_id).await?;
        let body = serde_json::to_vec_pretty(&doc).map_err(backup::BackupError::from)?;
        let size = body.len() as i64;

        let folder = dest.folder_path.as_deref().unwrap_or("");
        let name = format!("tour-backup-{}.json", Utc::now().format("%Y%m%d-%H%M%S"));
        client
            .upload_file(folder, &name, "application/json", body)
            .await?;
        Ok(size)
    }
}
