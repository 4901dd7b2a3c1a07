use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a chunked transfer, shared between client and store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Idle => "idle",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(UploadStatus::Idle),
            "uploading" => Some(UploadStatus::Uploading),
            "processing" => Some(UploadStatus::Processing),
            "completed" => Some(UploadStatus::Completed),
            "failed" => Some(UploadStatus::Failed),
            "cancelled" => Some(UploadStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states stop polling and accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    GoogleDrive,
    Dropbox,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::GoogleDrive => "google_drive",
            CloudProvider::Dropbox => "dropbox",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google_drive" => Some(CloudProvider::GoogleDrive),
            "dropbox" => Some(CloudProvider::Dropbox),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    LocalDownload,
    CloudStorage,
    Both,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::LocalDownload => "local_download",
            DestinationType::CloudStorage => "cloud_storage",
            DestinationType::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local_download" => Some(DestinationType::LocalDownload),
            "cloud_storage" => Some(DestinationType::CloudStorage),
            "both" => Some(DestinationType::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    Immediate,
    Daily,
    Weekly,
}

impl BackupFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupFrequency::Immediate => "immediate",
            BackupFrequency::Daily => "daily",
            BackupFrequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(BackupFrequency::Immediate),
            "daily" => Some(BackupFrequency::Daily),
            "weekly" => Some(BackupFrequency::Weekly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SyncStatus::InProgress),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// One configured backup target for a tenant. Disconnecting flips
/// `is_active` to false; rows are never deleted so sync history stays
/// attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDestination {
    pub id: i64,
    pub tenant_id: String,
    pub destination_type: DestinationType,
    pub cloud_provider: Option<CloudProvider>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub folder_path: Option<String>,
    pub is_active: bool,
    pub auto_backup_enabled: bool,
    pub backup_frequency: BackupFrequency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one sync attempt. Immutable once `completed_at`
/// is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryRecord {
    pub id: i64,
    pub destination_id: i64,
    pub status: SyncStatus,
    pub files_synced: i64,
    pub total_size_bytes: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Server-side record of one chunked transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: i64,
    pub upload_token: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub total_size: u64,
    pub uploaded_chunks: u32,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot returned by the job-status contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: UploadStatus,
    /// 0..=100.
    pub progress: u32,
    pub processed_chunks: u32,
    pub total_chunks: u32,
    pub error_message: Option<String>,
    pub last_activity: DateTime<Utc>,
}

/// Progress published to the transport's observer after every chunk ack.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub uploaded_size: u64,
    pub total_size: u64,
    /// `round(uploaded / total * 100)`.
    pub percentage: u32,
    /// Bytes per second over the recent-chunk window. Zero until the first
    /// chunk lands.
    pub current_speed: f64,
    pub estimated_time_remaining: Duration,
}
