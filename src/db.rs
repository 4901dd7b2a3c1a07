use crate::model::{
    BackupDestination, BackupFrequency, CloudProvider, DestinationType, SyncHistoryRecord,
    SyncStatus, UploadJob, UploadStatus,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Backup destinations
// ---------------------------------------------------------------------------

fn map_destination(row: &SqliteRow) -> Result<BackupDestination> {
    let destination_type: String = row.get("destination_type");
    let cloud_provider: Option<String> = row.get("cloud_provider");
    let backup_frequency: String = row.get("backup_frequency");
    Ok(BackupDestination {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        destination_type: DestinationType::parse(&destination_type)
            .ok_or_else(|| anyhow!("unknown destination_type: {destination_type}"))?,
        cloud_provider: match cloud_provider {
            Some(p) => Some(
                CloudProvider::parse(&p).ok_or_else(|| anyhow!("unknown cloud_provider: {p}"))?,
            ),
            None => None,
        },
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        folder_path: row.get("folder_path"),
        is_active: row.get::<i64, _>("is_active") != 0,
        auto_backup_enabled: row.get::<i64, _>("auto_backup_enabled") != 0,
        backup_frequency: BackupFrequency::parse(&backup_frequency)
            .ok_or_else(|| anyhow!("unknown backup_frequency: {backup_frequency}"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Parameters for a new destination row, typically written by the OAuth
/// callback handler once a provider grant succeeds.
#[derive(Debug, Clone)]
pub struct NewDestination {
    pub tenant_id: String,
    pub destination_type: DestinationType,
    pub cloud_provider: Option<CloudProvider>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub folder_path: Option<String>,
    pub auto_backup_enabled: bool,
    pub backup_frequency: BackupFrequency,
}

#[instrument(skip_all)]
pub async fn insert_destination(pool: &Pool, dest: &NewDestination) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO backup_destinations \
         (tenant_id, destination_type, cloud_provider, access_token, refresh_token, folder_path, \
          is_active, auto_backup_enabled, backup_frequency) \
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?) RETURNING id",
    )
    .bind(&dest.tenant_id)
    .bind(dest.destination_type.as_str())
    .bind(dest.cloud_provider.map(|p| p.as_str()))
    .bind(&dest.access_token)
    .bind(&dest.refresh_token)
    .bind(&dest.folder_path)
    .bind(dest.auto_backup_enabled)
    .bind(dest.backup_frequency.as_str())
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn list_destinations(pool: &Pool, tenant_id: &str) -> Result<Vec<BackupDestination>> {
    let rows = sqlx::query("SELECT * FROM backup_destinations WHERE tenant_id = ? ORDER BY id")
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_destination).collect()
}

#[instrument(skip_all)]
pub async fn destination_by_id(pool: &Pool, id: i64) -> Result<Option<BackupDestination>> {
    let row = sqlx::query("SELECT * FROM backup_destinations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_destination).transpose()
}

/// First active match wins: the data model does not enforce a single active
/// destination per provider.
#[instrument(skip_all)]
pub async fn active_destination(
    pool: &Pool,
    tenant_id: &str,
    provider: Option<CloudProvider>,
) -> Result<Option<BackupDestination>> {
    let row = match provider {
        Some(p) => {
            sqlx::query(
                "SELECT * FROM backup_destinations \
                 WHERE tenant_id = ? AND cloud_provider = ? AND is_active = 1 \
                 ORDER BY id LIMIT 1",
            )
            .bind(tenant_id)
            .bind(p.as_str())
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT * FROM backup_destinations \
                 WHERE tenant_id = ? AND is_active = 1 ORDER BY id LIMIT 1",
            )
            .bind(tenant_id)
            .fetch_optional(pool)
            .await?
        }
    };
    row.as_ref().map(map_destination).transpose()
}

/// Destinations the sync worker considers on each pass: active, with auto
/// backup on and a cloud side to push to.
#[instrument(skip_all)]
pub async fn auto_backup_destinations(pool: &Pool) -> Result<Vec<BackupDestination>> {
    let rows = sqlx::query(
        "SELECT * FROM backup_destinations \
         WHERE is_active = 1 AND auto_backup_enabled = 1 \
           AND destination_type IN ('cloud_storage', 'both') \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_destination).collect()
}

/// Soft delete: history and token records are preserved for audit.
#[instrument(skip_all)]
pub async fn deactivate_destination(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE backup_destinations SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deactivate every other active destination for the same provider, keeping
/// `keep_id` as the canonical one.
#[instrument(skip_all)]
pub async fn deactivate_other_provider_destinations(
    pool: &Pool,
    tenant_id: &str,
    provider: CloudProvider,
    keep_id: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE backup_destinations SET is_active = 0, updated_at = CURRENT_TIMESTAMP \
         WHERE tenant_id = ? AND cloud_provider = ? AND is_active = 1 AND id != ?",
    )
    .bind(tenant_id)
    .bind(provider.as_str())
    .bind(keep_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_destination_settings(
    pool: &Pool,
    id: i64,
    auto_backup_enabled: bool,
    backup_frequency: BackupFrequency,
    folder_path: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE backup_destinations \
         SET auto_backup_enabled = ?, backup_frequency = ?, folder_path = ?, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(auto_backup_enabled)
    .bind(backup_frequency.as_str())
    .bind(folder_path)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync history
// ---------------------------------------------------------------------------

fn map_sync_history(row: &SqliteRow) -> Result<SyncHistoryRecord> {
    let status: String = row.get("status");
    Ok(SyncHistoryRecord {
        id: row.get("id"),
        destination_id: row.get("destination_id"),
        status: SyncStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown sync status: {status}"))?,
        files_synced: row.get("files_synced"),
        total_size_bytes: row.get("total_size_bytes"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
    })
}

#[instrument(skip_all)]
pub async fn start_sync(pool: &Pool, destination_id: i64) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO sync_history (destination_id, status) VALUES (?, 'in_progress') RETURNING id",
    )
    .bind(destination_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Finalize a sync attempt. Rows already carrying a `completed_at` are
/// immutable; a second finalize is an error.
#[instrument(skip_all)]
pub async fn finalize_sync(
    pool: &Pool,
    id: i64,
    status: SyncStatus,
    files_synced: i64,
    total_size_bytes: i64,
    error_message: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE sync_history \
         SET status = ?, files_synced = ?, total_size_bytes = ?, error_message = ?, \
             completed_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND completed_at IS NULL",
    )
    .bind(status.as_str())
    .bind(files_synced)
    .bind(total_size_bytes)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(anyhow!("sync history record {id} is already finalized"));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn recent_sync_history(
    pool: &Pool,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<SyncHistoryRecord>> {
    let rows = sqlx::query(
        "SELECT h.* FROM sync_history h \
         JOIN backup_destinations d ON d.id = h.destination_id \
         WHERE d.tenant_id = ? ORDER BY h.started_at DESC, h.id DESC LIMIT ?",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_sync_history).collect()
}

#[instrument(skip_all)]
pub async fn last_completed_sync_at(
    pool: &Pool,
    destination_id: i64,
) -> Result<Option<DateTime<Utc>>> {
    let ts = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT MAX(completed_at) FROM sync_history \
         WHERE destination_id = ? AND status = 'completed'",
    )
    .bind(destination_id)
    .fetch_one(pool)
    .await?;
    Ok(ts)
}

// ---------------------------------------------------------------------------
// Upload jobs and chunks
// ---------------------------------------------------------------------------

fn map_upload_job(row: &SqliteRow) -> Result<UploadJob> {
    let status: String = row.get("status");
    Ok(UploadJob {
        id: row.get("id"),
        upload_token: row.get("upload_token"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        description: row.get("description"),
        total_chunks: row.get::<i64, _>("total_chunks") as u32,
        chunk_size: row.get::<i64, _>("chunk_size") as u32,
        total_size: row.get::<i64, _>("total_size") as u64,
        uploaded_chunks: row.get::<i64, _>("uploaded_chunks") as u32,
        status: UploadStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown upload status: {status}"))?,
        error_message: row.get("error_message"),
        last_activity: row.get("last_activity"),
        created_at: row.get("created_at"),
    })
}

#[derive(Debug, Clone)]
pub struct NewUploadJob<'a> {
    pub upload_token: &'a str,
    pub tenant_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub total_size: u64,
}

#[instrument(skip_all)]
pub async fn create_upload_job(pool: &Pool, job: &NewUploadJob<'_>) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO upload_jobs \
         (upload_token, tenant_id, name, description, total_chunks, chunk_size, total_size, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 'uploading') RETURNING id",
    )
    .bind(job.upload_token)
    .bind(job.tenant_id)
    .bind(job.name)
    .bind(job.description)
    .bind(job.total_chunks as i64)
    .bind(job.chunk_size as i64)
    .bind(job.total_size as i64)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn upload_job_by_token(pool: &Pool, token: &str) -> Result<Option<UploadJob>> {
    let row = sqlx::query("SELECT * FROM upload_jobs WHERE upload_token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_upload_job).transpose()
}

/// Insert an accepted chunk and bump the job's counter in one transaction.
/// The counter only moves forward; duplicate chunk numbers are the caller's
/// concern (checked against the stored hash before calling this).
#[instrument(skip_all)]
pub async fn record_chunk(
    pool: &Pool,
    token: &str,
    chunk_number: u32,
    data: &[u8],
    hash: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO upload_chunks (upload_token, chunk_number, data, hash) VALUES (?, ?, ?, ?)",
    )
    .bind(token)
    .bind(chunk_number as i64)
    .bind(data)
    .bind(hash)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE upload_jobs \
         SET uploaded_chunks = uploaded_chunks + 1, last_activity = CURRENT_TIMESTAMP \
         WHERE upload_token = ?",
    )
    .bind(token)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn chunk_hash(pool: &Pool, token: &str, chunk_number: u32) -> Result<Option<String>> {
    let hash = sqlx::query_scalar::<_, String>(
        "SELECT hash FROM upload_chunks WHERE upload_token = ? AND chunk_number = ?",
    )
    .bind(token)
    .bind(chunk_number as i64)
    .fetch_optional(pool)
    .await?;
    Ok(hash)
}

#[instrument(skip_all)]
pub async fn present_chunk_numbers(pool: &Pool, token: &str) -> Result<Vec<u32>> {
    let numbers = sqlx::query_scalar::<_, i64>(
        "SELECT chunk_number FROM upload_chunks WHERE upload_token = ? ORDER BY chunk_number",
    )
    .bind(token)
    .fetch_all(pool)
    .await?;
    Ok(numbers.into_iter().map(|n| n as u32).collect())
}

#[instrument(skip_all)]
pub async fn assembled_payload(pool: &Pool, token: &str) -> Result<Vec<u8>> {
    let parts = sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT data FROM upload_chunks WHERE upload_token = ? ORDER BY chunk_number",
    )
    .bind(token)
    .fetch_all(pool)
    .await?;
    Ok(parts.concat())
}

#[instrument(skip_all)]
pub async fn set_job_status(
    pool: &Pool,
    token: &str,
    status: UploadStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE upload_jobs \
         SET status = ?, error_message = ?, last_activity = CURRENT_TIMESTAMP \
         WHERE upload_token = ?",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

/// Jobs still processing with activity inside the freshness window. Used to
/// re-attach polling after a client reload.
#[instrument(skip_all)]
pub async fn active_processing_jobs(
    pool: &Pool,
    tenant_id: &str,
    within: Duration,
) -> Result<Vec<UploadJob>> {
    let cutoff = Utc::now() - within;
    let rows = sqlx::query(
        "SELECT * FROM upload_jobs \
         WHERE tenant_id = ? AND status IN ('uploading', 'processing') \
           AND datetime(last_activity) >= datetime(?) \
         ORDER BY last_activity DESC",
    )
    .bind(tenant_id)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_upload_job).collect()
}

// ---------------------------------------------------------------------------
// Export jobs
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn create_export_job(
    pool: &Pool,
    tenant_id: &str,
    floor_plan_id: &str,
    total_files: i64,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO export_jobs (tenant_id, floor_plan_id, status, total_files) \
         VALUES (?, ?, 'processing', ?) RETURNING id",
    )
    .bind(tenant_id)
    .bind(floor_plan_id)
    .bind(total_files)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn update_export_progress(pool: &Pool, id: i64, processed_files: i64) -> Result<()> {
    sqlx::query(
        "UPDATE export_jobs SET processed_files = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(processed_files)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn finalize_export_job(
    pool: &Pool,
    id: i64,
    status: UploadStatus,
    artifact_path: Option<&str>,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE export_jobs \
         SET status = ?, artifact_path = ?, error_message = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(artifact_path)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn export_job_progress(pool: &Pool, id: i64) -> Result<(String, i64, i64)> {
    let row = sqlx::query(
        "SELECT status, processed_files, total_files FROM export_jobs WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok((
        row.get("status"),
        row.get("processed_files"),
        row.get("total_files"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_destination(tenant: &str) -> NewDestination {
        NewDestination {
            tenant_id: tenant.to_string(),
            destination_type: DestinationType::CloudStorage,
            cloud_provider: Some(CloudProvider::GoogleDrive),
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            folder_path: Some("/backups".into()),
            auto_backup_enabled: true,
            backup_frequency: BackupFrequency::Daily,
        }
    }

    #[tokio::test]
    async fn destination_soft_delete_keeps_row() {
        let pool = setup_pool().await;
        let id = insert_destination(&pool, &sample_destination("t1"))
            .await
            .unwrap();

        let active = active_destination(&pool, "t1", Some(CloudProvider::GoogleDrive))
            .await
            .unwrap();
        assert_eq!(active.map(|d| d.id), Some(id));

        deactivate_destination(&pool, id).await.unwrap();
        assert!(active_destination(&pool, "t1", None).await.unwrap().is_none());

        // Row survives the disconnect.
        let all = list_destinations(&pool, "t1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_active);
        assert_eq!(all[0].refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn sync_history_is_immutable_after_finalize() {
        let pool = setup_pool().await;
        let dest = insert_destination(&pool, &sample_destination("t1"))
            .await
            .unwrap();
        let sync_id = start_sync(&pool, dest).await.unwrap();

        finalize_sync(&pool, sync_id, SyncStatus::Completed, 3, 4096, None)
            .await
            .unwrap();

        let err = finalize_sync(&pool, sync_id, SyncStatus::Failed, 0, 0, Some("nope"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already finalized"));

        let history = recent_sync_history(&pool, "t1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SyncStatus::Completed);
        assert_eq!(history[0].files_synced, 3);
    }

    #[tokio::test]
    async fn upload_job_counter_moves_forward() {
        let pool = setup_pool().await;
        create_upload_job(
            &pool,
            &NewUploadJob {
                upload_token: "tok-1",
                tenant_id: "t1",
                name: "backup",
                description: None,
                total_chunks: 2,
                chunk_size: 4,
                total_size: 6,
            },
        )
        .await
        .unwrap();

        record_chunk(&pool, "tok-1", 2, b"ef", "h2").await.unwrap();
        record_chunk(&pool, "tok-1", 1, b"abcd", "h1").await.unwrap();

        let job = upload_job_by_token(&pool, "tok-1").await.unwrap().unwrap();
        assert_eq!(job.uploaded_chunks, 2);
        assert_eq!(present_chunk_numbers(&pool, "tok-1").await.unwrap(), vec![1, 2]);
        assert_eq!(assembled_payload(&pool, "tok-1").await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn active_jobs_respects_freshness_window() {
        let pool = setup_pool().await;
        create_upload_job(
            &pool,
            &NewUploadJob {
                upload_token: "fresh",
                tenant_id: "t1",
                name: "backup",
                description: None,
                total_chunks: 1,
                chunk_size: 4,
                total_size: 4,
            },
        )
        .await
        .unwrap();
        set_job_status(&pool, "fresh", UploadStatus::Processing, None)
            .await
            .unwrap();

        create_upload_job(
            &pool,
            &NewUploadJob {
                upload_token: "stale",
                tenant_id: "t1",
                name: "backup",
                description: None,
                total_chunks: 1,
                chunk_size: 4,
                total_size: 4,
            },
        )
        .await
        .unwrap();
        set_job_status(&pool, "stale", UploadStatus::Processing, None)
            .await
            .unwrap();
        sqlx::query(
            "UPDATE upload_jobs SET last_activity = datetime('now', '-2 hours') \
             WHERE upload_token = 'stale'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let jobs = active_processing_jobs(&pool, "t1", Duration::minutes(30))
            .await
            .unwrap();
        let tokens: Vec<_> = jobs.iter().map(|j| j.upload_token.as_str()).collect();
        assert_eq!(tokens, vec!["fresh"]);
    }
}
