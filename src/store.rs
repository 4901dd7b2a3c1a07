//! Remote contracts for the chunk store and the persistent download jobs.
//!
//! `ChunkStore` models the three verbs the edge functions expose for chunked
//! uploads (start, put-chunk, complete) plus status and cancel. The reqwest
//! implementation talks to the deployed functions; the sqlite implementation
//! is the reference behavior used by tests and local mode, and it is the one
//! that enforces the store-side invariants (hash verification, out-of-order
//! acceptance, completion precondition, idempotent resume).

use crate::chunk::chunk_digest;
use crate::db::{self, NewUploadJob, Pool};
use crate::model::{JobStatus, UploadJob, UploadStatus};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed on {field}: {message}")]
    Validation { field: String, message: String },
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("upload {0} not found")]
    NotFound(String),
    #[error("chunk {chunk_number} hash mismatch")]
    HashMismatch { chunk_number: u32 },
    #[error("chunk {chunk_number} is already accepted and cannot be rewritten")]
    ChunkRewrite { chunk_number: u32 },
    #[error("upload {token} is incomplete: chunk {missing} missing")]
    Incomplete { token: String, missing: u32 },
    #[error("upload {token} is {status} and accepts no further chunks")]
    InvalidState { token: String, status: &'static str },
    #[error("server error: {0}")]
    Server(String),
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Full chunk plan sent before any chunk data.
#[derive(Debug, Clone, Serialize)]
pub struct StartUploadRequest {
    pub upload_token: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub total_size: u64,
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartUploadResponse {
    pub job_id: i64,
    /// True when the token already had a non-terminal job; counters are
    /// preserved, nothing is reset.
    pub resumed: bool,
    pub uploaded_chunks: u32,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Idempotent while the job is non-terminal: calling twice with the same
    /// token resumes rather than restarts.
    async fn start_upload(&self, req: &StartUploadRequest)
        -> Result<StartUploadResponse, StoreError>;

    /// Accepts chunks in any order, keyed by `chunk_number`. Rejects a chunk
    /// whose recomputed digest differs from `hash`.
    async fn put_chunk(
        &self,
        token: &str,
        chunk_number: u32,
        data: &[u8],
        hash: &str,
    ) -> Result<(), StoreError>;

    /// Verifies every chunk `1..=total_chunks` is present (not merely a
    /// count) and returns the assembled document.
    async fn complete_upload(&self, token: &str) -> Result<String, StoreError>;

    async fn job_status(&self, token: &str) -> Result<JobStatus, StoreError>;

    async fn cancel_job(&self, token: &str) -> Result<(), StoreError>;

    /// Records a failure on the job. Accepted chunks stay valid, and unlike
    /// cancellation a failed job still accepts a completion retry.
    async fn fail_job(&self, token: &str, message: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Envelope every edge function replies with: a `success` boolean, or an
/// `error` string plus optional per-field detail on validation failures.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    success: bool,
    error: Option<String>,
    field: Option<String>,
    #[serde(flatten)]
    payload: Option<T>,
}

pub struct HttpChunkStore {
    http: Client,
    base_url: Url,
    auth_token: String,
}

impl fmt::Debug for HttpChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChunkStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpChunkStore {
    pub fn new(http: Client, base_url: Url, auth_token: String) -> Self {
        Self {
            http,
            base_url,
            auth_token,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, StoreError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| StoreError::Server(format!("invalid endpoint {endpoint}: {e}")))?;
        debug!(%url, "chunk store request");
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;

        match res.status() {
            StatusCode::UNAUTHORIZED => return Err(StoreError::Unauthorized),
            StatusCode::BAD_REQUEST => {
                let envelope: ResponseEnvelope<serde_json::Value> = res.json().await?;
                return Err(StoreError::Validation {
                    field: envelope.field.unwrap_or_else(|| "request".into()),
                    message: envelope.error.unwrap_or_else(|| "invalid request".into()),
                });
            }
            status if !status.is_success() => {
                let body = res.text().await.unwrap_or_default();
                return Err(StoreError::Server(format!("{status}: {body}")));
            }
            _ => {}
        }

        let envelope: ResponseEnvelope<T> = res.json().await?;
        if !envelope.success {
            return Err(StoreError::Server(
                envelope.error.unwrap_or_else(|| "unknown failure".into()),
            ));
        }
        envelope
            .payload
            .ok_or_else(|| StoreError::Server("empty success response".into()))
    }

    /// For endpoints whose success response carries no payload beyond the
    /// envelope.
    async fn post_ack(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        let _: serde_json::Value = self.post(endpoint, body).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for HttpChunkStore {
    async fn start_upload(
        &self,
        req: &StartUploadRequest,
    ) -> Result<StartUploadResponse, StoreError> {
        let body = serde_json::to_value(req).map_err(|e| StoreError::Server(e.to_string()))?;
        self.post("functions/v1/start-upload", &body).await
    }

    async fn put_chunk(
        &self,
        token: &str,
        chunk_number: u32,
        data: &[u8],
        hash: &str,
    ) -> Result<(), StoreError> {
        let body = json!({
            "upload_token": token,
            "chunk_number": chunk_number,
            "data": BASE64.encode(data),
            "hash": hash,
        });
        self.post_ack("functions/v1/put-chunk", &body).await
    }

    async fn complete_upload(&self, token: &str) -> Result<String, StoreError> {
        #[derive(Deserialize)]
        struct Completed {
            document: String,
        }
        let body = json!({ "upload_token": token });
        let completed: Completed = self.post("functions/v1/complete-upload", &body).await?;
        Ok(completed.document)
    }

    async fn job_status(&self, token: &str) -> Result<JobStatus, StoreError> {
        let body = json!({ "upload_token": token });
        self.post("functions/v1/job-status", &body).await
    }

    async fn cancel_job(&self, token: &str) -> Result<(), StoreError> {
        let body = json!({ "upload_token": token });
        self.post_ack("functions/v1/cancel-job", &body).await
    }

    async fn fail_job(&self, token: &str, message: &str) -> Result<(), StoreError> {
        let body = json!({ "upload_token": token, "error_message": message });
        self.post_ack("functions/v1/fail-job", &body).await
    }
}

// ---------------------------------------------------------------------------
// Sqlite reference implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteChunkStore {
    pool: Pool,
}

impl SqliteChunkStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn validate_plan(req: &StartUploadRequest) -> Result<(), StoreError> {
        if req.name.trim().is_empty() {
            return Err(StoreError::Validation {
                field: "name".into(),
                message: "must be non-empty".into(),
            });
        }
        if req.chunk_size == 0 {
            return Err(StoreError::Validation {
                field: "chunk_size".into(),
                message: "must be > 0".into(),
            });
        }
        let expected = req
            .total_size
            .div_ceil(req.chunk_size as u64)
            .max(1) as u32;
        if req.total_chunks != expected {
            return Err(StoreError::Validation {
                field: "total_chunks".into(),
                message: format!(
                    "expected ceil({}/{}) = {expected}, got {}",
                    req.total_size, req.chunk_size, req.total_chunks
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn start_upload(
        &self,
        req: &StartUploadRequest,
    ) -> Result<StartUploadResponse, StoreError> {
        Self::validate_plan(req)?;

        if let Some(existing) = db::upload_job_by_token(&self.pool, &req.upload_token).await? {
            // Resume: the job identity is preserved and counters are never
            // reset, even if the job already reached a terminal state.
            return Ok(StartUploadResponse {
                job_id: existing.id,
                resumed: true,
                uploaded_chunks: existing.uploaded_chunks,
            });
        }

        let job_id = db::create_upload_job(
            &self.pool,
            &NewUploadJob {
                upload_token: &req.upload_token,
                tenant_id: &req.tenant_id,
                name: &req.name,
                description: req.description.as_deref(),
                total_chunks: req.total_chunks,
                chunk_size: req.chunk_size,
                total_size: req.total_size,
            },
        )
        .await?;
        Ok(StartUploadResponse {
            job_id,
            resumed: false,
            uploaded_chunks: 0,
        })
    }

    async fn put_chunk(
        &self,
        token: &str,
        chunk_number: u32,
        data: &[u8],
        hash: &str,
    ) -> Result<(), StoreError> {
        let job = db::upload_job_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;

        if job.status.is_terminal() {
            return Err(StoreError::InvalidState {
                token: token.to_string(),
                status: job.status.as_str(),
            });
        }
        if chunk_number == 0 || chunk_number > job.total_chunks {
            return Err(StoreError::Validation {
                field: "chunk_number".into(),
                message: format!("must be in 1..={}", job.total_chunks),
            });
        }
        if data.len() > job.chunk_size as usize {
            return Err(StoreError::Validation {
                field: "data".into(),
                message: format!("chunk exceeds chunk_size {}", job.chunk_size),
            });
        }
        if chunk_digest(data) != hash {
            return Err(StoreError::HashMismatch { chunk_number });
        }

        // Chunks are immutable once accepted. A byte-identical resend is an
        // idempotent ack; anything else is a rewrite attempt.
        if let Some(stored) = db::chunk_hash(&self.pool, token, chunk_number).await? {
            if stored == hash {
                return Ok(());
            }
            return Err(StoreError::ChunkRewrite { chunk_number });
        }

        db::record_chunk(&self.pool, token, chunk_number, data, hash).await?;
        Ok(())
    }

    async fn complete_upload(&self, token: &str) -> Result<String, StoreError> {
        let job = db::upload_job_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;

        if matches!(job.status, UploadStatus::Cancelled) {
            return Err(StoreError::InvalidState {
                token: token.to_string(),
                status: job.status.as_str(),
            });
        }

        // Presence of every chunk number, not merely a matching count.
        let present = db::present_chunk_numbers(&self.pool, token).await?;
        let mut expected = 1u32;
        for number in &present {
            if *number != expected {
                break;
            }
            expected += 1;
        }
        if expected <= job.total_chunks {
            return Err(StoreError::Incomplete {
                token: token.to_string(),
                missing: expected,
            });
        }

        let payload = db::assembled_payload(&self.pool, token).await?;
        let document = String::from_utf8(payload)
            .map_err(|e| StoreError::Server(format!("assembled payload is not UTF-8: {e}")))?;
        db::set_job_status(&self.pool, token, UploadStatus::Completed, None).await?;
        Ok(document)
    }

    async fn job_status(&self, token: &str) -> Result<JobStatus, StoreError> {
        let job = db::upload_job_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        Ok(job_status_of(&job))
    }

    async fn cancel_job(&self, token: &str) -> Result<(), StoreError> {
        let job = db::upload_job_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        // Cancelling a terminal job is a no-op; accepted chunks stay valid
        // either way, the job simply never completes.
        if !job.status.is_terminal() {
            db::set_job_status(&self.pool, token, UploadStatus::Cancelled, None).await?;
        }
        Ok(())
    }

    async fn fail_job(&self, token: &str, message: &str) -> Result<(), StoreError> {
        let job = db::upload_job_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        if !job.status.is_terminal() {
            db::set_job_status(&self.pool, token, UploadStatus::Failed, Some(message)).await?;
        }
        Ok(())
    }
}

pub fn job_status_of(job: &UploadJob) -> JobStatus {
    let progress = if job.total_chunks == 0 {
        0
    } else {
        ((job.uploaded_chunks as f64 / job.total_chunks as f64) * 100.0).round() as u32
    };
    JobStatus {
        status: job.status,
        progress,
        processed_chunks: job.uploaded_chunks,
        total_chunks: job.total_chunks,
        error_message: job.error_message.clone(),
        last_activity: job.last_activity,
    }
}

// ---------------------------------------------------------------------------
// Persistent download jobs (consumed by the monitor)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StartJobOutcome {
    pub upload_token: String,
    pub resumed: bool,
}

/// Server-side persistent job surface: start-or-resume, status, forced
/// recheck, artifact fetch, cancel, and discovery of resumable jobs.
#[async_trait]
pub trait JobService: Send + Sync {
    async fn start_or_resume(
        &self,
        tenant_id: &str,
        job_name: &str,
    ) -> Result<StartJobOutcome, StoreError>;

    async fn status(&self, token: &str) -> Result<JobStatus, StoreError>;

    /// Forced server-side recheck, used as the one-shot nudge for stalled
    /// jobs.
    async fn recheck(&self, token: &str) -> Result<JobStatus, StoreError>;

    async fn fetch_artifact(&self, token: &str) -> Result<Vec<u8>, StoreError>;

    async fn cancel(&self, token: &str) -> Result<(), StoreError>;

    /// Processing jobs for this tenant with activity inside the freshness
    /// window.
    async fn active_jobs(&self, tenant_id: &str, within: Duration)
        -> Result<Vec<UploadJob>, StoreError>;
}

#[async_trait]
impl JobService for SqliteChunkStore {
    async fn start_or_resume(
        &self,
        tenant_id: &str,
        job_name: &str,
    ) -> Result<StartJobOutcome, StoreError> {
        // An existing non-terminal job for the same tenant and name is
        // re-attached; a completed one must not be re-triggered.
        let active = db::active_processing_jobs(&self.pool, tenant_id, Duration::minutes(30))
            .await?;
        if let Some(job) = active.iter().find(|j| j.name == job_name) {
            return Ok(StartJobOutcome {
                upload_token: job.upload_token.clone(),
                resumed: true,
            });
        }

        let token = uuid::Uuid::new_v4().to_string();
        db::create_upload_job(
            &self.pool,
            &NewUploadJob {
                upload_token: &token,
                tenant_id,
                name: job_name,
                description: None,
                total_chunks: 1,
                chunk_size: 1,
                total_size: 1,
            },
        )
        .await?;
        db::set_job_status(&self.pool, &token, UploadStatus::Processing, None).await?;
        Ok(StartJobOutcome {
            upload_token: token,
            resumed: false,
        })
    }

    async fn status(&self, token: &str) -> Result<JobStatus, StoreError> {
        ChunkStore::job_status(self, token).await
    }

    async fn recheck(&self, token: &str) -> Result<JobStatus, StoreError> {
        ChunkStore::job_status(self, token).await
    }

    async fn fetch_artifact(&self, token: &str) -> Result<Vec<u8>, StoreError> {
        Ok(db::assembled_payload(&self.pool, token).await?)
    }

    async fn cancel(&self, token: &str) -> Result<(), StoreError> {
        ChunkStore::cancel_job(self, token).await
    }

    async fn active_jobs(
        &self,
        tenant_id: &str,
        within: Duration,
    ) -> Result<Vec<UploadJob>, StoreError> {
        Ok(db::active_processing_jobs(&self.pool, tenant_id, within).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_digest, split_payload};

    async fn setup_store() -> SqliteChunkStore {
        let pool = Pool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteChunkStore::new(pool)
    }

    fn start_request(token: &str, total_size: u64, chunk_size: u32) -> StartUploadRequest {
        StartUploadRequest {
            upload_token: token.to_string(),
            tenant_id: "t1".into(),
            name: "tour backup".into(),
            description: None,
            total_chunks: total_size.div_ceil(chunk_size as u64).max(1) as u32,
            chunk_size,
            total_size,
            device_info: None,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_on_same_token() {
        let store = setup_store().await;
        let req = start_request("tok", 10, 4);

        let first = store.start_upload(&req).await.unwrap();
        assert!(!first.resumed);

        let chunk = b"abcd";
        store
            .put_chunk("tok", 1, chunk, &chunk_digest(chunk))
            .await
            .unwrap();

        let second = store.start_upload(&req).await.unwrap();
        assert!(second.resumed);
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(second.uploaded_chunks, 1);
    }

    #[tokio::test]
    async fn put_chunk_rejects_hash_mismatch() {
        let store = setup_store().await;
        store.start_upload(&start_request("tok", 4, 4)).await.unwrap();

        let data = b"abcd";
        let mut corrupted = data.to_vec();
        corrupted[0] ^= 1;
        let err = store
            .put_chunk("tok", 1, &corrupted, &chunk_digest(data))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { chunk_number: 1 }));

        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.processed_chunks, 0);
    }

    #[tokio::test]
    async fn chunks_are_immutable_once_accepted() {
        let store = setup_store().await;
        store.start_upload(&start_request("tok", 4, 4)).await.unwrap();

        let data = b"abcd";
        store
            .put_chunk("tok", 1, data, &chunk_digest(data))
            .await
            .unwrap();
        // Byte-identical resend is an idempotent ack.
        store
            .put_chunk("tok", 1, data, &chunk_digest(data))
            .await
            .unwrap();
        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.processed_chunks, 1);

        let other = b"efgh";
        let err = store
            .put_chunk("tok", 1, other, &chunk_digest(other))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChunkRewrite { chunk_number: 1 }));
    }

    #[tokio::test]
    async fn complete_requires_every_chunk_number() {
        let store = setup_store().await;
        let payload = vec![7u8; 10];
        store.start_upload(&start_request("tok", 10, 4)).await.unwrap();

        let chunks = split_payload(&payload, 4);
        assert_eq!(chunks.len(), 3);

        // Chunks 1 and 3 present, 2 missing: count alone would be wrong if
        // chunk 3 were duplicated, presence must be per-number.
        for c in [&chunks[0], &chunks[2]] {
            store
                .put_chunk("tok", c.number, &c.data, &chunk_digest(&c.data))
                .await
                .unwrap();
        }
        let err = store.complete_upload("tok").await.unwrap_err();
        assert!(matches!(err, StoreError::Incomplete { missing: 2, .. }));

        store
            .put_chunk("tok", 2, &chunks[1].data, &chunk_digest(&chunks[1].data))
            .await
            .unwrap();
        let doc = store.complete_upload("tok").await.unwrap();
        assert_eq!(doc.into_bytes(), payload);

        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.status, UploadStatus::Completed);
        assert_eq!(status.progress, 100);
    }

    #[tokio::test]
    async fn out_of_order_chunks_are_accepted() {
        let store = setup_store().await;
        let payload: Vec<u8> = (0..12).collect();
        store.start_upload(&start_request("tok", 12, 4)).await.unwrap();

        let chunks = split_payload(&payload, 4);
        for c in chunks.iter().rev() {
            store
                .put_chunk("tok", c.number, &c.data, &chunk_digest(&c.data))
                .await
                .unwrap();
        }
        let doc = store.complete_upload("tok").await.unwrap();
        assert_eq!(doc.into_bytes(), payload);
    }

    #[tokio::test]
    async fn cancelled_job_rejects_completion() {
        let store = setup_store().await;
        let payload = vec![1u8; 10];
        store.start_upload(&start_request("tok", 10, 4)).await.unwrap();

        let chunks = split_payload(&payload, 4);
        store
            .put_chunk("tok", 1, &chunks[0].data, &chunk_digest(&chunks[0].data))
            .await
            .unwrap();

        store.cancel_job("tok").await.unwrap();
        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.status, UploadStatus::Cancelled);
        // Accepted chunks survive cancellation.
        assert_eq!(status.processed_chunks, 1);

        let err = store.complete_upload("tok").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));

        let err = store
            .put_chunk("tok", 2, &chunks[1].data, &chunk_digest(&chunks[1].data))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn failed_job_still_accepts_completion_retry() {
        let store = setup_store().await;
        let payload = vec![2u8; 10];
        store.start_upload(&start_request("tok", 10, 4)).await.unwrap();

        for c in split_payload(&payload, 4) {
            store
                .put_chunk("tok", c.number, &c.data, &chunk_digest(&c.data))
                .await
                .unwrap();
        }

        ChunkStore::fail_job(&store, "tok", "completion failed: server error")
            .await
            .unwrap();
        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.status, UploadStatus::Failed);
        assert_eq!(
            status.error_message.as_deref(),
            Some("completion failed: server error")
        );

        // Unlike a cancelled job, a failed one completes on retry without
        // re-sending any chunk.
        let doc = store.complete_upload("tok").await.unwrap();
        assert_eq!(doc.into_bytes(), payload);
        let status = ChunkStore::job_status(&store, "tok").await.unwrap();
        assert_eq!(status.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn start_rejects_inconsistent_plan() {
        let store = setup_store().await;
        let mut req = start_request("tok", 10, 4);
        req.total_chunks = 2; // ceil(10/4) is 3
        let err = store.start_upload(&req).await.unwrap_err();
        match err {
            StoreError::Validation { field, .. } => assert_eq!(field, "total_chunks"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn start_or_resume_does_not_retrigger_completed_jobs() {
        let store = setup_store().await;
        let outcome = JobService::start_or_resume(&store, "t1", "full-backup")
            .await
            .unwrap();
        assert!(!outcome.resumed);

        let again = JobService::start_or_resume(&store, "t1", "full-backup")
            .await
            .unwrap();
        assert!(again.resumed);
        assert_eq!(again.upload_token, outcome.upload_token);

        db::set_job_status(store.pool(), &outcome.upload_token, UploadStatus::Completed, None)
            .await
            .unwrap();
        let fresh = JobService::start_or_resume(&store, "t1", "full-backup")
            .await
            .unwrap();
        // Completed job is left alone; a new job identity is created instead.
        assert!(!fresh.resumed);
        assert_ne!(fresh.upload_token, outcome.upload_token);
    }
}
