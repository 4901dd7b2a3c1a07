//! Client-side chunked upload transport.
//!
//! Splits a serialized backup payload into fixed-size chunks and drives a
//! bounded pool of upload workers against the chunk store, publishing
//! progress (speed, ETA) to an observer after every acknowledged chunk.

use crate::chunk::{chunk_digest, split_payload, Chunk, ChunkPlan};
use crate::model::ProgressSnapshot;
use crate::store::{ChunkStore, StartUploadRequest, StoreError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upload {upload_token} was cancelled")]
    Cancelled { upload_token: String },
    #[error("chunk {chunk_number} failed; accepted chunks remain valid, retry the upload: {source}")]
    ChunkFailed {
        chunk_number: u32,
        #[source]
        source: StoreError,
    },
    #[error("all chunks for {upload_token} are accepted but completion failed; retry completion, do not re-send chunks: {source}")]
    CompletionFailed {
        upload_token: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Observer for progress snapshots. Implementations must be cheap; they are
/// called from upload workers after every acknowledged chunk.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

/// Observer that discards snapshots.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub chunk_size: usize,
    pub workers: usize,
    /// Recent chunk timings kept for the speed/ETA rolling average.
    pub progress_window: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            workers: 3,
            progress_window: 5,
        }
    }
}

impl From<&crate::config::Chunking> for TransportConfig {
    fn from(cfg: &crate::config::Chunking) -> Self {
        Self {
            chunk_size: cfg.chunk_size_bytes,
            workers: cfg.upload_workers,
            progress_window: cfg.progress_window,
        }
    }
}

struct UploadState {
    plan: ChunkPlan,
    queue: Mutex<VecDeque<Chunk>>,
    progress: Mutex<ProgressState>,
    halted: AtomicBool,
    first_error: Mutex<Option<TransportError>>,
}

/// Mutated and published under one lock so snapshots observe a consistent,
/// monotone counter.
struct ProgressState {
    uploaded_chunks: u32,
    uploaded_bytes: u64,
    durations: VecDeque<Duration>,
}

pub struct ChunkedUploadTransport {
    store: Arc<dyn ChunkStore>,
    config: TransportConfig,
    cancelled: Arc<AtomicBool>,
}

impl ChunkedUploadTransport {
    pub fn new(store: Arc<dyn ChunkStore>, config: TransportConfig) -> Self {
        Self {
            store,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cooperative cancellation. The flag is checked before each new
    /// chunk dispatch; in-flight chunk uploads are allowed to finish. The
    /// flag is sticky: a cancelled transport stays cancelled, so callers
    /// construct a fresh transport per upload attempt.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Upload a serialized payload as chunks. Returns the upload token on
    /// success; the token also identifies the job for status polling.
    pub async fn upload(
        &self,
        tenant_id: &str,
        payload: &[u8],
        name: &str,
        description: Option<&str>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<String, TransportError> {
        let upload_token = Uuid::new_v4().to_string();
        let plan = ChunkPlan::new(payload.len() as u64, self.config.chunk_size);
        let chunks = split_payload(payload, self.config.chunk_size);

        // The full chunk plan is registered before any chunk data is sent.
        self.store
            .start_upload(&StartUploadRequest {
                upload_token: upload_token.clone(),
                tenant_id: tenant_id.to_string(),
                name: name.to_string(),
                description: description.map(str::to_string),
                total_chunks: plan.total_chunks,
                chunk_size: plan.chunk_size,
                total_size: plan.total_size,
                device_info: None,
            })
            .await?;

        info!(
            token = %upload_token,
            total_chunks = plan.total_chunks,
            total_size = plan.total_size,
            "starting chunked upload"
        );

        let state = Arc::new(UploadState {
            plan,
            queue: Mutex::new(chunks.into()),
            progress: Mutex::new(ProgressState {
                uploaded_chunks: 0,
                uploaded_bytes: 0,
                durations: VecDeque::new(),
            }),
            halted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        });

        let workers = self.config.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let state = state.clone();
            let store = self.store.clone();
            let observer = observer.clone();
            let cancelled = self.cancelled.clone();
            let token = upload_token.clone();
            let window = self.config.progress_window.max(1);
            handles.push(tokio::spawn(async move {
                run_worker(worker, state, store, observer, cancelled, token, window).await;
            }));
        }
        for handle in handles {
            // Workers never panic in normal operation; a join error is a bug.
            if let Err(err) = handle.await {
                warn!(?err, "upload worker join error");
            }
        }

        if self.cancelled.load(Ordering::SeqCst) {
            // Accepted chunks remain valid in the store; the job simply
            // never completes.
            if let Err(err) = self.store.cancel_job(&upload_token).await {
                warn!(?err, token = %upload_token, "failed to record cancellation");
            }
            return Err(TransportError::Cancelled {
                upload_token: upload_token.clone(),
            });
        }

        if let Some(err) = state.first_error.lock().await.take() {
            return Err(err);
        }

        match self.store.complete_upload(&upload_token).await {
            Ok(_) => {
                info!(token = %upload_token, "upload completed");
                Ok(upload_token)
            }
            Err(source) => {
                // Every chunk is accepted, so the job is failed rather than
                // cancelled: a failed job still accepts a completion retry.
                let message = format!("completion failed: {source}");
                if let Err(err) = self.store.fail_job(&upload_token, &message).await {
                    warn!(?err, token = %upload_token, "failed to record completion failure");
                }
                Err(TransportError::CompletionFailed {
                    upload_token,
                    source,
                })
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    state: Arc<UploadState>,
    store: Arc<dyn ChunkStore>,
    observer: Arc<dyn ProgressObserver>,
    cancelled: Arc<AtomicBool>,
    token: String,
    window: usize,
) {
    loop {
        // Dispatch boundary: both cancellation and sibling failure stop new
        // chunks here, never mid-request.
        if cancelled.load(Ordering::SeqCst) || state.halted.load(Ordering::SeqCst) {
            return;
        }
        let chunk = match state.queue.lock().await.pop_front() {
            Some(c) => c,
            None => return,
        };

        let hash = chunk_digest(&chunk.data);
        let started = Instant::now();
        match store.put_chunk(&token, chunk.number, &chunk.data, &hash).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                debug!(worker, chunk = chunk.number, ?elapsed, "chunk accepted");
                publish_progress(&state, &observer, chunk.data.len() as u64, elapsed, window)
                    .await;
            }
            Err(source) => {
                warn!(worker, chunk = chunk.number, ?source, "chunk upload failed");
                state.halted.store(true, Ordering::SeqCst);
                let mut slot = state.first_error.lock().await;
                if slot.is_none() {
                    *slot = Some(TransportError::ChunkFailed {
                        chunk_number: chunk.number,
                        source,
                    });
                }
                return;
            }
        }
    }
}

async fn publish_progress(
    state: &UploadState,
    observer: &Arc<dyn ProgressObserver>,
    chunk_bytes: u64,
    elapsed: Duration,
    window: usize,
) {
    let mut progress = state.progress.lock().await;
    progress.uploaded_chunks += 1;
    progress.uploaded_bytes += chunk_bytes;
    progress.durations.push_back(elapsed);
    while progress.durations.len() > window {
        progress.durations.pop_front();
    }
    let avg = progress.durations.iter().sum::<Duration>() / progress.durations.len() as u32;

    let plan = state.plan;
    let remaining = plan.total_chunks.saturating_sub(progress.uploaded_chunks);
    let current_speed = if avg.as_secs_f64() > 0.0 {
        plan.chunk_size as f64 / avg.as_secs_f64()
    } else {
        0.0
    };

    observer.on_progress(&ProgressSnapshot {
        uploaded_chunks: progress.uploaded_chunks,
        total_chunks: plan.total_chunks,
        uploaded_size: progress.uploaded_bytes,
        total_size: plan.total_size,
        percentage: ((progress.uploaded_chunks as f64 / plan.total_chunks as f64) * 100.0).round()
            as u32,
        current_speed,
        estimated_time_remaining: avg * remaining,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use crate::store::StartUploadResponse;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Store fake that acks every chunk and records the order of calls.
    #[derive(Default)]
    struct RecordingStore {
        started: Mutex<Vec<StartUploadRequest>>,
        chunks: Mutex<Vec<(u32, Vec<u8>, String)>>,
        completed: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
        failed: Mutex<Vec<(String, String)>>,
        fail_chunk: Option<u32>,
        fail_completion: bool,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    #[async_trait]
    impl ChunkStore for RecordingStore {
        async fn start_upload(
            &self,
            req: &StartUploadRequest,
        ) -> Result<StartUploadResponse, StoreError> {
            self.started.lock().await.push(req.clone());
            Ok(StartUploadResponse {
                job_id: 1,
                resumed: false,
                uploaded_chunks: 0,
            })
        }

        async fn put_chunk(
            &self,
            _token: &str,
            chunk_number: u32,
            data: &[u8],
            hash: &str,
        ) -> Result<(), StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_chunk == Some(chunk_number) {
                return Err(StoreError::Server("boom".into()));
            }
            self.chunks
                .lock()
                .await
                .push((chunk_number, data.to_vec(), hash.to_string()));
            Ok(())
        }

        async fn complete_upload(&self, token: &str) -> Result<String, StoreError> {
            if self.fail_completion {
                return Err(StoreError::Server("complete unavailable".into()));
            }
            self.completed.lock().await.push(token.to_string());
            Ok(String::new())
        }

        async fn job_status(&self, _token: &str) -> Result<JobStatus, StoreError> {
            unimplemented!("not used by the transport")
        }

        async fn cancel_job(&self, token: &str) -> Result<(), StoreError> {
            self.cancelled.lock().await.push(token.to_string());
            Ok(())
        }

        async fn fail_job(&self, token: &str, message: &str) -> Result<(), StoreError> {
            self.failed
                .lock()
                .await
                .push((token.to_string(), message.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        snapshots: std::sync::Mutex<Vec<ProgressSnapshot>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
    }

    fn config(chunk_size: usize) -> TransportConfig {
        TransportConfig {
            chunk_size,
            workers: 3,
            progress_window: 5,
        }
    }

    #[tokio::test]
    async fn uploads_all_chunks_and_completes() {
        let store = Arc::new(RecordingStore::default());
        let observer = Arc::new(RecordingObserver::default());
        let transport = ChunkedUploadTransport::new(store.clone(), config(4));

        let payload = b"0123456789"; // 3 chunks of size 4, 4, 2
        let token = transport
            .upload("t1", payload, "backup", None, observer.clone())
            .await
            .unwrap();

        let started = store.started.lock().await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].upload_token, token);
        assert_eq!(started[0].total_chunks, 3);
        assert_eq!(started[0].total_size, 10);

        let mut chunks = store.chunks.lock().await.clone();
        chunks.sort_by_key(|(n, _, _)| *n);
        assert_eq!(chunks.len(), 3);
        let rebuilt: Vec<u8> = chunks.iter().flat_map(|(_, d, _)| d.clone()).collect();
        assert_eq!(rebuilt, payload);
        for (_, data, hash) in &chunks {
            assert_eq!(hash, &chunk_digest(data));
        }

        assert_eq!(*store.completed.lock().await, vec![token]);

        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        // Counter is monotone and finishes at exactly 100 percent.
        let counts: Vec<u32> = snapshots.iter().map(|s| s.uploaded_chunks).collect();
        assert!(counts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(snapshots.last().unwrap().percentage, 100);
        assert_eq!(snapshots.last().unwrap().uploaded_size, 10);
    }

    #[tokio::test]
    async fn bounded_worker_pool_never_exceeds_limit() {
        let store = Arc::new(RecordingStore::default());
        let transport = ChunkedUploadTransport::new(store.clone(), config(1));

        transport
            .upload("t1", &[9u8; 24], "backup", None, Arc::new(NoProgress))
            .await
            .unwrap();
        assert!(store.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn chunk_failure_halts_dispatch_and_surfaces() {
        let store = Arc::new(RecordingStore {
            fail_chunk: Some(2),
            ..Default::default()
        });
        let transport = ChunkedUploadTransport::new(
            store.clone(),
            TransportConfig {
                chunk_size: 2,
                workers: 1,
                progress_window: 5,
            },
        );

        let err = transport
            .upload("t1", &[1u8; 10], "backup", None, Arc::new(NoProgress))
            .await
            .unwrap_err();
        match err {
            TransportError::ChunkFailed { chunk_number, .. } => assert_eq!(chunk_number, 2),
            other => panic!("unexpected error: {other}"),
        }
        // With a single worker, nothing after the failed chunk is dispatched.
        assert_eq!(store.chunks.lock().await.len(), 1);
        assert!(store.completed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_upload_stops_dispatch() {
        let store = Arc::new(RecordingStore::default());
        let transport = ChunkedUploadTransport::new(store.clone(), config(4));

        transport.cancel();
        let err = transport
            .upload("t1", &[5u8; 12], "backup", None, Arc::new(NoProgress))
            .await
            .unwrap_err();
        match err {
            TransportError::Cancelled { upload_token } => {
                assert_eq!(*store.cancelled.lock().await, vec![upload_token]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.chunks.lock().await.is_empty());
        assert!(store.completed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn completion_failure_marks_job_failed_with_retry_hint() {
        let store = Arc::new(RecordingStore {
            fail_completion: true,
            ..Default::default()
        });
        let transport = ChunkedUploadTransport::new(store.clone(), config(4));

        let err = transport
            .upload("t1", &[7u8; 10], "backup", None, Arc::new(NoProgress))
            .await
            .unwrap_err();
        let token = match err {
            TransportError::CompletionFailed { upload_token, .. } => upload_token,
            other => panic!("unexpected error: {other}"),
        };

        // All chunks went through, the job is recorded as failed rather than
        // cancelled, and the failure carries the retry-completion hint.
        assert_eq!(store.chunks.lock().await.len(), 3);
        let failed = store.failed.lock().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, token);
        assert!(failed[0].1.starts_with("completion failed"));
        assert!(store.cancelled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_is_sticky_across_uploads() {
        let store = Arc::new(RecordingStore::default());
        let transport = ChunkedUploadTransport::new(store.clone(), config(4));

        transport.cancel();
        for _ in 0..2 {
            let err = transport
                .upload("t1", &[5u8; 12], "backup", None, Arc::new(NoProgress))
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::Cancelled { .. }));
        }
        assert!(store.chunks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn speed_and_eta_follow_rolling_average() {
        let store = Arc::new(RecordingStore::default());
        let observer = Arc::new(RecordingObserver::default());
        let transport = ChunkedUploadTransport::new(
            store,
            TransportConfig {
                chunk_size: 4,
                workers: 1,
                progress_window: 2,
            },
        );

        transport
            .upload("t1", &[3u8; 12], "backup", None, observer.clone())
            .await
            .unwrap();

        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        // Final snapshot has nothing remaining.
        assert_eq!(
            snapshots.last().unwrap().estimated_time_remaining,
            Duration::ZERO
        );
    }
}
