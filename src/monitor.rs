//! Polling monitor for persistent server-side jobs.
//!
//! One polling task per upload token, each independently cancellable. The
//! monitor owns an explicit token→task map with teardown on terminal states
//! and on shutdown; nothing lives in ambient state. Inside `processing` it
//! runs a progress-staleness heuristic: a job whose progress has not moved
//! for longer than the stall threshold gets exactly one forced recheck, and
//! is failed locally if it is still stuck on a later tick.

use crate::model::UploadStatus;
use crate::store::{JobService, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Message surfaced when the stall retry budget is exhausted. Deliberately
/// points at a different workflow instead of suggesting a retry.
pub const STUCK_JOB_MESSAGE: &str =
    "The backup download appears stuck. Use the per-floor-plan structured export instead.";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub stall_threshold: Duration,
    /// Jobs with server-side activity inside this window are re-attached on
    /// resume.
    pub resume_window: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            stall_threshold: Duration::from_secs(300),
            resume_window: chrono::Duration::minutes(30),
        }
    }
}

impl From<&crate::config::Monitor> for MonitorConfig {
    fn from(cfg: &crate::config::Monitor) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            stall_threshold: Duration::from_secs(cfg.stall_threshold_secs),
            resume_window: chrono::Duration::seconds(cfg.resume_window_secs as i64),
        }
    }
}

/// Terminal result of one monitored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed {
        message: String,
        /// True for transient conditions where retrying the same operation
        /// is reasonable; false when a different approach is needed.
        retry_safe: bool,
    },
    Cancelled,
}

/// Receives the finished artifact exactly once per completed job. The
/// browser-download equivalent at this layer.
pub trait ArtifactSink: Send + Sync {
    fn deliver(&self, token: &str, artifact: Vec<u8>);
}

/// Receives terminal outcomes for presentation. The monitor itself never
/// logs-as-recovery; it either retries per the stall rules or surfaces the
/// outcome here.
pub trait MonitorObserver: Send + Sync {
    fn on_terminal(&self, token: &str, outcome: &JobOutcome);
}

pub struct PersistentJobMonitor {
    service: Arc<dyn JobService>,
    sink: Arc<dyn ArtifactSink>,
    observer: Arc<dyn MonitorObserver>,
    config: MonitorConfig,
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl PersistentJobMonitor {
    pub fn new(
        service: Arc<dyn JobService>,
        sink: Arc<dyn ArtifactSink>,
        observer: Arc<dyn MonitorObserver>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            service,
            sink,
            observer,
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start (or resume) a server-side download job and begin polling it.
    /// Re-invoking for a job the server already knows re-attaches instead of
    /// restarting.
    pub async fn start_download(
        &self,
        tenant_id: &str,
        job_name: &str,
    ) -> Result<String, StoreError> {
        let outcome = self.service.start_or_resume(tenant_id, job_name).await?;
        if outcome.resumed {
            info!(token = %outcome.upload_token, "re-attached to existing job");
        }
        self.track(outcome.upload_token.clone()).await;
        Ok(outcome.upload_token)
    }

    /// Cancel a job and tear down its polling task.
    pub async fn cancel(&self, token: &str) -> Result<(), StoreError> {
        self.service.cancel(token).await?;
        if let Some(handle) = self.jobs.lock().await.remove(token) {
            handle.abort();
        }
        self.observer.on_terminal(token, &JobOutcome::Cancelled);
        Ok(())
    }

    /// Re-discover this tenant's processing jobs with fresh activity and
    /// resume polling for each. Safe after a client crash or reload: the
    /// server is the source of truth for job identity, so nothing is lost or
    /// duplicated.
    pub async fn resume_active_jobs(&self, tenant_id: &str) -> Result<usize, StoreError> {
        let jobs = self
            .service
            .active_jobs(tenant_id, self.config.resume_window)
            .await?;
        let mut resumed = 0;
        for job in jobs {
            if self.track(job.upload_token).await {
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Tokens currently being polled.
    pub async fn tracked_tokens(&self) -> Vec<String> {
        self.jobs.lock().await.keys().cloned().collect()
    }

    /// Tear down every polling task.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }

    /// Returns false if the token was already tracked.
    async fn track(&self, token: String) -> bool {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&token) {
            return false;
        }
        let handle = tokio::spawn(poll_job(
            self.service.clone(),
            self.sink.clone(),
            self.observer.clone(),
            self.config.clone(),
            self.jobs.clone(),
            token.clone(),
        ));
        jobs.insert(token, handle);
        true
    }
}

async fn poll_job(
    service: Arc<dyn JobService>,
    sink: Arc<dyn ArtifactSink>,
    observer: Arc<dyn MonitorObserver>,
    config: MonitorConfig,
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    token: String,
) {
    let mut last_change: Option<(u32, Instant)> = None;
    let mut nudged = false;

    loop {
        tokio::time::sleep(config.poll_interval).await;

        let status = match service.status(&token).await {
            Ok(s) => s,
            Err(err) => {
                // Transient poll failures wait for the next scheduled tick.
                warn!(?err, token = %token, "job status poll failed");
                continue;
            }
        };

        match status.status {
            UploadStatus::Completed => {
                // A job is only reported completed once the artifact is in
                // hand; a fetch error is a terminal failure, not a success
                // with a missing download.
                match service.fetch_artifact(&token).await {
                    Ok(artifact) => {
                        sink.deliver(&token, artifact);
                        observer.on_terminal(&token, &JobOutcome::Completed);
                    }
                    Err(err) => {
                        warn!(?err, token = %token, "artifact fetch failed");
                        observer.on_terminal(
                            &token,
                            &JobOutcome::Failed {
                                message: format!(
                                    "The backup finished but the download failed: {err}. \
                                     Retry the download."
                                ),
                                retry_safe: true,
                            },
                        );
                    }
                }
                break;
            }
            UploadStatus::Failed => {
                let message = status
                    .error_message
                    .unwrap_or_else(|| "processing failed".to_string());
                observer.on_terminal(
                    &token,
                    &JobOutcome::Failed {
                        message,
                        retry_safe: true,
                    },
                );
                break;
            }
            UploadStatus::Cancelled => {
                observer.on_terminal(&token, &JobOutcome::Cancelled);
                break;
            }
            _ => {}
        }

        // Staleness only applies while the server is processing; an upload
        // still receiving chunks moves at the client's pace.
        if status.status != UploadStatus::Processing {
            last_change = None;
            nudged = false;
            continue;
        }

        let now = Instant::now();
        match &mut last_change {
            None => last_change = Some((status.progress, now)),
            Some((progress, since)) => {
                if status.progress != *progress {
                    *progress = status.progress;
                    *since = now;
                    nudged = false;
                } else if now.duration_since(*since) >= config.stall_threshold {
                    if !nudged {
                        nudged = true;
                        debug!(token = %token, progress = *progress, "stall detected, forcing recheck");
                        if let Ok(rechecked) = service.recheck(&token).await {
                            if rechecked.progress != *progress {
                                *progress = rechecked.progress;
                                *since = now;
                                nudged = false;
                            }
                        }
                    } else {
                        info!(token = %token, "job still stuck after recheck, failing locally");
                        observer.on_terminal(
                            &token,
                            &JobOutcome::Failed {
                                message: STUCK_JOB_MESSAGE.to_string(),
                                retry_safe: false,
                            },
                        );
                        break;
                    }
                }
            }
        }
    }

    jobs.lock().await.remove(&token);
}
