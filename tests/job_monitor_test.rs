//! Monitor wired to the sqlite store: discovery of resumable jobs and
//! delivery of the finished artifact.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tourvault::db;
use tourvault::model::UploadStatus;
use tourvault::monitor::{
    ArtifactSink, JobOutcome, MonitorConfig, MonitorObserver, PersistentJobMonitor,
};
use tourvault::store::{JobService, SqliteChunkStore};

async fn setup_store() -> Arc<SqliteChunkStore> {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    Arc::new(SqliteChunkStore::new(pool))
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ArtifactSink for RecordingSink {
    fn deliver(&self, token: &str, artifact: Vec<u8>) {
        self.delivered
            .lock()
            .unwrap()
            .push((token.to_string(), artifact));
    }
}

#[derive(Default)]
struct RecordingOutcomes {
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl MonitorObserver for RecordingOutcomes {
    fn on_terminal(&self, _token: &str, outcome: &JobOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(20),
        stall_threshold: Duration::from_secs(60),
        resume_window: chrono::Duration::minutes(30),
    }
}

#[tokio::test]
async fn resumed_job_is_polled_to_completion_and_delivered() {
    let store = setup_store().await;
    let outcome = store.start_or_resume("t1", "full-backup").await.unwrap();
    let token = outcome.upload_token.clone();

    db::record_chunk(store.pool(), &token, 1, b"backup-bytes", "unchecked-here")
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let outcomes = Arc::new(RecordingOutcomes::default());
    let monitor = PersistentJobMonitor::new(
        store.clone(),
        sink.clone(),
        outcomes.clone(),
        fast_config(),
    );

    // Fresh process: the job is discovered, not restarted.
    let resumed = monitor.resume_active_jobs("t1").await.unwrap();
    assert_eq!(resumed, 1);
    assert_eq!(monitor.tracked_tokens().await, vec![token.clone()]);

    // Server finishes the job; the monitor notices and pulls the artifact.
    db::set_job_status(store.pool(), &token, UploadStatus::Completed, None)
        .await
        .unwrap();

    for _ in 0..100 {
        if !sink.delivered.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, token);
    assert_eq!(delivered[0].1, b"backup-bytes");
    assert_eq!(*outcomes.outcomes.lock().unwrap(), vec![JobOutcome::Completed]);
}

#[tokio::test]
async fn cancelling_tears_down_tracking_and_the_job() {
    let store = setup_store().await;
    let outcome = store.start_or_resume("t1", "full-backup").await.unwrap();
    let token = outcome.upload_token;

    let outcomes = Arc::new(RecordingOutcomes::default());
    let monitor = PersistentJobMonitor::new(
        store.clone(),
        Arc::new(RecordingSink::default()),
        outcomes.clone(),
        fast_config(),
    );
    monitor.resume_active_jobs("t1").await.unwrap();

    monitor.cancel(&token).await.unwrap();
    assert!(monitor.tracked_tokens().await.is_empty());

    let job = db::upload_job_by_token(store.pool(), &token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, UploadStatus::Cancelled);
    assert_eq!(*outcomes.outcomes.lock().unwrap(), vec![JobOutcome::Cancelled]);
}
