//! End to end: assemble a backup, push it through the chunked transport
//! into the store, reassemble it on completion, and restore it into a
//! fresh database.

use async_trait::async_trait;
use std::sync::Arc;
use tourvault::backup::{self, MediaStore, RestoreMode};
use tourvault::db;
use tourvault::store::SqliteChunkStore;
use tourvault::transport::{ChunkedUploadTransport, NoProgress, TransportConfig};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn seed_tenant(pool: &sqlx::SqlitePool, tenant_id: &str) {
    sqlx::query("INSERT INTO tours (id, tenant_id, name) VALUES ('tour-1', ?, 'Showroom')")
        .bind(tenant_id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO floor_plans (id, tour_id, name, image_url) \
         VALUES ('plan-1', 'tour-1', 'Main', 'https://old.example/main.png')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO hotspots (id, floor_plan_id, label, x, y) \
         VALUES ('hs-1', 'plan-1', 'Entrance', 0.4, 0.6)",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO panorama_photos (id, hotspot_id, url, caption) \
         VALUES ('ph-1', 'hs-1', 'https://old.example/pano.jpg', 'Front door')",
    )
    .execute(pool)
    .await
    .unwrap();
}

struct CdnMediaStore;

#[async_trait]
impl MediaStore for CdnMediaStore {
    async fn store(&self, tenant_id: &str, source_url: &str) -> anyhow::Result<String> {
        let name = source_url.rsplit('/').next().unwrap_or("file");
        Ok(format!("https://cdn.example/{tenant_id}/{name}"))
    }
}

#[tokio::test]
async fn backup_survives_chunked_transport_and_restores_elsewhere() {
    let source = setup_pool().await;
    seed_tenant(&source, "t1").await;

    let doc = backup::assemble(&source, "t1").await.unwrap();
    let payload = serde_json::to_vec(&doc).unwrap();

    // Small chunks force a multi-chunk, multi-worker transfer.
    let store = Arc::new(SqliteChunkStore::new(setup_pool().await));
    let transport = ChunkedUploadTransport::new(
        store.clone(),
        TransportConfig {
            chunk_size: 128,
            workers: 3,
            progress_window: 5,
        },
    );
    let token = transport
        .upload("t1", &payload, "full-backup", None, Arc::new(NoProgress))
        .await
        .unwrap();

    // The store already assembled the document during completion; fetch it
    // back the way the monitor would.
    let assembled = db::assembled_payload(store.pool(), &token).await.unwrap();
    assert_eq!(assembled, payload);

    let received = backup::parse_document(std::str::from_utf8(&assembled).unwrap()).unwrap();
    assert_eq!(received.statistics, doc.statistics);

    let target = setup_pool().await;
    let summary = backup::restore(&target, &CdnMediaStore, &received, "t2", RestoreMode::Full)
        .await
        .unwrap();
    assert_eq!(summary.tours, 1);
    assert_eq!(summary.media_rehomed, 2);

    let urls: Vec<String> =
        sqlx::query_scalar("SELECT url FROM panorama_photos ORDER BY hotspot_id")
            .fetch_all(&target)
            .await
            .unwrap();
    assert_eq!(urls, vec!["https://cdn.example/t2/pano.jpg".to_string()]);

    let plan_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM floor_plans")
        .fetch_one(&target)
        .await
        .unwrap();
    assert_eq!(plan_count, 1);
}

#[tokio::test]
async fn interrupted_upload_resumes_without_resending_chunks() {
    use tourvault::chunk::{chunk_digest, split_payload};
    use tourvault::store::{ChunkStore, StartUploadRequest};

    let store = SqliteChunkStore::new(setup_pool().await);
    let payload = r#"{"version":"1.0","tours":[]}"#.repeat(100).into_bytes();
    let chunks = split_payload(&payload, 1024);
    assert_eq!(chunks.len(), 3);

    let req = StartUploadRequest {
        upload_token: "resume-tok".into(),
        tenant_id: "t1".into(),
        name: "full-backup".into(),
        description: None,
        total_chunks: 3,
        chunk_size: 1024,
        total_size: payload.len() as u64,
        device_info: None,
    };
    store.start_upload(&req).await.unwrap();
    store
        .put_chunk(
            "resume-tok",
            chunks[0].number,
            &chunks[0].data,
            &chunk_digest(&chunks[0].data),
        )
        .await
        .unwrap();

    // "Crash", then start again with the same token: the job resumes with
    // its counter intact.
    let resumed = store.start_upload(&req).await.unwrap();
    assert!(resumed.resumed);
    assert_eq!(resumed.uploaded_chunks, 1);

    for chunk in &chunks[1..] {
        store
            .put_chunk(
                "resume-tok",
                chunk.number,
                &chunk.data,
                &chunk_digest(&chunk.data),
            )
            .await
            .unwrap();
    }
    let document = store.complete_upload("resume-tok").await.unwrap();
    assert_eq!(document.as_bytes(), payload);
}
