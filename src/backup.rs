//! Backup document assembly and restore.
//!
//! A backup is a single versioned JSON document carrying the tenant's full
//! tour graph (tours, floor plans, hotspots, panorama photos) plus counts.
//! Restore re-homes every media URL through a `MediaStore` first, then
//! rewrites the document exhaustively before touching the database, so no
//! reference to the source environment survives. All inserts run in one
//! transaction.

use crate::db::Pool;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const BACKUP_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("unsupported backup version {found:?}, expected {BACKUP_VERSION:?}")]
    UnsupportedVersion { found: String },
    #[error("backup document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("media transfer failed for {url}: {source}")]
    Media {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub tenant_id: String,
    pub tours: Vec<TourBackup>,
    /// Every distinct media URL referenced by the graph, sorted.
    pub media_urls: Vec<String>,
    pub statistics: BackupStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourBackup {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub floor_plans: Vec<FloorPlanBackup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorPlanBackup {
    pub id: String,
    pub name: String,
    pub image_url: String,
    pub hotspots: Vec<HotspotBackup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotBackup {
    pub id: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub target_floor_plan_id: Option<String>,
    pub panorama_photos: Vec<PanoramaPhotoBackup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanoramaPhotoBackup {
    pub id: String,
    pub url: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BackupStatistics {
    pub tours: u32,
    pub floor_plans: u32,
    pub hotspots: u32,
    pub panorama_photos: u32,
    /// Serialized size of the tour graph, before media. An estimate for
    /// progress display, not a contract.
    pub estimated_size_bytes: u64,
}

/// Restore semantics. There is deliberately no default; callers must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Delete the tenant's existing tours, then insert the document's graph
    /// with its original ids.
    Full,
    /// Keep existing data; insert the document's graph under fresh ids so
    /// nothing collides.
    Additive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub tours: u32,
    pub floor_plans: u32,
    pub hotspots: u32,
    pub panorama_photos: u32,
    pub media_rehomed: u32,
}

/// Re-homes one media object and returns its new URL.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, tenant_id: &str, source_url: &str) -> anyhow::Result<String>;
}

/// Fetches media over HTTP into a local directory served under
/// `public_base`.
pub struct HttpMediaStore {
    http: Client,
    media_dir: PathBuf,
    public_base: String,
}

impl HttpMediaStore {
    pub fn new(http: Client, media_dir: PathBuf, public_base: String) -> Self {
        Self {
            http,
            media_dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn store(&self, tenant_id: &str, source_url: &str) -> anyhow::Result<String> {
        let resp = self
            .http
            .get(source_url)
            .send()
            .await
            .with_context(|| format!("fetching {source_url}"))?
            .error_for_status()?;
        let bytes = resp.bytes().await?;

        let ext = source_url.rsplit('.').next().filter(|e| e.len() <= 5);
        let file_name = match ext {
            Some(ext) => format!("{}.{ext}", uuid::Uuid::new_v4()),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let dir = self.media_dir.join(tenant_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), &bytes).await?;
        Ok(format!("{}/{tenant_id}/{file_name}", self.public_base))
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Builds the tenant's full backup document from the tour graph.
#[instrument(skip_all, fields(tenant = tenant_id))]
pub async fn assemble(pool: &Pool, tenant_id: &str) -> Result<BackupDocument, BackupError> {
    let mut tours = Vec::new();
    let mut stats = BackupStatistics::default();

    let tour_rows = sqlx::query(
        "SELECT id, name, created_at FROM tours WHERE tenant_id = ? ORDER BY created_at, id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    for tour_row in &tour_rows {
        let tour_id: String = tour_row.get("id");
        let mut floor_plans = Vec::new();

        let plan_rows = sqlx::query(
            "SELECT id, name, image_url FROM floor_plans WHERE tour_id = ? ORDER BY id",
        )
        .bind(&tour_id)
        .fetch_all(pool)
        .await?;

        for plan_row in &plan_rows {
            let plan_id: String = plan_row.get("id");
            let mut hotspots = Vec::new();

            let hotspot_rows = sqlx::query(
                "SELECT id, label, x, y, target_floor_plan_id \
                 FROM hotspots WHERE floor_plan_id = ? ORDER BY id",
            )
            .bind(&plan_id)
            .fetch_all(pool)
            .await?;

            for hotspot_row in &hotspot_rows {
                let hotspot_id: String = hotspot_row.get("id");
                let photo_rows = sqlx::query(
                    "SELECT id, url, caption FROM panorama_photos \
                     WHERE hotspot_id = ? ORDER BY id",
                )
                .bind(&hotspot_id)
                .fetch_all(pool)
                .await?;

                let photos: Vec<PanoramaPhotoBackup> = photo_rows
                    .iter()
                    .map(|r| PanoramaPhotoBackup {
                        id: r.get("id"),
                        url: r.get("url"),
                        caption: r.get("caption"),
                    })
                    .collect();
                stats.panorama_photos += photos.len() as u32;

                hotspots.push(HotspotBackup {
                    id: hotspot_id,
                    label: hotspot_row.get("label"),
                    x: hotspot_row.get("x"),
                    y: hotspot_row.get("y"),
                    target_floor_plan_id: hotspot_row.get("target_floor_plan_id"),
                    panorama_photos: photos,
                });
            }
            stats.hotspots += hotspots.len() as u32;

            floor_plans.push(FloorPlanBackup {
                id: plan_id,
                name: plan_row.get("name"),
                image_url: plan_row.get("image_url"),
                hotspots,
            });
        }
        stats.floor_plans += floor_plans.len() as u32;

        tours.push(TourBackup {
            id: tour_id,
            name: tour_row.get("name"),
            created_at: tour_row.get("created_at"),
            floor_plans,
        });
    }
    stats.tours = tours.len() as u32;
    stats.estimated_size_bytes = serde_json::to_vec(&tours)
        .map(|v| v.len() as u64)
        .unwrap_or_default();

    debug!(
        tours = stats.tours,
        floor_plans = stats.floor_plans,
        "backup document assembled"
    );
    Ok(BackupDocument {
        version: BACKUP_VERSION.to_string(),
        exported_at: Utc::now(),
        tenant_id: tenant_id.to_string(),
        media_urls: media_urls(&tours),
        tours,
        statistics: stats,
    })
}

// ---------------------------------------------------------------------------
// URL rewrite
// ---------------------------------------------------------------------------

/// Replaces every occurrence of the mapped URLs anywhere in the document:
/// object values, array elements, and substrings inside longer strings all
/// count. Keys are left alone.
pub fn rewrite_urls(value: &mut Value, url_map: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            for (old, new) in url_map {
                if s.contains(old.as_str()) {
                    *s = s.replace(old.as_str(), new);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_urls(item, url_map);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_urls(item, url_map);
            }
        }
        _ => {}
    }
}

fn media_urls(tours: &[TourBackup]) -> Vec<String> {
    let mut urls = Vec::new();
    for tour in tours {
        for plan in &tour.floor_plans {
            urls.push(plan.image_url.clone());
            for hotspot in &plan.hotspots {
                for photo in &hotspot.panorama_photos {
                    urls.push(photo.url.clone());
                }
            }
        }
    }
    urls.sort();
    urls.dedup();
    urls
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

/// Restore a backup document into `tenant_id`'s account.
#[instrument(skip_all, fields(tenant = tenant_id, mode = ?mode))]
pub async fn restore(
    pool: &Pool,
    media: &dyn MediaStore,
    doc: &BackupDocument,
    tenant_id: &str,
    mode: RestoreMode,
) -> Result<RestoreSummary, BackupError> {
    if doc.version != BACKUP_VERSION {
        return Err(BackupError::UnsupportedVersion {
            found: doc.version.clone(),
        });
    }

    // Re-home media before any database work. A failed transfer aborts the
    // restore with nothing written.
    let mut url_map = HashMap::new();
    for url in media_urls(&doc.tours) {
        let rehomed = media
            .store(tenant_id, &url)
            .await
            .map_err(|source| BackupError::Media {
                url: url.clone(),
                source,
            })?;
        url_map.insert(url, rehomed);
    }

    let mut value = serde_json::to_value(doc)?;
    rewrite_urls(&mut value, &url_map);
    let doc: BackupDocument = serde_json::from_value(value)?;

    // In additive mode every entity in the document gets a fresh id;
    // internal references (hotspot targets) follow through the remap table.
    // Ids that point outside the document are kept as-is.
    let mut id_map: HashMap<String, String> = HashMap::new();
    if mode == RestoreMode::Additive {
        let fresh = || uuid::Uuid::new_v4().to_string();
        for tour in &doc.tours {
            id_map.insert(tour.id.clone(), fresh());
            for plan in &tour.floor_plans {
                id_map.insert(plan.id.clone(), fresh());
                for hotspot in &plan.hotspots {
                    id_map.insert(hotspot.id.clone(), fresh());
                    for photo in &hotspot.panorama_photos {
                        id_map.insert(photo.id.clone(), fresh());
                    }
                }
            }
        }
    }
    let mapped = |old: &str| -> String {
        id_map.get(old).cloned().unwrap_or_else(|| old.to_string())
    };

    let mut summary = RestoreSummary {
        media_rehomed: url_map.len() as u32,
        ..RestoreSummary::default()
    };

    let mut tx = pool.begin().await?;

    if mode == RestoreMode::Full {
        // Floor plans, hotspots and photos cascade.
        sqlx::query("DELETE FROM tours WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
    }

    for tour in &doc.tours {
        let tour_id = mapped(&tour.id);
        sqlx::query("INSERT INTO tours (id, tenant_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&tour_id)
            .bind(tenant_id)
            .bind(&tour.name)
            .bind(tour.created_at)
            .execute(&mut *tx)
            .await?;
        summary.tours += 1;

        for plan in &tour.floor_plans {
            let plan_id = mapped(&plan.id);
            sqlx::query(
                "INSERT INTO floor_plans (id, tour_id, name, image_url) VALUES (?, ?, ?, ?)",
            )
            .bind(&plan_id)
            .bind(&tour_id)
            .bind(&plan.name)
            .bind(&plan.image_url)
            .execute(&mut *tx)
            .await?;
            summary.floor_plans += 1;
        }

        // Hotspots go in after every plan of the tour exists, since targets
        // may point forward.
        for plan in &tour.floor_plans {
            let plan_id = mapped(&plan.id);
            for hotspot in &plan.hotspots {
                let hotspot_id = mapped(&hotspot.id);
                let target = hotspot
                    .target_floor_plan_id
                    .as_deref()
                    .map(|t| mapped(t));
                sqlx::query(
                    "INSERT INTO hotspots (id, floor_plan_id, label, x, y, target_floor_plan_id) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&hotspot_id)
                .bind(&plan_id)
                .bind(&hotspot.label)
                .bind(hotspot.x)
                .bind(hotspot.y)
                .bind(target)
                .execute(&mut *tx)
                .await?;
                summary.hotspots += 1;

                for photo in &hotspot.panorama_photos {
                    sqlx::query(
                        "INSERT INTO panorama_photos (id, hotspot_id, url, caption) \
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(mapped(&photo.id))
                    .bind(&hotspot_id)
                    .bind(&photo.url)
                    .bind(&photo.caption)
                    .execute(&mut *tx)
                    .await?;
                    summary.panorama_photos += 1;
                }
            }
        }
    }

    tx.commit().await?;
    info!(
        tours = summary.tours,
        media = summary.media_rehomed,
        "backup restored"
    );
    Ok(summary)
}

/// Parse and version-check a raw backup document.
pub fn parse_document(raw: &str) -> Result<BackupDocument, BackupError> {
    // Peek at the version before committing to the full shape, so an old
    // document gives a version error instead of a shape error.
    let value: Value = serde_json::from_str(raw)?;
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if version != BACKUP_VERSION {
        return Err(BackupError::UnsupportedVersion {
            found: version.to_string(),
        });
    }
    Ok(serde_json::from_value(value)?)
}
