//! Per-floor-plan structured export.
//!
//! The escape hatch when a full backup is impractical: one floor plan at a
//! time is packed into a zip archive holding the plan image, every panorama
//! photo grouped by hotspot, and a manifest describing the graph. Progress
//! is tracked in the export_jobs table, updated in coarse steps rather than
//! per file.

use crate::db::{self, Pool};
use crate::model::UploadStatus;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use sqlx::Row;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Progress rows are written once per this many files, plus once at the
/// end. Keeps the table quiet on photo-heavy plans.
pub const PROGRESS_GRANULARITY: i64 = 5;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("floor plan {0} not found")]
    NotFound(String),
    #[error("media fetch failed for {url}: {source}")]
    Media {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Pulls one media object's bytes.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpMediaFetcher {
    http: Client,
}

impl HttpMediaFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct ExportManifest {
    floor_plan_id: String,
    floor_plan_name: String,
    exported_at: chrono::DateTime<Utc>,
    image_entry: String,
    hotspots: Vec<ManifestHotspot>,
}

#[derive(Debug, Serialize)]
struct ManifestHotspot {
    id: String,
    label: String,
    x: f64,
    y: f64,
    photo_entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub job_id: i64,
    pub artifact_path: PathBuf,
    pub files: i64,
}

pub struct StructuredExporter {
    pool: Pool,
    fetcher: Arc<dyn MediaFetcher>,
    export_dir: PathBuf,
}

struct PlanMedia {
    name: String,
    image_url: String,
    hotspots: Vec<HotspotMedia>,
}

struct HotspotMedia {
    id: String,
    label: String,
    x: f64,
    y: f64,
    photo_urls: Vec<String>,
}

fn file_ext(url: &str) -> &str {
    url.rsplit('.')
        .next()
        .filter(|e| e.len() <= 5 && !e.contains('/'))
        .unwrap_or("bin")
}

fn entry_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl StructuredExporter {
    pub fn new(pool: Pool, fetcher: Arc<dyn MediaFetcher>, export_dir: PathBuf) -> Self {
        Self {
            pool,
            fetcher,
            export_dir,
        }
    }

    /// Export one floor plan into a zip artifact under the export
    /// directory. The export_jobs row tracks progress and holds the final
    /// artifact path or error.
    #[instrument(skip_all, fields(tenant = tenant_id, floor_plan = floor_plan_id))]
    pub async fn export_floor_plan(
        &self,
        tenant_id: &str,
        floor_plan_id: &str,
    ) -> Result<ExportOutcome, ExportError> {
        let plan = self.load_plan(tenant_id, floor_plan_id).await?;
        let total_files =
            1 + plan.hotspots.iter().map(|h| h.photo_urls.len() as i64).sum::<i64>();

        let job_id =
            db::create_export_job(&self.pool, tenant_id, floor_plan_id, total_files).await?;

        match self
            .build_archive(job_id, floor_plan_id, &plan, total_files)
            .await
        {
            Ok(archive) => {
                let path = self
                    .write_artifact(tenant_id, floor_plan_id, &archive)
                    .await?;
                let path_str = path.to_string_lossy().to_string();
                db::finalize_export_job(
                    &self.pool,
                    job_id,
                    UploadStatus::Completed,
                    Some(&path_str),
                    None,
                )
                .await?;
                info!(job = job_id, files = total_files, "structured export finished");
                Ok(ExportOutcome {
                    job_id,
                    artifact_path: path,
                    files: total_files,
                })
            }
            Err(err) => {
                db::finalize_export_job(
                    &self.pool,
                    job_id,
                    UploadStatus::Failed,
                    None,
                    Some(&err.to_string()),
                )
                .await?;
                Err(err)
            }
        }
    }

    async fn load_plan(
        &self,
        tenant_id: &str,
        floor_plan_id: &str,
    ) -> Result<PlanMedia, ExportError> {
        let plan_row = sqlx::query(
            "SELECT p.name, p.image_url FROM floor_plans p \
             JOIN tours t ON t.id = p.tour_id \
             WHERE p.id = ? AND t.tenant_id = ?",
        )
        .bind(floor_plan_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ExportError::NotFound(floor_plan_id.to_string()))?;

        let hotspot_rows = sqlx::query(
            "SELECT id, label, x, y FROM hotspots WHERE floor_plan_id = ? ORDER BY id",
        )
        .bind(floor_plan_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hotspots = Vec::with_capacity(hotspot_rows.len());
        for row in &hotspot_rows {
            let id: String = row.get("id");
            let photo_urls = sqlx::query_scalar::<_, String>(
                "SELECT url FROM panorama_photos WHERE hotspot_id = ? ORDER BY id",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;
            hotspots.push(HotspotMedia {
                id,
                label: row.get("label"),
                x: row.get("x"),
                y: row.get("y"),
                photo_urls,
            });
        }

        Ok(PlanMedia {
            name: plan_row.get("name"),
            image_url: plan_row.get("image_url"),
            hotspots,
        })
    }

    async fn build_archive(
        &self,
        job_id: i64,
        floor_plan_id: &str,
        plan: &PlanMedia,
        total_files: i64,
    ) -> Result<Vec<u8>, ExportError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut processed = 0i64;

        let image_entry = format!("floor-plan.{}", file_ext(&plan.image_url));
        let image = self.fetch(&plan.image_url).await?;
        zip.start_file(&image_entry, options)?;
        zip.write_all(&image)?;
        processed += 1;
        self.bump_progress(job_id, processed, total_files).await?;

        let mut manifest_hotspots = Vec::with_capacity(plan.hotspots.len());
        for hotspot in &plan.hotspots {
            let dir = format!("hotspots/{}", entry_safe(&hotspot.label));
            let mut photo_entries = Vec::with_capacity(hotspot.photo_urls.len());
            for (idx, url) in hotspot.photo_urls.iter().enumerate() {
                let entry = format!("{dir}/photo-{}.{}", idx + 1, file_ext(url));
                let bytes = self.fetch(url).await?;
                zip.start_file(&entry, options)?;
                zip.write_all(&bytes)?;
                photo_entries.push(entry);
                processed += 1;
                self.bump_progress(job_id, processed, total_files).await?;
            }
            manifest_hotspots.push(ManifestHotspot {
                id: hotspot.id.clone(),
                label: hotspot.label.clone(),
                x: hotspot.x,
                y: hotspot.y,
                photo_entries,
            });
        }

        let manifest = ExportManifest {
            floor_plan_id: floor_plan_id.to_string(),
            floor_plan_name: plan.name.clone(),
            exported_at: Utc::now(),
            image_entry,
            hotspots: manifest_hotspots,
        };
        zip.start_file("manifest.json", options)?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExportError> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|source| ExportError::Media {
                url: url.to_string(),
                source,
            })
    }

    async fn bump_progress(
        &self,
        job_id: i64,
        processed: i64,
        total: i64,
    ) -> Result<(), ExportError> {
        if processed % PROGRESS_GRANULARITY == 0 || processed == total {
            debug!(job = job_id, processed, total, "export progress");
            db::update_export_progress(&self.pool, job_id, processed).await?;
        }
        Ok(())
    }

    async fn write_artifact(
        &self,
        tenant_id: &str,
        floor_plan_id: &str,
        archive: &[u8],
    ) -> Result<PathBuf, ExportError> {
        let dir = self.export_dir.join(tenant_id);
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = format!(
            "floor-plan-{}-{}.zip",
            entry_safe(floor_plan_id),
            Utc::now().format("%Y%m%d%H%M%S")
        );
        let path = dir.join(file_name);
        tokio::fs::write(&path, archive).await?;
        Ok(path)
    }
}
