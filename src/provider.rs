//! Cloud storage clients.
//!
//! One client per provider behind the `CloudStorage` trait, which is the
//! surface the sync worker and the broker's connection probe use: upload a
//! file into a folder, list and create folders, and identify the account
//! behind a token. Base URLs are injectable so tests can point a client at
//! a local server.

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected the token")]
    Unauthorized,
    #[error("provider error ({status}): {message}")]
    Api { status: StatusCode, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Uploads `data` as `name` into `folder` (provider-native folder id or
    /// path), returning the created remote file.
    async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<RemoteFile, ProviderError>;

    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteFile>, ProviderError>;

    /// Creates a folder and returns its provider-native identifier.
    async fn create_folder(&self, parent: &str, name: &str) -> Result<String, ProviderError>;

    /// Account identity behind the token, used by the connection test.
    async fn who_am_i(&self) -> Result<String, ProviderError>;
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Unauthorized);
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Api { status, message });
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Google Drive
// ---------------------------------------------------------------------------

const DRIVE_API_BASE: &str = "https://www.googleapis.com";
const DRIVE_FOLDER_MIME: &str = "application/vnd.google-apps.folder";

pub struct GoogleDriveClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl GoogleDriveClient {
    pub fn new(http: Client, access_token: String) -> Self {
        // Constant base URL, parse cannot fail.
        let base_url = Url::parse(DRIVE_API_BASE).unwrap_or_else(|_| unreachable!());
        Self {
            http,
            base_url,
            access_token,
        }
    }

    pub fn with_base_url(http: Client, access_token: String, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct DriveAbout {
    user: DriveUser,
}

#[derive(Debug, Deserialize)]
struct DriveUser {
    #[serde(rename = "emailAddress")]
    email_address: String,
}

#[async_trait]
impl CloudStorage for GoogleDriveClient {
    #[instrument(skip_all, fields(name = name))]
    async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<RemoteFile, ProviderError> {
        let metadata = json!({
            "name": name,
            "parents": [folder],
        });
        let form = multipart::Form::new()
            .part(
                "metadata",
                multipart::Part::text(metadata.to_string())
                    .mime_str("application/json; charset=UTF-8")?,
            )
            .part(
                "file",
                multipart::Part::bytes(data).mime_str(mime_type)?,
            );

        let mut url = self.base_url.join("/upload/drive/v3/files")?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;
        let file = check(resp).await?.json::<RemoteFile>().await?;
        debug!(id = %file.id, "file uploaded to drive");
        Ok(file)
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        let mut url = self.base_url.join("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("'{folder}' in parents and trashed = false"))
            .append_pair("fields", "files(id, name)");
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let list = check(resp).await?.json::<DriveFileList>().await?;
        Ok(list.files)
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<String, ProviderError> {
        let url = self.base_url.join("/drive/v3/files")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "name": name,
                "mimeType": DRIVE_FOLDER_MIME,
                "parents": [parent],
            }))
            .send()
            .await?;
        let file = check(resp).await?.json::<RemoteFile>().await?;
        Ok(file.id)
    }

    async fn who_am_i(&self) -> Result<String, ProviderError> {
        let mut url = self.base_url.join("/drive/v3/about")?;
        url.query_pairs_mut()
            .append_pair("fields", "user(emailAddress)");
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let about = check(resp).await?.json::<DriveAbout>().await?;
        Ok(about.user.email_address)
    }
}

// ---------------------------------------------------------------------------
// Dropbox
// ---------------------------------------------------------------------------

const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com";
const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com";

pub struct DropboxClient {
    http: Client,
    api_base: Url,
    content_base: Url,
    access_token: String,
}

impl DropboxClient {
    pub fn new(http: Client, access_token: String) -> Self {
        let api_base = Url::parse(DROPBOX_API_BASE).unwrap_or_else(|_| unreachable!());
        let content_base = Url::parse(DROPBOX_CONTENT_BASE).unwrap_or_else(|_| unreachable!());
        Self {
            http,
            api_base,
            content_base,
            access_token,
        }
    }

    pub fn with_base_urls(
        http: Client,
        access_token: String,
        api_base: Url,
        content_base: Url,
    ) -> Self {
        Self {
            http,
            api_base,
            content_base,
            access_token,
        }
    }
}

/// Dropbox uses paths, not ids. The path doubles as both.
fn dropbox_entry(path: &str, name: &str) -> RemoteFile {
    RemoteFile {
        id: path.to_string(),
        name: name.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct DropboxMetadata {
    name: String,
    path_display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DropboxListResult {
    entries: Vec<DropboxMetadata>,
}

#[derive(Debug, Deserialize)]
struct DropboxAccount {
    email: String,
}

#[derive(Debug, Deserialize)]
struct DropboxFolderResult {
    metadata: DropboxMetadata,
}

#[async_trait]
impl CloudStorage for DropboxClient {
    #[instrument(skip_all, fields(name = name))]
    async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        _mime_type: &str,
        data: Vec<u8>,
    ) -> Result<RemoteFile, ProviderError> {
        let path = format!("{}/{}", folder.trim_end_matches('/'), name);
        let arg = json!({
            "path": path,
            "mode": "add",
            "autorename": true,
        });
        let url = self.content_base.join("/2/files/upload")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", arg.to_string())
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let meta = check(resp).await?.json::<DropboxMetadata>().await?;
        let path = meta.path_display.unwrap_or(path);
        debug!(path = %path, "file uploaded to dropbox");
        Ok(dropbox_entry(&path, &meta.name))
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        let url = self.api_base.join("/2/files/list_folder")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "path": folder }))
            .send()
            .await?;
        let list = check(resp).await?.json::<DropboxListResult>().await?;
        Ok(list
            .entries
            .into_iter()
            .map(|e| {
                let path = e.path_display.clone().unwrap_or_else(|| e.name.clone());
                dropbox_entry(&path, &e.name)
            })
            .collect())
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<String, ProviderError> {
        let path = format!("{}/{}", parent.trim_end_matches('/'), name);
        let url = self.api_base.join("/2/files/create_folder_v2")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "path": path, "autorename": false }))
            .send()
            .await?;
        let result = check(resp).await?.json::<DropboxFolderResult>().await?;
        Ok(result.metadata.path_display.unwrap_or(path))
    }

    async fn who_am_i(&self) -> Result<String, ProviderError> {
        let url = self.api_base.join("/2/users/get_current_account")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let account = check(resp).await?.json::<DropboxAccount>().await?;
        Ok(account.email)
    }
}
