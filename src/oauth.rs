//! OAuth plumbing for the cloud providers.
//!
//! Builds provider consent URLs and exchanges callback codes for tokens.
//! The `ProviderAuthGateway` at the bottom is the live implementation of the
//! broker's gateway trait, backed by the provider clients.

use crate::broker::{AuthGateway, BrokerError};
use crate::config::{Config, ProviderApp};
use crate::model::{BackupDestination, CloudProvider};
use crate::provider::{CloudStorage, DropboxClient, GoogleDriveClient};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const DROPBOX_AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const DROPBOX_TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Consent URL with a caller-supplied opaque `state` carried through the
/// round trip.
pub fn authorize_url(
    provider: CloudProvider,
    app: &ProviderApp,
    redirect_uri: &str,
    state: &str,
) -> anyhow::Result<Url> {
    let mut url = match provider {
        CloudProvider::GoogleDrive => Url::parse(GOOGLE_AUTH_URL)?,
        CloudProvider::Dropbox => Url::parse(DROPBOX_AUTH_URL)?,
    };
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("client_id", &app.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        match provider {
            CloudProvider::GoogleDrive => {
                // Offline access so a refresh token is issued.
                q.append_pair("scope", GOOGLE_DRIVE_SCOPE)
                    .append_pair("access_type", "offline")
                    .append_pair("prompt", "consent");
            }
            CloudProvider::Dropbox => {
                q.append_pair("token_access_type", "offline");
            }
        }
    }
    Ok(url)
}

#[instrument(skip_all, fields(provider = provider.as_str()))]
pub async fn exchange_code(
    http: &Client,
    provider: CloudProvider,
    app: &ProviderApp,
    redirect_uri: &str,
    code: &str,
) -> anyhow::Result<TokenResponse> {
    let token_url = match provider {
        CloudProvider::GoogleDrive => GOOGLE_TOKEN_URL,
        CloudProvider::Dropbox => DROPBOX_TOKEN_URL,
    };
    let params = [
        ("client_id", app.client_id.as_str()),
        ("client_secret", app.client_secret.as_str()),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
        ("code", code),
    ];
    let resp = http
        .post(token_url)
        .form(&params)
        .send()
        .await
        .context("token endpoint unreachable")?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("token exchange failed ({status}): {body}"));
    }
    let token = resp.json::<TokenResponse>().await?;
    debug!("code exchanged for access token");
    Ok(token)
}

/// Live gateway: consent URLs from config, probes via the provider clients.
pub struct ProviderAuthGateway {
    http: Client,
    base_url: String,
    google_drive: ProviderApp,
    dropbox: ProviderApp,
}

impl ProviderAuthGateway {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.app.base_url.trim_end_matches('/').to_string(),
            google_drive: config.providers.google_drive.clone(),
            dropbox: config.providers.dropbox.clone(),
        }
    }

    fn app(&self, provider: CloudProvider) -> &ProviderApp {
        match provider {
            CloudProvider::GoogleDrive => &self.google_drive,
            CloudProvider::Dropbox => &self.dropbox,
        }
    }

    fn redirect_uri(&self, provider: CloudProvider) -> String {
        format!("{}{}", self.base_url, self.app(provider).redirect_path)
    }
}

#[async_trait]
impl AuthGateway for ProviderAuthGateway {
    fn authorize_url(&self, tenant_id: &str, provider: CloudProvider) -> Result<Url, BrokerError> {
        let url = authorize_url(
            provider,
            self.app(provider),
            &self.redirect_uri(provider),
            tenant_id,
        )?;
        Ok(url)
    }

    async fn probe(&self, destination: &BackupDestination) -> Result<bool, BrokerError> {
        let token = destination
            .access_token
            .as_deref()
            .ok_or(BrokerError::NoCredentials(destination.id))?;
        let ok = match destination.cloud_provider {
            Some(CloudProvider::GoogleDrive) => {
                GoogleDriveClient::new(self.http.clone(), token.to_string())
                    .who_am_i()
                    .await
                    .is_ok()
            }
            Some(CloudProvider::Dropbox) => {
                DropboxClient::new(self.http.clone(), token.to_string())
                    .who_am_i()
                    .await
                    .is_ok()
            }
            None => false,
        };
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn app() -> ProviderApp {
        ProviderApp {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            redirect_path: "/oauth/callback".into(),
        }
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn google_consent_url_requests_offline_drive_access() {
        let url = authorize_url(
            CloudProvider::GoogleDrive,
            &app(),
            "https://tours.example.com/oauth/callback",
            "tenant-1",
        )
        .unwrap();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let q = query_map(&url);
        assert_eq!(q["client_id"], "client-123");
        assert_eq!(q["redirect_uri"], "https://tours.example.com/oauth/callback");
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["state"], "tenant-1");
        assert_eq!(q["scope"], GOOGLE_DRIVE_SCOPE);
        assert_eq!(q["access_type"], "offline");
    }

    #[test]
    fn dropbox_consent_url_carries_state_and_offline_token() {
        let url = authorize_url(
            CloudProvider::Dropbox,
            &app(),
            "https://tours.example.com/oauth/callback",
            "tenant-9",
        )
        .unwrap();

        assert_eq!(url.host_str(), Some("www.dropbox.com"));
        let q = query_map(&url);
        assert_eq!(q["state"], "tenant-9");
        assert_eq!(q["token_access_type"], "offline");
        assert!(!q.contains_key("scope"));
    }
}
