//! Cloud provider connection broker.
//!
//! Mediates the OAuth connect dance for cloud destinations: snapshot the
//! known destinations, open the provider's consent page in an external
//! window, then poll the destination table until the callback has landed a
//! new active row for that provider. A blocked window degrades to a
//! same-window redirect; a poll that exhausts its attempt budget resets to
//! idle without surfacing an error, since the user may simply have closed
//! the consent page.

use crate::db::{self, Pool};
use crate::model::{BackupDestination, BackupFrequency, CloudProvider, SyncHistoryRecord};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("another destination operation is in progress ({0})")]
    Busy(&'static str),
    #[error("destination {0} not found")]
    NotFound(i64),
    #[error("destination {0} has no stored credentials")]
    NoCredentials(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Operation currently holding the broker. At most one of connect,
/// disconnect, test and update runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    Idle,
    Connecting,
    Disconnecting,
    Testing,
    Updating,
}

impl LoadingState {
    fn label(&self) -> &'static str {
        match self {
            LoadingState::Idle => "idle",
            LoadingState::Connecting => "connecting",
            LoadingState::Disconnecting => "disconnecting",
            LoadingState::Testing => "testing",
            LoadingState::Updating => "updating",
        }
    }
}

/// Builds consent URLs and probes stored credentials against the provider.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    fn authorize_url(&self, tenant_id: &str, provider: CloudProvider) -> Result<Url, BrokerError>;

    /// True when the destination's stored token is accepted by the provider.
    async fn probe(&self, destination: &BackupDestination) -> Result<bool, BrokerError>;
}

/// Handle on an opened consent window.
pub trait ExternalWindow: Send + Sync {
    fn close(&self) -> anyhow::Result<()>;
}

/// Opens the consent page. Returns `None` when an external window cannot be
/// opened (popup blocked), in which case the caller falls back to a
/// same-window redirect.
pub trait WindowOpener: Send + Sync {
    fn open(&self, url: &Url) -> Option<Box<dyn ExternalWindow>>;
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 60,
        }
    }
}

impl From<&crate::config::Broker> for BrokerConfig {
    fn from(cfg: &crate::config::Broker) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_poll_attempts: cfg.max_poll_attempts,
        }
    }
}

#[derive(Debug)]
pub enum ConnectOutcome {
    /// A new active destination landed; sibling rows for the provider were
    /// deactivated.
    Connected(BackupDestination),
    /// Popup blocked; the caller must navigate to the consent URL itself.
    Redirected(Url),
    /// The attempt budget ran out with no callback. Not an error.
    TimedOut,
}

pub struct CloudProviderBroker {
    pool: Pool,
    gateway: Arc<dyn AuthGateway>,
    windows: Arc<dyn WindowOpener>,
    config: BrokerConfig,
    state: Arc<Mutex<LoadingState>>,
}

/// Resets the broker to idle when the holding operation finishes, whichever
/// way it exits.
struct StateGuard {
    state: Arc<Mutex<LoadingState>>,
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = LoadingState::Idle;
        }
    }
}

impl CloudProviderBroker {
    pub fn new(
        pool: Pool,
        gateway: Arc<dyn AuthGateway>,
        windows: Arc<dyn WindowOpener>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            windows,
            config,
            state: Arc::new(Mutex::new(LoadingState::Idle)),
        }
    }

    pub fn loading_state(&self) -> LoadingState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(LoadingState::Idle)
    }

    fn enter(&self, next: LoadingState) -> Result<StateGuard, BrokerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BrokerError::Busy("poisoned"))?;
        if *state != LoadingState::Idle {
            return Err(BrokerError::Busy(state.label()));
        }
        *state = next;
        Ok(StateGuard {
            state: self.state.clone(),
        })
    }

    /// Run the connect flow for one provider. Returns once the callback has
    /// produced a new active destination, the attempt budget is exhausted,
    /// or a popup could not be opened.
    #[instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn connect(
        &self,
        tenant_id: &str,
        provider: CloudProvider,
    ) -> Result<ConnectOutcome, BrokerError> {
        let _guard = self.enter(LoadingState::Connecting)?;

        // Ids known before the window opens; anything beyond this set is the
        // callback's work.
        let baseline: HashSet<i64> = db::list_destinations(&self.pool, tenant_id)
            .await?
            .iter()
            .map(|d| d.id)
            .collect();

        let url = self.gateway.authorize_url(tenant_id, provider)?;
        let window = match self.windows.open(&url) {
            Some(w) => w,
            None => {
                debug!("consent window blocked, falling back to redirect");
                return Ok(ConnectOutcome::Redirected(url));
            }
        };

        for attempt in 1..=self.config.max_poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let fresh = db::list_destinations(&self.pool, tenant_id)
                .await?
                .into_iter()
                .find(|d| {
                    d.is_active && d.cloud_provider == Some(provider) && !baseline.contains(&d.id)
                });
            if let Some(dest) = fresh {
                if let Err(err) = window.close() {
                    // The window may already be closed from the provider side.
                    debug!(?err, "could not close consent window");
                }
                db::deactivate_other_provider_destinations(
                    &self.pool,
                    tenant_id,
                    provider,
                    dest.id,
                )
                .await?;
                info!(attempt, destination = dest.id, "cloud destination connected");
                return Ok(ConnectOutcome::Connected(dest));
            }
        }

        // No callback inside the budget. The user likely abandoned the
        // consent page, so reset quietly instead of reporting a failure.
        if let Err(err) = window.close() {
            debug!(?err, "could not close consent window");
        }
        warn!("connect polling exhausted without a callback");
        Ok(ConnectOutcome::TimedOut)
    }

    /// Soft-delete a destination. History and token rows stay behind.
    #[instrument(skip_all, fields(destination = id))]
    pub async fn disconnect(&self, id: i64) -> Result<(), BrokerError> {
        let _guard = self.enter(LoadingState::Disconnecting)?;
        if db::destination_by_id(&self.pool, id).await?.is_none() {
            return Err(BrokerError::NotFound(id));
        }
        db::deactivate_destination(&self.pool, id).await?;
        info!("destination disconnected");
        Ok(())
    }

    /// Validate a destination's stored credentials against the provider.
    #[instrument(skip_all, fields(destination = id))]
    pub async fn test_connection(&self, id: i64) -> Result<bool, BrokerError> {
        let _guard = self.enter(LoadingState::Testing)?;
        let dest = db::destination_by_id(&self.pool, id)
            .await?
            .ok_or(BrokerError::NotFound(id))?;
        if dest.access_token.is_none() {
            return Err(BrokerError::NoCredentials(id));
        }
        self.gateway.probe(&dest).await
    }

    #[instrument(skip_all, fields(destination = id))]
    pub async fn update_settings(
        &self,
        id: i64,
        auto_backup_enabled: bool,
        backup_frequency: BackupFrequency,
        folder_path: Option<&str>,
    ) -> Result<(), BrokerError> {
        let _guard = self.enter(LoadingState::Updating)?;
        if db::destination_by_id(&self.pool, id).await?.is_none() {
            return Err(BrokerError::NotFound(id));
        }
        db::update_destination_settings(
            &self.pool,
            id,
            auto_backup_enabled,
            backup_frequency,
            folder_path,
        )
        .await?;
        Ok(())
    }

    pub async fn destinations(&self, tenant_id: &str) -> Result<Vec<BackupDestination>, BrokerError> {
        Ok(db::list_destinations(&self.pool, tenant_id).await?)
    }

    /// The tenant's current destination for a provider (or any provider).
    /// First active match wins.
    pub async fn active_destination(
        &self,
        tenant_id: &str,
        provider: Option<CloudProvider>,
    ) -> Result<Option<BackupDestination>, BrokerError> {
        Ok(db::active_destination(&self.pool, tenant_id, provider).await?)
    }

    pub async fn sync_history(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncHistoryRecord>, BrokerError> {
        Ok(db::recent_sync_history(&self.pool, tenant_id, limit).await?)
    }
}
