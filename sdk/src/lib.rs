//! Host services for integrations that poll a cloud service and expose the results as sensors.
//!
//! An integration gets a [`Hass`] handle with:
//!
//!  - [`ConfigEntries`](config_entries::ConfigEntries), the persisted entries its setup flow
//!    created;
//!  - [`ApplicationCredentials`](application_credentials::ApplicationCredentials), the OAuth client
//!    applications the user registered;
//!  - entity and device registries that keep sensor identities stable across reloads.
//!
//! Polling itself is done through a [`DataUpdateCoordinator`](coordinator::DataUpdateCoordinator).

use eyre::Context;
use std::path::PathBuf;
use std::sync::Arc;

pub mod application_credentials;
pub mod config_entries;
pub mod coordinator;
pub mod entity;
pub mod flow;
pub mod registry;
mod storage;

pub use storage::StorageError;

/// File name of the config entry store inside the data directory.
pub const CONFIG_ENTRIES_FILE: &str = "core.config_entries";
/// File name of the application credential store inside the data directory.
pub const APPLICATION_CREDENTIALS_FILE: &str = "application_credentials";

/// Everything the host provides to a running integration.
#[derive(Debug, Clone)]
pub struct Hass {
    pub config_entries: Arc<config_entries::ConfigEntries>,
    pub application_credentials: Arc<application_credentials::ApplicationCredentials>,
    pub entities: Arc<registry::EntityRegistry>,
    pub devices: Arc<registry::DeviceRegistry>,
}

impl Hass {
    /// Opens (or initializes) the host stores under `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> eyre::Result<Self> {
        let data_dir = data_dir.into();
        let config_entries =
            config_entries::ConfigEntries::load(data_dir.join(".storage").join(CONFIG_ENTRIES_FILE))
                .await
                .context("load config entries")?;
        let application_credentials = application_credentials::ApplicationCredentials::load(
            data_dir.join(".storage").join(APPLICATION_CREDENTIALS_FILE),
        )
        .await
        .context("load application credentials")?;

        tracing::debug!(data_dir = %data_dir.display(), "opened host stores");
        Ok(Self {
            config_entries: Arc::new(config_entries),
            application_credentials: Arc::new(application_credentials),
            entities: Default::default(),
            devices: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application_credentials::ClientCredential;
    use config_entries::ConfigEntry;

    #[tokio::test]
    async fn open_persists_under_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::open(dir.path()).await.unwrap();
        hass.config_entries
            .add(ConfigEntry::new("demo", "Demo"))
            .await
            .unwrap();
        hass.application_credentials
            .register("demo", ClientCredential::new("id", "secret"))
            .await
            .unwrap();

        assert!(dir.path().join(".storage").join(CONFIG_ENTRIES_FILE).exists());
        let reopened = Hass::open(dir.path()).await.unwrap();
        assert_eq!(reopened.config_entries.entries("demo").await.len(), 1);
        assert!(reopened.application_credentials.import("demo").await.is_some());
    }
}
