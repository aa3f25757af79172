//! YouTube Studio Analytics as sensors.
//!
//! One config entry tracks one channel. Setting an entry up builds a [`MetricsClient`] from the
//! stored credential, does a first poll, registers a device and one sensor per metric key, and
//! leaves a coordinator polling in the background.

use crate::coordinator::new_coordinator;
use crate::credentials::{Credential, TokenManager};
use crate::metrics::{MetricsClient, MetricsSnapshot};
use crate::oauth::OAuthManager;
use crate::sensor::{YouTubeSensor, build_sensors, device_info};
use crate::youtube_api::{GoogleEndpoints, YouTubeClient};
use ha_integration_sdk::Hass;
use ha_integration_sdk::config_entries::ConfigEntry;
use ha_integration_sdk::coordinator::{
    CoordinatorEntity, CoordinatorHandle, DEFAULT_REQUEST_TIMEOUT, UpdateError,
};
use ha_integration_sdk::entity::SensorEntity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod config_flow;
pub mod coordinator;
pub mod credentials;
pub mod metrics;
pub mod oauth;
pub mod sensor;
pub mod youtube_api;

pub const DOMAIN: &str = "youtube_studio_analytics";

pub const DEFAULT_UPDATE_INTERVAL_SECONDS: u64 = 3600;
pub const MIN_UPDATE_INTERVAL_SECONDS: u64 = 300;
pub const MAX_UPDATE_INTERVAL_SECONDS: u64 = 86_400;

/// Served to the browser once the OAuth redirect has been received.
pub const OAUTH_DONE_HTML: &str = include_str!("../oauth_success.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// The Google account's own channel.
    Personal,
    /// A channel the account manages on behalf of a brand account.
    Brand,
}

/// A channel the authenticated identity can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub title: String,
    pub kind: ChannelKind,
}

/// What a config entry of this integration stores in its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    #[serde(flatten)]
    pub credential: Credential,
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
}

impl EntryData {
    pub fn from_entry(entry: &ConfigEntry) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(entry.data.clone()))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => unreachable!("EntryData always serializes to an object"),
        }
    }
}

/// The user-adjustable options of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECONDS
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            update_interval_seconds: DEFAULT_UPDATE_INTERVAL_SECONDS,
        }
    }
}

impl EntryOptions {
    pub fn with_interval(seconds: u64) -> Self {
        Self {
            update_interval_seconds: seconds
                .clamp(MIN_UPDATE_INTERVAL_SECONDS, MAX_UPDATE_INTERVAL_SECONDS),
        }
    }

    /// Reads the options of `entry`, falling back to the defaults for anything unusable.
    pub fn from_entry(entry: &ConfigEntry) -> Self {
        match serde_json::from_value::<Self>(Value::Object(entry.options.clone())) {
            Ok(options) => Self::with_interval(options.update_interval_seconds),
            Err(e) => {
                tracing::warn!(entry_id = %entry.entry_id, error = %e, "ignoring malformed options");
                Self::default()
            }
        }
    }

    pub fn to_map(self) -> Map<String, Value> {
        Map::from_iter([(
            "update_interval_seconds".to_string(),
            self.update_interval_seconds.into(),
        )])
    }

    pub fn interval(self) -> Duration {
        Duration::from_secs(
            self.update_interval_seconds
                .clamp(MIN_UPDATE_INTERVAL_SECONDS, MAX_UPDATE_INTERVAL_SECONDS),
        )
    }
}

/// Why an entry could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("no application credential registered for youtube_studio_analytics")]
    MissingCredentials,
    #[error("config entry data is unusable: {0}")]
    InvalidEntry(String),
    /// The stored credential was rejected; the entry needs re-authentication.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Transient; setting up again later may well succeed.
    #[error("not ready: {0}")]
    NotReady(String),
}

/// A set-up entry: its polling task and its sensors.
#[derive(Debug)]
pub struct LoadedEntry {
    pub entry_id: String,
    pub channel_id: String,
    pub handle: CoordinatorHandle<MetricsSnapshot>,
    pub sensors: Vec<YouTubeSensor>,
    tokens: TokenManager,
    /// The refresh token read from the entry when it was set up or last reloaded.
    adopted_refresh_token: String,
}

impl LoadedEntry {
    /// Writes the current token cache back into the entry.
    ///
    /// Returns whether anything was written. A credential stored by a re-authentication since
    /// this entry was loaded is left alone.
    pub async fn persist_credential(&self, hass: &Hass) -> eyre::Result<bool> {
        persist_credential(hass, &self.entry_id, &self.tokens, &self.adopted_refresh_token).await
    }
}

async fn persist_credential(
    hass: &Hass,
    entry_id: &str,
    tokens: &TokenManager,
    adopted_refresh_token: &str,
) -> eyre::Result<bool> {
    let credential = tokens.credential().await;
    let mut written = false;
    hass.config_entries
        .update(entry_id, |entry| {
            let Ok(mut data) = EntryData::from_entry(entry) else {
                return false;
            };
            // anything else was stored by a re-authentication that happened meanwhile
            let stored = data.credential.refresh_token.as_str();
            if stored != adopted_refresh_token && stored != credential.refresh_token {
                return false;
            }
            if data.credential == credential {
                return false;
            }
            data.credential = credential;
            entry.data = data.to_map();
            written = true;
            true
        })
        .await?;
    Ok(written)
}

/// Sets up `entry`: first poll, device and sensor registration, background polling.
#[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
pub async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    endpoints: &GoogleEndpoints,
) -> Result<LoadedEntry, SetupError> {
    let data = EntryData::from_entry(entry).map_err(|e| SetupError::InvalidEntry(e.to_string()))?;
    let options = EntryOptions::from_entry(entry);
    let Some(client_credential) = hass.application_credentials.import(DOMAIN).await else {
        return Err(SetupError::MissingCredentials);
    };

    let oauth = Arc::new(OAuthManager::new(client_credential, endpoints.clone()));
    let tokens = TokenManager::new(data.credential.clone(), oauth);
    let http = reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SetupError::NotReady(format!("build HTTP client: {e}")))?;
    let api = YouTubeClient::new(tokens.clone(), endpoints.clone(), http);
    let client = MetricsClient::new(api, &data.channel_id);

    let coordinator = new_coordinator(client, options.interval());
    match coordinator.first_refresh().await {
        Ok(()) => {}
        Err(UpdateError::AuthFailed(e)) => return Err(SetupError::AuthFailed(e)),
        Err(UpdateError::UpdateFailed(e)) => return Err(SetupError::NotReady(e)),
    }
    if let Err(e) =
        persist_credential(hass, &entry.entry_id, &tokens, &data.credential.refresh_token).await
    {
        tracing::warn!(error = %e, "could not store refreshed credential");
    }

    let channel_title = if data.channel_title.is_empty() {
        "YouTube Channel"
    } else {
        &data.channel_title
    };
    let device = hass.devices.get_or_create(
        &entry.entry_id,
        device_info(&data.channel_id, channel_title),
    );
    let view = CoordinatorEntity::new(coordinator.subscribe());
    let sensors = build_sensors(&data.channel_id, channel_title, &view);
    for sensor in &sensors {
        hass.entities.register(
            DOMAIN,
            &entry.entry_id,
            sensor.unique_id(),
            sensor.name(),
            Some(&device.id),
        );
    }
    tracing::info!(
        channel = %data.channel_id,
        sensors = sensors.len(),
        interval = ?options.interval(),
        "entry set up"
    );

    Ok(LoadedEntry {
        entry_id: entry.entry_id.clone(),
        channel_id: data.channel_id,
        handle: coordinator.spawn(),
        sensors,
        tokens,
        adopted_refresh_token: data.credential.refresh_token,
    })
}

/// Stops polling and forgets the entry's sensors and device.
#[tracing::instrument(skip_all, fields(entry_id = %loaded.entry_id))]
pub async fn unload_entry(hass: &Hass, loaded: LoadedEntry) {
    // a rejected credential is not worth keeping over whatever is stored
    if loaded.handle.state().needs_reauth() {
        tracing::debug!("credential rejected, not storing it on unload");
    } else if let Err(e) = loaded.persist_credential(hass).await {
        tracing::debug!(error = %e, "credential not stored on unload");
    }
    let LoadedEntry {
        entry_id, handle, ..
    } = loaded;
    handle.shutdown().await;
    let removed = hass.entities.remove_config_entry(&entry_id);
    hass.devices.remove_config_entry(&entry_id);
    tracing::info!(entities = removed, "entry unloaded");
}

/// Applies the entry as currently stored to a running entry and polls right away.
///
/// This picks up new options as well as a credential stored by re-authentication, which also
/// resumes polling that was suspended because the old credential was rejected.
#[tracing::instrument(skip_all, fields(entry_id = %loaded.entry_id))]
pub async fn reload_entry(hass: &Hass, loaded: &mut LoadedEntry) -> eyre::Result<()> {
    hass.config_entries.sync().await?;
    let Some(entry) = hass.config_entries.get(&loaded.entry_id).await else {
        eyre::bail!("config entry {} no longer exists", loaded.entry_id);
    };
    let data = EntryData::from_entry(&entry)?;
    let current = loaded.tokens.credential().await;
    let stored = &data.credential.refresh_token;
    if *stored != loaded.adopted_refresh_token && *stored != current.refresh_token {
        tracing::info!("adopting re-authenticated credential");
        loaded.tokens.replace(data.credential.clone()).await;
        loaded.adopted_refresh_token = data.credential.refresh_token;
    }
    let interval = EntryOptions::from_entry(&entry).interval();
    tracing::info!(interval = ?interval, "reloading entry");
    loaded.handle.reload(interval);
    Ok(())
}
