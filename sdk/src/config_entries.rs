//! Config entries: one persisted record per configured integration instance.
//!
//! The store is keyed by entry id and enforces that no two entries of the same domain share a
//! unique id. Integrations never edit the file directly; they go through [`ConfigEntries`], which
//! rewrites the backing document after every change.
//!
//! Several processes may share one data directory (a long-running poller next to a one-off
//! re-authentication, say). Every change therefore starts from the document as it is on disk, so
//! an edit made elsewhere to another entry, or to another part of the same entry, is not lost.

use crate::storage::{self, StorageError};
use indexmap::IndexMap;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// How a config entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Created through the guided setup.
    #[default]
    User,
    /// Imported from static configuration.
    Import,
}

/// A configured instance of an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    /// Identity anchor used for duplicate detection within a domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Integration-owned data written by the setup flow.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// User-adjustable options written by the options flow.
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub source: ConfigEntrySource,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            domain: domain.into(),
            title: title.into(),
            unique_id: None,
            data: Map::new(),
            options: Map::new(),
            source: ConfigEntrySource::User,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigEntriesError {
    #[error("{domain} entry with unique id {unique_id} is already configured")]
    AlreadyConfigured { domain: String, unique_id: String },
    #[error("unknown config entry {0}")]
    UnknownEntry(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Persistent store of [`ConfigEntry`] records.
#[derive(Debug)]
pub struct ConfigEntries {
    path: PathBuf,
    entries: Mutex<IndexMap<String, ConfigEntry>>,
}

impl ConfigEntries {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub async fn load(path: impl Into<PathBuf>) -> ConfigEntriesResult<Self> {
        let path = path.into();
        let entries = read_entries(&path).await?;
        tracing::debug!(path = %path.display(), count = entries.len(), "loaded config entries");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Picks up changes other processes made to the backing document.
    pub async fn sync(&self) -> ConfigEntriesResult<()> {
        let mut entries = self.entries.lock().await;
        *entries = read_entries(&self.path).await?;
        Ok(())
    }

    pub async fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.lock().await.get(entry_id).cloned()
    }

    /// All entries belonging to `domain`, in insertion order.
    pub async fn entries(&self, domain: &str) -> Vec<ConfigEntry> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect()
    }

    /// Adds a new entry, refusing duplicates of an existing `(domain, unique_id)` pair.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        let mut entries = self.entries.lock().await;
        *entries = read_entries(&self.path).await?;
        if let Some(unique_id) = &entry.unique_id
            && entries
                .values()
                .any(|e| e.domain == entry.domain && e.unique_id.as_ref() == Some(unique_id))
        {
            return Err(ConfigEntriesError::AlreadyConfigured {
                domain: entry.domain.clone(),
                unique_id: unique_id.clone(),
            });
        }

        entries.insert(entry.entry_id.clone(), entry.clone());
        self.persist(&entries).await?;
        tracing::info!(
            domain = %entry.domain,
            entry_id = %entry.entry_id,
            title = %entry.title,
            "added config entry"
        );
        Ok(entry)
    }

    /// Replaces the data of an existing entry.
    pub async fn update_data(
        &self,
        entry_id: &str,
        data: Map<String, Value>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        self.update(entry_id, |entry| {
            entry.data = data;
            true
        })
        .await
    }

    /// Replaces the options of an existing entry.
    pub async fn update_options(
        &self,
        entry_id: &str,
        options: Map<String, Value>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        self.update(entry_id, |entry| {
            entry.options = options;
            true
        })
        .await
    }

    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let mut entries = self.entries.lock().await;
        *entries = read_entries(&self.path).await?;
        let removed = entries
            .shift_remove(entry_id)
            .ok_or_else(|| ConfigEntriesError::UnknownEntry(entry_id.to_string()))?;
        self.persist(&entries).await?;
        tracing::info!(entry_id, "removed config entry");
        Ok(removed)
    }

    /// Edits the current stored version of an entry in place.
    ///
    /// `f` returns whether it changed anything; if not, nothing is written and the entry is
    /// returned as stored.
    pub async fn update(
        &self,
        entry_id: &str,
        f: impl FnOnce(&mut ConfigEntry) -> bool,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entries = self.entries.lock().await;
        *entries = read_entries(&self.path).await?;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::UnknownEntry(entry_id.to_string()))?;
        let mut edited = entry.clone();
        if !f(&mut edited) {
            return Ok(entry.clone());
        }
        edited.modified_at = Timestamp::now();
        *entry = edited.clone();
        let updated = edited;
        self.persist(&entries).await?;
        tracing::debug!(entry_id, "updated config entry");
        Ok(updated)
    }

    async fn persist(&self, entries: &IndexMap<String, ConfigEntry>) -> ConfigEntriesResult<()> {
        let all: Vec<&ConfigEntry> = entries.values().collect();
        storage::write(&self.path, &all).await?;
        Ok(())
    }
}

async fn read_entries(path: &Path) -> ConfigEntriesResult<IndexMap<String, ConfigEntry>> {
    let stored: Vec<ConfigEntry> = storage::read(path).await?;
    Ok(stored
        .into_iter()
        .map(|entry| (entry.entry_id.clone(), entry))
        .collect())
}
