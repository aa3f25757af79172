//! Registry of OAuth client applications, keyed by integration domain.
//!
//! Client ids and secrets live here rather than in config entries. Integrations fetch the
//! credential fresh every time an entry is set up, so rotating the client secret never requires
//! touching the entries themselves.

use crate::storage::{self, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// An OAuth client application registered with the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredential {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

/// Persistent store of [`ClientCredential`]s.
#[derive(Debug)]
pub struct ApplicationCredentials {
    path: PathBuf,
    credentials: Mutex<BTreeMap<String, ClientCredential>>,
}

impl ApplicationCredentials {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let credentials: BTreeMap<String, ClientCredential> = storage::read(&path).await?;
        Ok(Self {
            path,
            credentials: Mutex::new(credentials),
        })
    }

    /// Returns the credential registered for `domain`, if any.
    pub async fn import(&self, domain: &str) -> Option<ClientCredential> {
        let credential = self.credentials.lock().await.get(domain).cloned();
        if credential.is_none() {
            tracing::debug!(domain, "no application credential registered");
        }
        credential
    }

    /// Registers (or replaces) the credential for `domain`.
    pub async fn register(
        &self,
        domain: &str,
        credential: ClientCredential,
    ) -> Result<(), StorageError> {
        let mut credentials = self.credentials.lock().await;
        credentials.insert(domain.to_string(), credential);
        storage::write(&self.path, &*credentials).await?;
        tracing::info!(domain, "registered application credential");
        Ok(())
    }

    pub async fn remove(&self, domain: &str) -> Result<bool, StorageError> {
        let mut credentials = self.credentials.lock().await;
        let removed = credentials.remove(domain).is_some();
        if removed {
            storage::write(&self.path, &*credentials).await?;
        }
        Ok(removed)
    }
}
