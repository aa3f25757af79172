//! The stored OAuth credential and the manager that keeps its access token fresh.

use crate::oauth::{OAuthManager, TokenError};
use jiff::{SignedDuration, Timestamp};
use oauth2::basic::BasicTokenResponse;
use oauth2::{RefreshToken, TokenResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Access tokens are treated as expired this long before Google would reject them.
const EXPIRY_BUFFER: SignedDuration = SignedDuration::from_secs(300);

/// Assumed token lifetime when the token endpoint does not say.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// A refresh-token based credential, as persisted in the config entry.
///
/// `refresh_token` is what matters. The access token and its expiry are a cache that can be thrown
/// away and regenerated at any time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub refresh_token: String,
    #[serde(rename = "token", default)]
    pub access_token: Option<String>,
    #[serde(rename = "token_expiry", default)]
    pub expiry: Option<Timestamp>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("refresh_token", &"[redacted]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl Credential {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: None,
            expiry: None,
        }
    }

    /// Builds a credential from the response to an authorization-code exchange.
    ///
    /// Fails if Google did not issue a refresh token, which happens when consent was incomplete.
    pub fn from_token_response(token: &BasicTokenResponse) -> Result<Self, TokenError> {
        let Some(refresh_token) = token.refresh_token() else {
            return Err(TokenError::MissingRefreshToken);
        };
        let mut credential = Self::new(refresh_token.secret().clone());
        credential.apply(token, Timestamp::now());
        Ok(credential)
    }

    /// Whether the cached access token is absent or (nearly) expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        let (Some(_), Some(expiry)) = (&self.access_token, self.expiry) else {
            return true;
        };
        expiry
            .checked_sub(EXPIRY_BUFFER)
            .map_or(true, |deadline| now >= deadline)
    }

    /// Takes over the access token from a token response.
    ///
    /// The refresh token is only replaced if the response carries a new one.
    fn apply(&mut self, token: &BasicTokenResponse, now: Timestamp) {
        self.access_token = Some(token.access_token().secret().clone());
        let lifetime = token.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        self.expiry = Some(
            SignedDuration::try_from(lifetime)
                .ok()
                .and_then(|lifetime| now.checked_add(lifetime).ok())
                .unwrap_or(now),
        );
        if let Some(refresh_token) = token.refresh_token() {
            tracing::debug!("token response includes a new refresh token");
            self.refresh_token = refresh_token.secret().clone();
        }
    }
}

/// Hands out valid access tokens for one credential, refreshing through Google as needed.
///
/// Clones share the same credential.
#[derive(Debug, Clone)]
pub struct TokenManager {
    credential: Arc<Mutex<Credential>>,
    oauth: Arc<OAuthManager>,
}

impl TokenManager {
    pub fn new(credential: Credential, oauth: Arc<OAuthManager>) -> Self {
        Self {
            credential: Arc::new(Mutex::new(credential)),
            oauth,
        }
    }

    /// A copy of the current credential, e.g. for persisting it.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    /// Swaps in a credential obtained elsewhere, such as by re-authenticating.
    pub async fn replace(&self, credential: Credential) {
        *self.credential.lock().await = credential;
    }

    /// Returns a credential whose access token is valid right now, refreshing it first if needed.
    ///
    /// A [`TokenError::Revoked`] means the refresh token itself is dead and retrying is futile.
    #[tracing::instrument(skip(self))]
    pub async fn get_valid_credential(&self) -> Result<Credential, TokenError> {
        let mut credential = self.credential.lock().await;
        if credential.is_expired(Timestamp::now()) {
            tracing::debug!("access token expired, attempting refresh");
            self.refresh_locked(&mut credential).await?;
        }
        Ok(credential.clone())
    }

    /// Refreshes the access token unconditionally.
    ///
    /// Used before switching to a different API surface: Google resolves a stale token for a
    /// brand account to the wrong channel rather than rejecting it.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Credential, TokenError> {
        let mut credential = self.credential.lock().await;
        self.refresh_locked(&mut credential).await?;
        Ok(credential.clone())
    }

    async fn refresh_locked(&self, credential: &mut Credential) -> Result<(), TokenError> {
        if credential.refresh_token.is_empty() {
            return Err(TokenError::MissingRefreshToken);
        }
        let refresh_token = RefreshToken::new(credential.refresh_token.clone());
        let token = self.oauth.refresh_token(&refresh_token).await?;
        credential.apply(&token, Timestamp::now());
        tracing::trace!(expiry = ?credential.expiry, "access token refreshed");
        Ok(())
    }
}
