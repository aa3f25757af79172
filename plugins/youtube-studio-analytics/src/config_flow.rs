//! Guided setup of an entry, its re-authentication, and its options.
//!
//! The setup flow goes `begin` → (user consents at Google) → `complete_oauth` → `select_channel`.
//! Channel selection comes after authorization so the channel can be verified with the very
//! credential that will be stored. Every flow carries its own state; nothing is shared between
//! concurrently running flows except the config entry store.

use crate::credentials::{Credential, TokenManager};
use crate::oauth::{OAuthManager, PendingAuthorization};
use crate::youtube_api::{ApiError, GoogleEndpoints, YouTubeClient};
use crate::{
    Channel, ChannelKind, DOMAIN, EntryData, EntryOptions, MAX_UPDATE_INTERVAL_SECONDS,
    MIN_UPDATE_INTERVAL_SECONDS,
};
use eyre::Context;
use ha_integration_sdk::Hass;
use ha_integration_sdk::config_entries::{ConfigEntriesError, ConfigEntry};
use ha_integration_sdk::flow::FlowResult;
use oauth2::{AuthorizationCode, RedirectUrl};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_stream::StreamExt;

pub const STEP_AUTH: &str = "auth";
pub const STEP_CHANNEL_ENTRY: &str = "channel_entry";
pub const STEP_INIT: &str = "init";

#[derive(Debug)]
enum Mode {
    User,
    Reauth { entry_id: String },
}

#[derive(Debug)]
enum Step {
    Start,
    AwaitingAuthorization {
        oauth: Arc<OAuthManager>,
        pending: PendingAuthorization,
    },
    ChannelEntry {
        client: YouTubeClient,
        channels: Vec<Channel>,
    },
    Done,
}

/// One run of the setup or re-authentication flow.
#[derive(Debug)]
pub struct ConfigFlow {
    hass: Hass,
    endpoints: GoogleEndpoints,
    http: reqwest::Client,
    mode: Mode,
    step: Step,
}

impl ConfigFlow {
    /// A flow that adds a new entry.
    pub fn new(hass: Hass, endpoints: GoogleEndpoints, http: reqwest::Client) -> Self {
        Self {
            hass,
            endpoints,
            http,
            mode: Mode::User,
            step: Step::Start,
        }
    }

    /// A flow that renews the credential of an existing entry.
    pub fn reauth(
        hass: Hass,
        endpoints: GoogleEndpoints,
        http: reqwest::Client,
        entry_id: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::Reauth {
                entry_id: entry_id.into(),
            },
            ..Self::new(hass, endpoints, http)
        }
    }

    /// Starts the flow, sending the user to Google's consent page on success.
    pub async fn begin(&mut self, redirect_url: RedirectUrl) -> FlowResult {
        match &self.mode {
            Mode::User => {
                if !self.hass.config_entries.entries(DOMAIN).await.is_empty() {
                    return FlowResult::abort("already_configured");
                }
            }
            Mode::Reauth { entry_id } => {
                if self.hass.config_entries.get(entry_id).await.is_none() {
                    return FlowResult::abort("unknown_entry");
                }
            }
        }
        let Some(credential) = self.hass.application_credentials.import(DOMAIN).await else {
            return FlowResult::abort("missing_credentials");
        };

        let oauth = Arc::new(OAuthManager::new(credential, self.endpoints.clone()));
        let pending = oauth.authorize(redirect_url);
        let url = pending.url.to_string();
        self.step = Step::AwaitingAuthorization { oauth, pending };
        FlowResult::ExternalStep {
            step_id: STEP_AUTH.to_string(),
            url,
        }
    }

    /// Finishes authorization with what Google sent back to the redirect URL.
    #[tracing::instrument(skip_all)]
    pub async fn complete_oauth(&mut self, code: &str, state: &str) -> eyre::Result<FlowResult> {
        let Step::AwaitingAuthorization { oauth, pending } =
            std::mem::replace(&mut self.step, Step::Done)
        else {
            return Ok(FlowResult::abort("invalid_state"));
        };
        if pending.csrf.secret() != state {
            tracing::warn!("OAuth state does not match the authorization request");
            return Ok(FlowResult::abort("invalid_state"));
        }

        let token = match oauth
            .exchange_code(pending, AuthorizationCode::new(code.to_string()))
            .await
        {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "authorization code exchange failed");
                return Ok(FlowResult::abort("oauth_failed"));
            }
        };
        let credential = match Credential::from_token_response(&token) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "authorization did not yield a usable credential");
                return Ok(FlowResult::abort("oauth_failed"));
            }
        };
        let tokens = TokenManager::new(credential, oauth);
        let client = YouTubeClient::new(tokens, self.endpoints.clone(), self.http.clone());

        if let Mode::Reauth { entry_id } = &self.mode {
            let entry_id = entry_id.clone();
            return self.finish_reauth(&entry_id, &client).await;
        }

        let channels = match fetch_accessible_channels(&client).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::warn!(error = %e, "channel discovery failed, falling back to manual entry");
                Vec::new()
            }
        };
        let form = channel_form(&channels);
        self.step = Step::ChannelEntry { client, channels };
        Ok(form)
    }

    async fn finish_reauth(
        &self,
        entry_id: &str,
        client: &YouTubeClient,
    ) -> eyre::Result<FlowResult> {
        let Some(entry) = self.hass.config_entries.get(entry_id).await else {
            return Ok(FlowResult::abort("unknown_entry"));
        };
        let mut data =
            EntryData::from_entry(&entry).context("read entry being re-authenticated")?;

        let channels = match fetch_accessible_channels(client).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::warn!(error = %e, "could not list channels of re-authenticated account");
                return Ok(FlowResult::abort("cannot_connect"));
            }
        };
        if !channels.iter().any(|c| c.id == data.channel_id) {
            tracing::warn!(
                channel = %data.channel_id,
                "re-authenticated account cannot access the configured channel"
            );
            return Ok(FlowResult::abort("reauth_wrong_account"));
        }

        data.credential = client.tokens().credential().await;
        self.hass
            .config_entries
            .update_data(entry_id, data.to_map())
            .await
            .context("store renewed credential")?;
        tracing::info!(channel = %data.channel_id, "re-authentication successful");
        Ok(FlowResult::abort("reauth_successful"))
    }

    /// Verifies the chosen channel and creates the entry for it.
    #[tracing::instrument(skip(self))]
    pub async fn select_channel(&mut self, channel_id: &str) -> eyre::Result<FlowResult> {
        let Step::ChannelEntry { client, channels } = &self.step else {
            return Ok(FlowResult::abort("invalid_state"));
        };
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Ok(channel_form(channels).with_error("channel_id", "channel_id_required"));
        }
        // another flow may have finished since this one began
        self.hass.config_entries.sync().await?;
        if !self.hass.config_entries.entries(DOMAIN).await.is_empty() {
            return Ok(FlowResult::abort("already_configured"));
        }

        // a token issued for the current selection, see TokenManager::refresh
        if let Err(e) = client.tokens().refresh().await {
            tracing::warn!(error = %e, "token refresh before channel validation failed");
            return Ok(channel_form(channels).with_error("channel_id", "channel_validation_failed"));
        }
        let channel = match client.get_channel(channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                return Ok(channel_form(channels).with_error("channel_id", "channel_not_found"));
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel validation failed");
                return Ok(
                    channel_form(channels).with_error("channel_id", "channel_validation_failed")
                );
            }
        };

        let channel_title = channel.display_title().to_string();
        let data = EntryData {
            credential: client.tokens().credential().await,
            channel_id: channel_id.to_string(),
            channel_title: channel_title.clone(),
        };
        let entry = ConfigEntry::new(DOMAIN, format!("YouTube: {channel_title}"))
            .with_unique_id(channel_id)
            .with_data(data.to_map())
            .with_options(EntryOptions::default().to_map());

        match self.hass.config_entries.add(entry).await {
            Ok(entry) => {
                self.step = Step::Done;
                Ok(FlowResult::CreateEntry {
                    entry_id: entry.entry_id,
                    title: entry.title,
                })
            }
            Err(ConfigEntriesError::AlreadyConfigured { .. }) => {
                Ok(FlowResult::abort("already_configured"))
            }
            Err(e) => Err(e).context("store new config entry"),
        }
    }
}

fn channel_form(channels: &[Channel]) -> FlowResult {
    let listed = if channels.is_empty() {
        "none found".to_string()
    } else {
        channels
            .iter()
            .map(|c| format!("{} ({})", c.title, c.id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    FlowResult::form(STEP_CHANNEL_ENTRY).with_placeholder("channels", listed)
}

/// Every channel the authorized identity can act for, its own first.
///
/// Only the account's own channels are required. Listing managed channels is refused for accounts
/// that are not content owners, so failure there just means there are none.
pub async fn fetch_accessible_channels(client: &YouTubeClient) -> Result<Vec<Channel>, ApiError> {
    let mut seen = HashSet::new();
    let mut channels = Vec::new();

    let mine = client.list_my_channels();
    let mut mine = std::pin::pin!(mine);
    while let Some(channel) = mine.next().await {
        let channel = channel?;
        if seen.insert(channel.id.clone()) {
            channels.push(Channel {
                id: channel.id,
                title: channel.snippet.title,
                kind: ChannelKind::Personal,
            });
        }
    }

    let managed = client.list_managed_channels();
    let mut managed = std::pin::pin!(managed);
    while let Some(channel) = managed.next().await {
        match channel {
            Ok(channel) => {
                if seen.insert(channel.id.clone()) {
                    channels.push(Channel {
                        id: channel.id,
                        title: channel.snippet.title,
                        kind: ChannelKind::Brand,
                    });
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "managed channels unavailable");
                break;
            }
        }
    }

    tracing::debug!(count = channels.len(), "discovered channels");
    Ok(channels)
}

/// Adjusts the polling interval of an existing entry.
#[derive(Debug)]
pub struct OptionsFlow {
    hass: Hass,
    entry_id: String,
}

impl OptionsFlow {
    pub fn new(hass: Hass, entry_id: impl Into<String>) -> Self {
        Self {
            hass,
            entry_id: entry_id.into(),
        }
    }

    /// The options form, showing the current interval and the permitted range.
    pub async fn init(&self) -> FlowResult {
        let Some(entry) = self.hass.config_entries.get(&self.entry_id).await else {
            return FlowResult::abort("unknown_entry");
        };
        let current = EntryOptions::from_entry(&entry);
        FlowResult::form(STEP_INIT)
            .with_placeholder(
                "update_interval_seconds",
                current.update_interval_seconds.to_string(),
            )
            .with_placeholder("min", MIN_UPDATE_INTERVAL_SECONDS.to_string())
            .with_placeholder("max", MAX_UPDATE_INTERVAL_SECONDS.to_string())
    }

    /// Stores the new interval, clamped to the permitted range.
    ///
    /// Running entries pick it up on their next reload.
    pub async fn submit(&self, update_interval_seconds: u64) -> eyre::Result<FlowResult> {
        let options = EntryOptions::with_interval(update_interval_seconds);
        if options.update_interval_seconds != update_interval_seconds {
            tracing::info!(
                requested = update_interval_seconds,
                applied = options.update_interval_seconds,
                "update interval clamped"
            );
        }
        let entry = match self
            .hass
            .config_entries
            .update_options(&self.entry_id, options.to_map())
            .await
        {
            Ok(entry) => entry,
            Err(ConfigEntriesError::UnknownEntry(_)) => {
                return Ok(FlowResult::abort("unknown_entry"));
            }
            Err(e) => return Err(e).context("store options"),
        };
        Ok(FlowResult::CreateEntry {
            entry_id: entry.entry_id,
            title: entry.title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_integration_sdk::application_credentials::ClientCredential;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    const TOKENS: &str = r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599,"refresh_token":"new-refresh"}"#;

    fn redirect() -> RedirectUrl {
        RedirectUrl::new("http://127.0.0.1:9/callback".to_string()).unwrap()
    }

    async fn hass(dir: &tempfile::TempDir) -> Hass {
        let hass = Hass::open(dir.path()).await.unwrap();
        hass.application_credentials
            .register(DOMAIN, ClientCredential::new("id", "secret"))
            .await
            .unwrap();
        hass
    }

    async fn mock_token(server: &mut Server, body: &str) {
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
    }

    async fn mock_channels(server: &mut Server, mine: &str) {
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("mine".into(), "true".into()))
            .with_body(mine)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("managedByMe".into(), "true".into()))
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"Access forbidden."}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("id".into(), "UC123".into()))
            .with_body(r#"{"items":[{"id":"UC123","snippet":{"title":"Demo"}}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("id".into(), "UCmissing".into()))
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;
    }

    const DEMO_IS_MINE: &str = r#"{"items":[{"id":"UC123","snippet":{"title":"Demo"}}]}"#;

    /// Runs `begin` and returns the `state` Google would echo back.
    async fn start(flow: &mut ConfigFlow) -> String {
        let FlowResult::ExternalStep { step_id, url } = flow.begin(redirect()).await else {
            panic!("expected external step");
        };
        assert_eq!(step_id, STEP_AUTH);
        let url = url::Url::parse(&url).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn creates_entry_for_verified_channel() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, TOKENS).await;
        mock_channels(&mut server, DEMO_IS_MINE).await;
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();
        let mut flow = ConfigFlow::new(hass.clone(), endpoints, reqwest::Client::new());

        let state = start(&mut flow).await;
        let form = flow.complete_oauth("the-code", &state).await.unwrap();
        assert_eq!(
            form,
            FlowResult::form(STEP_CHANNEL_ENTRY).with_placeholder("channels", "Demo (UC123)")
        );

        let result = flow.select_channel("  ").await.unwrap();
        assert_eq!(result.form_error("channel_id"), Some("channel_id_required"));
        let result = flow.select_channel("UCmissing").await.unwrap();
        assert_eq!(result.form_error("channel_id"), Some("channel_not_found"));

        let FlowResult::CreateEntry { entry_id, title } =
            flow.select_channel("UC123").await.unwrap()
        else {
            panic!("expected entry");
        };
        assert_eq!(title, "YouTube: Demo");
        let entry = hass.config_entries.get(&entry_id).await.unwrap();
        assert_eq!(entry.unique_id.as_deref(), Some("UC123"));
        let data = EntryData::from_entry(&entry).unwrap();
        assert_eq!(data.channel_id, "UC123");
        assert_eq!(data.channel_title, "Demo");
        assert_eq!(data.credential.refresh_token, "new-refresh");
        assert_eq!(EntryOptions::from_entry(&entry), EntryOptions::default());

        // single entry per installation
        let mut again = ConfigFlow::new(
            hass,
            GoogleEndpoints::with_base_url(&server.url()).unwrap(),
            reqwest::Client::new(),
        );
        assert!(again.begin(redirect()).await.is_abort_with("already_configured"));
    }

    #[tokio::test]
    async fn racing_flows_create_one_entry() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, TOKENS).await;
        mock_channels(&mut server, DEMO_IS_MINE).await;
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();

        let mut first = ConfigFlow::new(hass.clone(), endpoints.clone(), reqwest::Client::new());
        let mut second = ConfigFlow::new(hass.clone(), endpoints, reqwest::Client::new());
        let first_state = start(&mut first).await;
        let second_state = start(&mut second).await;
        first.complete_oauth("a", &first_state).await.unwrap();
        second.complete_oauth("b", &second_state).await.unwrap();

        assert!(matches!(
            first.select_channel("UC123").await.unwrap(),
            FlowResult::CreateEntry { .. }
        ));
        assert!(
            second
                .select_channel("UC123")
                .await
                .unwrap()
                .is_abort_with("already_configured")
        );
        assert_eq!(hass.config_entries.entries(DOMAIN).await.len(), 1);
    }

    #[tokio::test]
    async fn racing_flows_for_different_channels_create_one_entry() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, TOKENS).await;
        mock_channels(&mut server, DEMO_IS_MINE).await;
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();

        let mut first = ConfigFlow::new(hass.clone(), endpoints.clone(), reqwest::Client::new());
        let first_state = start(&mut first).await;
        first.complete_oauth("a", &first_state).await.unwrap();

        // a second process runs its own flow against the same data dir
        let elsewhere = Hass::open(dir.path()).await.unwrap();
        let mut second = ConfigFlow::new(elsewhere, endpoints, reqwest::Client::new());
        let second_state = start(&mut second).await;
        second.complete_oauth("b", &second_state).await.unwrap();

        assert!(matches!(
            first.select_channel("UC123").await.unwrap(),
            FlowResult::CreateEntry { .. }
        ));
        assert!(
            second
                .select_channel("UC999")
                .await
                .unwrap()
                .is_abort_with("already_configured")
        );
        let reopened = Hass::open(dir.path()).await.unwrap();
        assert_eq!(reopened.config_entries.entries(DOMAIN).await.len(), 1);
    }

    #[tokio::test]
    async fn aborts_without_application_credential() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::open(dir.path()).await.unwrap();
        let mut flow = ConfigFlow::new(hass, GoogleEndpoints::default(), reqwest::Client::new());
        assert!(flow.begin(redirect()).await.is_abort_with("missing_credentials"));
    }

    #[tokio::test]
    async fn rejects_foreign_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = ConfigFlow::new(
            hass(&dir).await,
            GoogleEndpoints::default(),
            reqwest::Client::new(),
        );
        start(&mut flow).await;
        let result = flow.complete_oauth("code", "forged").await.unwrap();
        assert!(result.is_abort_with("invalid_state"));
    }

    #[tokio::test]
    async fn aborts_without_refresh_token() {
        let mut server = Server::new_async().await;
        mock_token(
            &mut server,
            r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();
        let mut flow = ConfigFlow::new(hass(&dir).await, endpoints, reqwest::Client::new());

        let state = start(&mut flow).await;
        let result = flow.complete_oauth("code", &state).await.unwrap();
        assert!(result.is_abort_with("oauth_failed"));
    }

    async fn existing_entry(hass: &Hass, channel_id: &str) -> ConfigEntry {
        let data = EntryData {
            credential: Credential::new("old-refresh"),
            channel_id: channel_id.to_string(),
            channel_title: "Demo".to_string(),
        };
        hass.config_entries
            .add(
                ConfigEntry::new(DOMAIN, "YouTube: Demo")
                    .with_unique_id(channel_id)
                    .with_data(data.to_map()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reauth_replaces_only_the_credential() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, TOKENS).await;
        mock_channels(&mut server, DEMO_IS_MINE).await;
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let entry = existing_entry(&hass, "UC123").await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();

        let mut flow = ConfigFlow::reauth(
            hass.clone(),
            endpoints,
            reqwest::Client::new(),
            &entry.entry_id,
        );
        let state = start(&mut flow).await;
        let result = flow.complete_oauth("code", &state).await.unwrap();
        assert!(result.is_abort_with("reauth_successful"), "{result:?}");

        let stored = hass.config_entries.get(&entry.entry_id).await.unwrap();
        let data = EntryData::from_entry(&stored).unwrap();
        assert_eq!(data.credential.refresh_token, "new-refresh");
        assert_eq!(data.channel_id, "UC123");
        assert_eq!(stored.unique_id.as_deref(), Some("UC123"));
    }

    #[tokio::test]
    async fn reauth_with_other_account_aborts() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, TOKENS).await;
        mock_channels(
            &mut server,
            r#"{"items":[{"id":"UCother","snippet":{"title":"Someone else"}}]}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let entry = existing_entry(&hass, "UC123").await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();

        let mut flow = ConfigFlow::reauth(
            hass.clone(),
            endpoints,
            reqwest::Client::new(),
            &entry.entry_id,
        );
        let state = start(&mut flow).await;
        let result = flow.complete_oauth("code", &state).await.unwrap();
        assert!(result.is_abort_with("reauth_wrong_account"), "{result:?}");

        let stored = hass.config_entries.get(&entry.entry_id).await.unwrap();
        assert_eq!(stored, entry);
    }

    #[tokio::test]
    async fn options_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let hass = hass(&dir).await;
        let entry = existing_entry(&hass, "UC123").await;
        let flow = OptionsFlow::new(hass.clone(), &entry.entry_id);

        let form = flow.init().await;
        assert_eq!(
            form,
            FlowResult::form(STEP_INIT)
                .with_placeholder("update_interval_seconds", "3600")
                .with_placeholder("min", "300")
                .with_placeholder("max", "86400")
        );

        let result = flow.submit(60).await.unwrap();
        assert!(matches!(result, FlowResult::CreateEntry { .. }));
        let stored = hass.config_entries.get(&entry.entry_id).await.unwrap();
        assert_eq!(EntryOptions::from_entry(&stored).update_interval_seconds, 300);

        let gone = OptionsFlow::new(hass, "nope");
        assert!(gone.submit(600).await.unwrap().is_abort_with("unknown_entry"));
    }
}
