//! The authenticated HTTP client and its error classification.

use crate::credentials::TokenManager;
use crate::oauth::TokenError;
use crate::youtube_api::GoogleEndpoints;
use crate::youtube_api::{
    analytics::ReportResponse,
    channels::{Channel, ChannelListResponse},
    search::SearchListResponse,
    types::PagedStream,
    videos::{Video, VideoListResponse},
};
use jiff::civil::Date;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_stream::Stream;
use tracing::instrument;
use url::Url;

/// Most ids `videos.list` accepts in one call.
const MAX_IDS_PER_REQUEST: usize = 50;

/// Why a call to the YouTube APIs failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Our credential was rejected before or while making the request.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("YouTube API request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request to YouTube API failed: {0}")]
    Transport(String),
    #[error("unexpected YouTube API response: {0}")]
    Decode(String),
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    /// The short marker recorded for a failed metrics source.
    pub fn code(&self) -> String {
        match self {
            e if e.is_auth_failure() => "auth_failed".to_string(),
            ApiError::Http { status, .. } if (500..600).contains(status) => {
                "server_error_5xx".to_string()
            }
            ApiError::Http { status, .. } => format!("http_error_{status}"),
            e => e.to_string(),
        }
    }

    /// True if only a new user authorization can fix this.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Auth(_) | ApiError::Http { status: 401, .. }
        )
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Revoked(_) | TokenError::MissingRefreshToken => ApiError::Auth(e.to_string()),
            TokenError::Request(message) => ApiError::Transport(message),
        }
    }
}

/// The JSON error envelope Google APIs respond with.
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

/// Client for the read-only parts of the YouTube Data and Analytics APIs.
///
/// Every request carries an access token obtained from the shared [`TokenManager`], so clones of
/// the client (and of the manager) never race each other into duplicate refreshes.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    tokens: TokenManager,
    endpoints: GoogleEndpoints,
    client: reqwest::Client,
}

impl YouTubeClient {
    pub fn new(tokens: TokenManager, endpoints: GoogleEndpoints, client: reqwest::Client) -> Self {
        Self {
            tokens,
            endpoints,
            client,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Issues an authenticated GET and decodes the JSON response.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let credential = self.tokens.get_valid_credential().await?;
        let Some(access_token) = credential.access_token else {
            return Err(ApiError::Auth("no access token after refresh".to_string()));
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = serde_json::from_str::<GoogleErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.without_url().to_string()))
    }

    fn data_api(&self, resource: &str) -> Result<Url, ApiError> {
        self.endpoints
            .data_api
            .join(resource)
            .map_err(|e| ApiError::Transport(format!("construct {resource} url: {e}")))
    }

    /// Looks up a single channel by id, including its lifetime statistics.
    ///
    /// Returns `None` if the channel does not exist or is not visible to the authorized account.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>, ApiError> {
        let response: ChannelListResponse = self
            .get_json(
                self.data_api("channels")?,
                &[("part", "snippet,statistics"), ("id", channel_id)],
            )
            .await?;
        Ok(response.items.into_iter().next())
    }

    /// Returns a paginated stream of the channels owned by the authorized account itself.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub fn list_my_channels(&self) -> impl Stream<Item = Result<Channel, ApiError>> + use<'_> {
        PagedStream::new(move |page_token| async move {
            let response = self
                .list_channels_internal(("mine", "true"), 50, page_token)
                .await?;
            Ok((response.items, response.next_page_token))
        })
    }

    /// Returns a paginated stream of the brand channels the authorized account manages.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub fn list_managed_channels(
        &self,
    ) -> impl Stream<Item = Result<Channel, ApiError>> + use<'_> {
        PagedStream::new(move |page_token| async move {
            let response = self
                .list_channels_internal(("managedByMe", "true"), 50, page_token)
                .await?;
            Ok((response.items, response.next_page_token))
        })
    }

    async fn list_channels_internal(
        &self,
        filter: (&str, &str),
        max_results: u32,
        page_token: Option<String>,
    ) -> Result<ChannelListResponse, ApiError> {
        let max_results_string = max_results.to_string();
        let mut query_params = vec![
            ("part", "id,snippet"),
            filter,
            ("maxResults", max_results_string.as_str()),
        ];
        if let Some(ref token) = page_token {
            query_params.push(("pageToken", token.as_str()));
        }

        let channels: ChannelListResponse = self
            .get_json(self.data_api("channels")?, &query_params)
            .await?;
        tracing::debug!(
            filter = filter.0,
            total_results = channels.page_info.total_results,
            returned_items = channels.items.len(),
            "fetched channels"
        );
        Ok(channels)
    }

    /// Ids of the channel's `max_results` most recent public uploads, newest first.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/search/list>
    #[instrument(skip(self))]
    pub async fn search_recent_videos(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ApiError> {
        let max_results = max_results.to_string();
        let response: SearchListResponse = self
            .get_json(
                self.data_api("search")?,
                &[
                    ("part", "id"),
                    ("channelId", channel_id),
                    ("type", "video"),
                    ("order", "date"),
                    ("maxResults", &max_results),
                ],
            )
            .await?;
        Ok(response
            .items
            .into_iter()
            .filter_map(|result| result.id.video_id)
            .collect())
    }

    /// Fetches the statistics of the given videos.
    ///
    /// Videos that no longer exist are silently missing from the result.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self))]
    pub async fn list_video_statistics(&self, video_ids: &[String]) -> Result<Vec<Video>, ApiError> {
        let mut videos = Vec::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(MAX_IDS_PER_REQUEST) {
            let ids = chunk.join(",");
            let response: VideoListResponse = self
                .get_json(
                    self.data_api("videos")?,
                    &[("part", "statistics"), ("id", &ids)],
                )
                .await?;
            videos.extend(response.items);
        }
        Ok(videos)
    }

    /// Runs a channel-level, dimensionless analytics report over `[start, end]`.
    ///
    /// See: <https://developers.google.com/youtube/analytics/reference/reports/query>
    #[instrument(skip(self))]
    pub async fn query_report(
        &self,
        channel_id: &str,
        start: Date,
        end: Date,
        metrics: &[&str],
    ) -> Result<ReportResponse, ApiError> {
        let url = self
            .endpoints
            .analytics_api
            .join("reports")
            .map_err(|e| ApiError::Transport(format!("construct reports url: {e}")))?;
        let ids = format!("channel=={channel_id}");
        let start = start.to_string();
        let end = end.to_string();
        let metrics = metrics.join(",");
        let report: ReportResponse = self
            .get_json(
                url,
                &[
                    ("ids", &ids),
                    ("startDate", &start),
                    ("endDate", &end),
                    ("metrics", &metrics),
                ],
            )
            .await?;
        tracing::debug!(rows = report.rows.len(), "fetched analytics report");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::oauth::OAuthManager;
    use ha_integration_sdk::application_credentials::ClientCredential;
    use mockito::Matcher;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    async fn client_for(server: &mut mockito::Server) -> YouTubeClient {
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599}"#)
            .create_async()
            .await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();
        let oauth = OAuthManager::new(ClientCredential::new("id", "secret"), endpoints.clone());
        let tokens = TokenManager::new(Credential::new("refresh"), Arc::new(oauth));
        YouTubeClient::new(tokens, endpoints, reqwest::Client::new())
    }

    #[test]
    fn error_codes() {
        assert_eq!(ApiError::Auth("x".into()).code(), "auth_failed");
        let http = |status| ApiError::Http {
            status,
            message: "m".into(),
        };
        assert_eq!(http(401).code(), "auth_failed");
        assert_eq!(http(500).code(), "server_error_5xx");
        assert_eq!(http(503).code(), "server_error_5xx");
        assert_eq!(http(403).code(), "http_error_403");
        assert_eq!(ApiError::NotFound("Channel not found".into()).code(), "Channel not found");
        assert_eq!(
            ApiError::from(TokenError::Revoked("invalid_grant".into())).code(),
            "auth_failed"
        );
        assert_eq!(
            ApiError::from(TokenError::Request("dns".into())),
            ApiError::Transport("dns".into())
        );
    }

    #[tokio::test]
    async fn get_channel_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&mut server).await;
        let mock = server
            .mock("GET", "/youtube/v3/channels")
            .match_header("authorization", "Bearer fresh")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "UC123".into()),
                Matcher::UrlEncoded("part".into(), "snippet,statistics".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"kind":"youtube#channelListResponse","items":[{"id":"UC123","snippet":{"title":"Demo"},"statistics":{"subscriberCount":"12","videoCount":"3","viewCount":"456","hiddenSubscriberCount":false}}]}"#,
            )
            .create_async()
            .await;

        let channel = client.get_channel("UC123").await.unwrap().unwrap();
        assert_eq!(channel.snippet.title, "Demo");
        let statistics = channel.statistics.unwrap();
        assert_eq!(statistics.subscriber_count.as_deref(), Some("12"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_channel_is_none() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&mut server).await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"kind":"youtube#channelListResponse","pageInfo":{"totalResults":0,"resultsPerPage":5}}"#)
            .create_async()
            .await;

        assert!(client.get_channel("UCnope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn http_errors_carry_google_message() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&mut server).await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"quotaExceeded"}}"#)
            .create_async()
            .await;

        let err = client.get_channel("UC123").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Http {
                status: 403,
                message: "quotaExceeded".into()
            }
        );
        assert_eq!(err.code(), "http_error_403");
    }

    #[tokio::test]
    async fn channel_listing_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&mut server).await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("managedByMe".into(), "true".into()),
                Matcher::Regex("maxResults=50$".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"UC1","snippet":{"title":"One"}}],"nextPageToken":"p2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("managedByMe".into(), "true".into()),
                Matcher::UrlEncoded("pageToken".into(), "p2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"UC2","snippet":{"title":"Two"}}]}"#)
            .create_async()
            .await;

        let ids: Vec<String> = client
            .list_managed_channels()
            .map(|c| c.map(|c| c.id))
            .collect::<Result<_, _>>()
            .await
            .unwrap();
        assert_eq!(ids, vec!["UC1".to_string(), "UC2".to_string()]);
    }
}
