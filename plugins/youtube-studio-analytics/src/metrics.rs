//! Channel metrics, gathered from three independent sources.
//!
//! | source                         | API                         | key suffix  |
//! |--------------------------------|-----------------------------|-------------|
//! | [`MetricSource::Analytics30d`] | Analytics `reports.query`   | `_30d`      |
//! | [`MetricSource::Lifetime`]     | Data `channels.list`        | `_lifetime` |
//! | [`MetricSource::RecentVideos`] | Data `search` + `videos`    | `_10vids`   |
//!
//! The suffixes keep same-named metrics from different sources apart. A failing source never
//! takes the others down with it: [`MetricsClient::get_all_metrics`] records the failure under the
//! source's error key and carries on.

use crate::youtube_api::{ApiError, YouTubeClient};
use indexmap::IndexMap;
use jiff::civil::Date;
use jiff::{Span, Timestamp, Zoned};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metrics requested from the Analytics API for the rolling window.
pub const ANALYTICS_METRICS: [&str; 12] = [
    "views",
    "estimatedMinutesWatched",
    "averageViewDuration",
    "averageViewPercentage",
    "likes",
    "dislikes",
    "comments",
    "shares",
    "subscribersGained",
    "subscribersLost",
    "annotationClicks",
    "annotationClickThroughRate",
];

/// Metrics derived from the channel's lifetime statistics.
pub const LIFETIME_METRICS: [&str; 3] = ["subscriber_count", "video_count", "view_count"];

/// Metrics derived from the most recent uploads.
pub const RECENT_VIDEO_METRICS: [&str; 4] = [
    "recent_videos_count",
    "recent_videos_total_views",
    "recent_videos_total_likes",
    "recent_videos_total_comments",
];

pub const ANALYTICS_WINDOW_DAYS: i64 = 30;
pub const RECENT_VIDEO_COUNT: u32 = 10;

/// One metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetricValue::Null,
            Value::Bool(b) => MetricValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetricValue::Int(i),
                None => n.as_f64().map_or(MetricValue::Null, MetricValue::Float),
            },
            Value::String(s) => MetricValue::Text(s.clone()),
            other => MetricValue::Text(other.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<u64> for MetricValue {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or(MetricValue::Float(n as f64), MetricValue::Int)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Null => f.write_str("null"),
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(x) => write!(f, "{x}"),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

/// Where a metric comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    Analytics30d,
    Lifetime,
    RecentVideos,
}

impl MetricSource {
    pub const ALL: [MetricSource; 3] = [
        MetricSource::Analytics30d,
        MetricSource::Lifetime,
        MetricSource::RecentVideos,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            MetricSource::Analytics30d => "_30d",
            MetricSource::Lifetime => "_lifetime",
            MetricSource::RecentVideos => "_10vids",
        }
    }

    /// Key under which a failure of this source is reported in the flat mapping.
    pub fn error_key(self) -> &'static str {
        match self {
            MetricSource::Analytics30d => "error_30d",
            MetricSource::Lifetime => "error_lifetime",
            MetricSource::RecentVideos => "error_10vids",
        }
    }

    /// Appended to sensor names, in parentheses.
    pub fn label(self) -> &'static str {
        match self {
            MetricSource::Analytics30d => "30 days",
            MetricSource::Lifetime => "Lifetime",
            MetricSource::RecentVideos => "Last 10 Videos",
        }
    }

    /// The period a metric of this source covers, for display.
    pub fn date_range(self) -> &'static str {
        match self {
            MetricSource::Analytics30d => "30 days",
            MetricSource::Lifetime => "Lifetime",
            MetricSource::RecentVideos => "Last 10 videos by upload date",
        }
    }

    /// The source a suffixed metric key belongs to.
    pub fn of_key(key: &str) -> Option<MetricSource> {
        Self::ALL.into_iter().find(|s| key.ends_with(s.suffix()))
    }

    /// Every metric key this source produces.
    pub fn keys(self) -> Vec<String> {
        let names: &[&str] = match self {
            MetricSource::Analytics30d => &ANALYTICS_METRICS,
            MetricSource::Lifetime => &LIFETIME_METRICS,
            MetricSource::RecentVideos => &RECENT_VIDEO_METRICS,
        };
        names
            .iter()
            .map(|name| format!("{name}{}", self.suffix()))
            .collect()
    }
}

/// Lifetime statistics of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatistics {
    pub title: String,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub view_count: u64,
    pub hidden_subscriber_count: bool,
}

/// Totals over the most recent uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentVideoAggregate {
    pub count: u64,
    pub total_views: u64,
    pub total_likes: u64,
    pub total_comments: u64,
}

/// The merged result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Suffixed metric key to value, for every source that succeeded.
    pub values: IndexMap<String, MetricValue>,
    /// Failure marker per failed source.
    pub errors: IndexMap<MetricSource, String>,
    /// The channel title as last reported upstream, if the lifetime source succeeded.
    pub channel_title: Option<String>,
    pub last_updated: Timestamp,
}

impl MetricsSnapshot {
    pub fn new(last_updated: Timestamp) -> Self {
        Self {
            values: IndexMap::new(),
            errors: IndexMap::new(),
            channel_title: None,
            last_updated,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.values.get(key)
    }

    pub fn error(&self, source: MetricSource) -> Option<&str> {
        self.errors.get(&source).map(String::as_str)
    }

    pub fn has_auth_failure(&self) -> bool {
        self.errors.values().any(|code| code == "auth_failed")
    }

    /// Everything in one flat mapping, with per-source error keys and `last_updated`.
    pub fn to_flat_map(&self) -> IndexMap<String, serde_json::Value> {
        let mut flat: IndexMap<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or_default()))
            .collect();
        for (source, code) in &self.errors {
            flat.insert(source.error_key().to_string(), code.clone().into());
        }
        flat.insert(
            "last_updated".to_string(),
            self.last_updated.to_string().into(),
        );
        flat
    }

    fn record<T>(
        &mut self,
        source: MetricSource,
        result: Result<T, ApiError>,
        apply: impl FnOnce(&mut Self, T),
    ) {
        match result {
            Ok(data) => apply(self, data),
            Err(e) => {
                let code = e.code();
                tracing::warn!(source = ?source, %code, error = %e, "metrics source failed");
                self.errors.insert(source, code);
            }
        }
    }
}

/// Fetches metrics for one channel.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    api: YouTubeClient,
    channel_id: String,
}

impl MetricsClient {
    pub fn new(api: YouTubeClient, channel_id: impl Into<String>) -> Self {
        Self {
            api,
            channel_id: channel_id.into(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Lifetime statistics from the Data API.
    #[tracing::instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn get_channel_statistics(&self) -> Result<ChannelStatistics, ApiError> {
        self.api.tokens().refresh().await?;
        let Some(channel) = self.api.get_channel(&self.channel_id).await? else {
            return Err(ApiError::NotFound("Channel not found".to_string()));
        };
        let stats = channel.statistics.unwrap_or_default();
        let title = if channel.snippet.title.is_empty() {
            "Unknown".to_string()
        } else {
            channel.snippet.title
        };
        Ok(ChannelStatistics {
            title,
            subscriber_count: parse_count("subscriberCount", stats.subscriber_count.as_deref())?,
            video_count: parse_count("videoCount", stats.video_count.as_deref())?,
            view_count: parse_count("viewCount", stats.view_count.as_deref())?,
            hidden_subscriber_count: stats.hidden_subscriber_count,
        })
    }

    /// The given Analytics metrics over the `window_days` days up to today.
    ///
    /// Values are paired with the column headers the API returned, by position. A metric whose
    /// value is missing from the row comes back as [`MetricValue::Null`].
    #[tracing::instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn get_analytics_metrics(
        &self,
        metrics: &[&str],
        window_days: i64,
    ) -> Result<IndexMap<String, MetricValue>, ApiError> {
        self.api.tokens().refresh().await?;
        let (start, end) = report_window(Zoned::now().date(), window_days);
        let report = self
            .api
            .query_report(&self.channel_id, start, end, metrics)
            .await?;

        let Some(row) = report.rows.first() else {
            return Err(ApiError::NotFound(
                "No data returned from YouTube Analytics".to_string(),
            ));
        };
        Ok(report
            .column_headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let name = if header.name.is_empty() {
                    format!("metric_{i}")
                } else {
                    header.name.clone()
                };
                let value = row.get(i).map_or(MetricValue::Null, MetricValue::from_json);
                (name, value)
            })
            .collect())
    }

    /// Totals over the channel's `n` most recent uploads.
    ///
    /// A channel without uploads yields all zeros rather than an error.
    #[tracing::instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn get_recent_video_aggregate(
        &self,
        n: u32,
    ) -> Result<RecentVideoAggregate, ApiError> {
        self.api.tokens().refresh().await?;
        let ids = self.api.search_recent_videos(&self.channel_id, n).await?;
        if ids.is_empty() {
            tracing::debug!("channel has no videos");
            return Ok(RecentVideoAggregate::default());
        }

        let videos = self.api.list_video_statistics(&ids).await?;
        let mut aggregate = RecentVideoAggregate::default();
        for video in &videos {
            let stats = &video.statistics;
            aggregate.count += 1;
            aggregate.total_views += parse_count("viewCount", stats.view_count.as_deref())?;
            aggregate.total_likes += parse_count("likeCount", stats.like_count.as_deref())?;
            aggregate.total_comments +=
                parse_count("commentCount", stats.comment_count.as_deref())?;
        }
        Ok(aggregate)
    }

    /// Polls all three sources and merges them into one snapshot.
    #[tracing::instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn get_all_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new(Timestamp::now());

        let analytics = self
            .get_analytics_metrics(&ANALYTICS_METRICS, ANALYTICS_WINDOW_DAYS)
            .await;
        snapshot.record(MetricSource::Analytics30d, analytics, |s, values| {
            let suffix = MetricSource::Analytics30d.suffix();
            s.values.extend(
                values
                    .into_iter()
                    .map(|(name, value)| (format!("{name}{suffix}"), value)),
            );
        });

        let lifetime = self.get_channel_statistics().await;
        snapshot.record(MetricSource::Lifetime, lifetime, |s, stats| {
            s.values.insert(
                "subscriber_count_lifetime".to_string(),
                stats.subscriber_count.into(),
            );
            s.values
                .insert("video_count_lifetime".to_string(), stats.video_count.into());
            s.values
                .insert("view_count_lifetime".to_string(), stats.view_count.into());
            s.channel_title = Some(stats.title);
        });

        let recent = self.get_recent_video_aggregate(RECENT_VIDEO_COUNT).await;
        snapshot.record(MetricSource::RecentVideos, recent, |s, recent| {
            for (key, value) in [
                ("recent_videos_count_10vids", recent.count),
                ("recent_videos_total_views_10vids", recent.total_views),
                ("recent_videos_total_likes_10vids", recent.total_likes),
                ("recent_videos_total_comments_10vids", recent.total_comments),
            ] {
                s.values.insert(key.to_string(), value.into());
            }
        });

        tracing::debug!(
            values = snapshot.values.len(),
            failed_sources = snapshot.errors.len(),
            "collected metrics"
        );
        snapshot
    }
}

/// `[today - days, today]`, both ends inclusive as the Analytics API treats them.
fn report_window(today: Date, days: i64) -> (Date, Date) {
    let start = today
        .checked_sub(Span::new().days(days))
        .unwrap_or(Date::MIN);
    (start, today)
}

/// Counts are 64-bit unsigned integers sent as strings; an absent count is zero.
fn parse_count(field: &str, value: Option<&str>) -> Result<u64, ApiError> {
    match value {
        None => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| ApiError::Decode(format!("{field} is not a count: {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, TokenManager};
    use crate::oauth::OAuthManager;
    use crate::youtube_api::GoogleEndpoints;
    use ha_integration_sdk::application_credentials::ClientCredential;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn metrics_client(server: &mut Server) -> MetricsClient {
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
        let api = YouTubeClient::new(tokens, endpoints, reqwest::Client::new());
        MetricsClient::new(api, "UC123")
    }

    async fn mock_report(server: &mut Server, status: usize, body: &str) {
        server
            .mock("GET", "/v2/reports")
            .match_query(Matcher::UrlEncoded("ids".into(), "channel==UC123".into()))
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;
    }

    async fn mock_channel(server: &mut Server, status: usize) {
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("id".into(), "UC123".into()))
            .with_status(status)
            .with_body(
                r#"{"items":[{"id":"UC123","snippet":{"title":"Demo"},"statistics":{"subscriberCount":"1200","videoCount":"42","viewCount":"98765","hiddenSubscriberCount":false}}]}"#,
            )
            .create_async()
            .await;
    }

    async fn mock_recent(server: &mut Server, search_body: &str) {
        server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("channelId".into(), "UC123".into()),
                Matcher::UrlEncoded("order".into(), "date".into()),
                Matcher::UrlEncoded("maxResults".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(search_body)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/videos")
            .match_query(Matcher::UrlEncoded("id".into(), "v1,v2".into()))
            .with_status(200)
            .with_body(
                r#"{"items":[
                    {"id":"v1","statistics":{"viewCount":"100","likeCount":"10","commentCount":"1"}},
                    {"id":"v2","statistics":{"viewCount":"50","commentCount":"4"}}
                ]}"#,
            )
            .create_async()
            .await;
    }

    const TWO_VIDEOS: &str =
        r#"{"items":[{"id":{"kind":"youtube#video","videoId":"v1"}},{"id":{"kind":"youtube#video","videoId":"v2"}}]}"#;

    #[test]
    fn window_is_thirty_days_back() {
        let (start, end) = report_window(jiff::civil::date(2026, 3, 15), 30);
        assert_eq!(start, jiff::civil::date(2026, 2, 13));
        assert_eq!(end, jiff::civil::date(2026, 3, 15));
    }

    #[test]
    fn source_keys() {
        assert_eq!(MetricSource::of_key("views_30d"), Some(MetricSource::Analytics30d));
        assert_eq!(
            MetricSource::of_key("recent_videos_count_10vids"),
            Some(MetricSource::RecentVideos)
        );
        assert_eq!(MetricSource::of_key("channel_title"), None);
        assert_eq!(MetricSource::Analytics30d.keys().len(), 12);
        assert_eq!(
            MetricSource::Lifetime.keys(),
            vec![
                "subscriber_count_lifetime",
                "video_count_lifetime",
                "view_count_lifetime"
            ]
        );
    }

    #[tokio::test]
    async fn all_sources_succeed() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(
            &mut server,
            200,
            r#"{"columnHeaders":[{"name":"views","columnType":"METRIC","dataType":"INTEGER"},{"name":"averageViewPercentage","columnType":"METRIC","dataType":"FLOAT"}],"rows":[[1500,42.5]]}"#,
        )
        .await;
        mock_channel(&mut server, 200).await;
        mock_recent(&mut server, TWO_VIDEOS).await;

        let snapshot = client.get_all_metrics().await;
        assert!(snapshot.errors.is_empty(), "{:?}", snapshot.errors);
        assert_eq!(snapshot.get("views_30d"), Some(&MetricValue::Int(1500)));
        assert_eq!(
            snapshot.get("averageViewPercentage_30d"),
            Some(&MetricValue::Float(42.5))
        );
        assert_eq!(
            snapshot.get("subscriber_count_lifetime"),
            Some(&MetricValue::Int(1200))
        );
        assert_eq!(
            snapshot.get("recent_videos_total_views_10vids"),
            Some(&MetricValue::Int(150))
        );
        assert_eq!(
            snapshot.get("recent_videos_total_likes_10vids"),
            Some(&MetricValue::Int(10))
        );
        assert_eq!(
            snapshot.get("recent_videos_count_10vids"),
            Some(&MetricValue::Int(2))
        );
        assert_eq!(snapshot.channel_title.as_deref(), Some("Demo"));

        let flat = snapshot.to_flat_map();
        assert_eq!(flat["views_30d"], serde_json::json!(1500));
        assert!(flat.contains_key("last_updated"));
    }

    #[tokio::test]
    async fn one_failing_source_leaves_others_intact() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(&mut server, 500, "backend error").await;
        mock_channel(&mut server, 200).await;
        mock_recent(&mut server, TWO_VIDEOS).await;

        let snapshot = client.get_all_metrics().await;
        assert_eq!(
            snapshot.error(MetricSource::Analytics30d),
            Some("server_error_5xx")
        );
        assert_eq!(snapshot.error(MetricSource::Lifetime), None);
        assert_eq!(snapshot.error(MetricSource::RecentVideos), None);
        assert!(snapshot.get("views_30d").is_none());
        assert_eq!(
            snapshot.get("video_count_lifetime"),
            Some(&MetricValue::Int(42))
        );
        assert_eq!(
            snapshot.get("recent_videos_total_comments_10vids"),
            Some(&MetricValue::Int(5))
        );
        assert_eq!(
            snapshot.to_flat_map()["error_30d"],
            serde_json::json!("server_error_5xx")
        );
    }

    #[tokio::test]
    async fn unauthorized_source_is_auth_failed() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(&mut server, 200, r#"{"columnHeaders":[{"name":"views"}],"rows":[[1]]}"#)
            .await;
        mock_channel(&mut server, 401).await;
        mock_recent(&mut server, TWO_VIDEOS).await;

        let snapshot = client.get_all_metrics().await;
        assert_eq!(snapshot.error(MetricSource::Lifetime), Some("auth_failed"));
        assert!(snapshot.has_auth_failure());
        assert_eq!(snapshot.get("views_30d"), Some(&MetricValue::Int(1)));
        assert!(snapshot.get("subscriber_count_lifetime").is_none());
        assert_eq!(snapshot.error(MetricSource::RecentVideos), None);
        assert_eq!(
            snapshot.get("recent_videos_total_views_10vids"),
            Some(&MetricValue::Int(150))
        );
        assert_eq!(
            snapshot.get("recent_videos_count_10vids"),
            Some(&MetricValue::Int(2))
        );
    }

    #[tokio::test]
    async fn failing_recent_videos_leave_others_intact() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(&mut server, 200, r#"{"columnHeaders":[{"name":"views"}],"rows":[[7]]}"#)
            .await;
        mock_channel(&mut server, 200).await;
        server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let snapshot = client.get_all_metrics().await;
        assert_eq!(
            snapshot.error(MetricSource::RecentVideos),
            Some("server_error_5xx")
        );
        assert_eq!(snapshot.error(MetricSource::Analytics30d), None);
        assert_eq!(snapshot.error(MetricSource::Lifetime), None);
        assert!(!snapshot.has_auth_failure());
        assert_eq!(snapshot.get("views_30d"), Some(&MetricValue::Int(7)));
        assert_eq!(
            snapshot.get("subscriber_count_lifetime"),
            Some(&MetricValue::Int(1200))
        );
        for key in MetricSource::RecentVideos.keys() {
            assert!(snapshot.get(&key).is_none(), "{key}");
        }
        assert_eq!(
            snapshot.to_flat_map()["error_10vids"],
            serde_json::json!("server_error_5xx")
        );
    }

    #[tokio::test]
    async fn revoked_refresh_token_fails_every_source() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;
        let endpoints = GoogleEndpoints::with_base_url(&server.url()).unwrap();
        let oauth = OAuthManager::new(ClientCredential::new("id", "secret"), endpoints.clone());
        let tokens = TokenManager::new(Credential::new("dead"), Arc::new(oauth));
        let client = MetricsClient::new(
            YouTubeClient::new(tokens, endpoints, reqwest::Client::new()),
            "UC123",
        );

        let snapshot = client.get_all_metrics().await;
        for source in MetricSource::ALL {
            assert_eq!(snapshot.error(source), Some("auth_failed"));
        }
        assert!(snapshot.values.is_empty());
    }

    #[tokio::test]
    async fn channel_without_videos_yields_zeros() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_recent(&mut server, r#"{"kind":"youtube#searchListResponse","items":[]}"#).await;

        let aggregate = client
            .get_recent_video_aggregate(RECENT_VIDEO_COUNT)
            .await
            .unwrap();
        assert_eq!(aggregate, RecentVideoAggregate::default());
    }

    #[tokio::test]
    async fn short_analytics_row_is_padded_with_null() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(
            &mut server,
            200,
            r#"{"columnHeaders":[{"name":"views"},{"name":"likes"}],"rows":[[7]]}"#,
        )
        .await;

        let values = client
            .get_analytics_metrics(&["views", "likes"], 30)
            .await
            .unwrap();
        assert_eq!(values["views"], MetricValue::Int(7));
        assert_eq!(values["likes"], MetricValue::Null);
    }

    #[tokio::test]
    async fn empty_report_is_an_error() {
        let mut server = Server::new_async().await;
        let client = metrics_client(&mut server).await;
        mock_report(&mut server, 200, r#"{"columnHeaders":[{"name":"views"}]}"#).await;

        let err = client
            .get_analytics_metrics(&["views"], 30)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "No data returned from YouTube Analytics");
    }
}
