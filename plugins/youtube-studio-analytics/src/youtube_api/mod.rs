//! Thin client for the YouTube Data API v3 and the YouTube Analytics API v2.
//!
//! Only the read-only calls the integration needs are modelled:
//!
//!  - `channels.list` (by id, `mine=true`, `managedByMe=true`) for channel lookup and discovery;
//!  - `search.list` + `videos.list` for the most recent uploads and their statistics;
//!  - `reports.query` for channel-level analytics over a date range.
//!
//! Every call goes through [`YouTubeClient`], which obtains a freshly refreshed access token from
//! the [`TokenManager`](crate::credentials::TokenManager) first and classifies failures into
//! [`ApiError`].

use url::Url;

pub mod analytics;
pub mod channels;
pub mod client;
pub mod search;
pub mod types;
pub mod videos;

pub use client::{ApiError, YouTubeClient};
pub use types::{PageInfo, PagedStream};

/// Where the Google endpoints live.
///
/// Production values are the default; tests point everything at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub auth_url: Url,
    pub token_url: Url,
    /// Base of the Data API, with a trailing slash.
    pub data_api: Url,
    /// Base of the Analytics API, with a trailing slash.
    pub analytics_api: Url,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
                .expect("static URL is valid"),
            token_url: Url::parse("https://oauth2.googleapis.com/token")
                .expect("static URL is valid"),
            data_api: Url::parse("https://www.googleapis.com/youtube/v3/")
                .expect("static URL is valid"),
            analytics_api: Url::parse("https://youtubeanalytics.googleapis.com/v2/")
                .expect("static URL is valid"),
        }
    }
}

impl GoogleEndpoints {
    /// Serves every endpoint from below `base`, using the production paths.
    pub fn with_base_url(base: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base)?;
        Ok(Self {
            auth_url: base.join("/o/oauth2/v2/auth")?,
            token_url: base.join("/token")?,
            data_api: base.join("/youtube/v3/")?,
            analytics_api: base.join("/v2/")?,
        })
    }
}
