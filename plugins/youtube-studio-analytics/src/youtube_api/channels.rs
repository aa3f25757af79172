//! `channels.list`, used for discovery during setup and for the lifetime counters.

use crate::youtube_api::types::PageInfo;
use serde::Deserialize;
use std::collections::VecDeque;

/// <https://developers.google.com/youtube/v3/docs/channels/list>
///
/// `items` is missing altogether when no channel matched, hence the blanket default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelListResponse {
    pub items: VecDeque<Channel>,
    pub page_info: PageInfo,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub snippet: ChannelSnippet,
    /// Only filled in when `part` includes `statistics`.
    #[serde(default)]
    pub statistics: Option<ChannelStatistics>,
}

impl Channel {
    /// The title, or the id for channels whose title came back blank.
    pub fn display_title(&self) -> &str {
        if self.snippet.title.is_empty() {
            &self.id
        } else {
            &self.snippet.title
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChannelSnippet {
    pub title: String,
}

/// Channel-wide totals. Counts are decimal strings; `subscriber_count` is absent when the owner
/// hides it, and otherwise rounded by YouTube to three significant figures.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub view_count: Option<String>,
    pub subscriber_count: Option<String>,
    pub hidden_subscriber_count: bool,
    pub video_count: Option<String>,
}
