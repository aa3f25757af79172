//! `videos.list`, reduced to the per-video counters the recent-uploads aggregate sums up.

use serde::Deserialize;
use std::collections::VecDeque;

/// <https://developers.google.com/youtube/v3/docs/videos/list>
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VideoListResponse {
    pub items: VecDeque<Video>,
}

#[derive(Debug, Deserialize)]
pub struct Video {
    pub id: String,
    #[serde(default)]
    pub statistics: VideoStatistics,
}

/// Decimal strings, as YouTube sends them. A counter the uploader chose to hide is absent
/// and comes through as `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub comment_count: Option<String>,
}
