//! `search.list`, which is how a channel's newest uploads are found.

use serde::Deserialize;
use std::collections::VecDeque;

/// <https://developers.google.com/youtube/v3/docs/search/list>
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchListResponse {
    pub items: VecDeque<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub id: SearchResultId,
}

/// Which resource a hit refers to. Only video hits carry `videoId`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResultId {
    pub kind: String,
    pub video_id: Option<String>,
}
