//! YouTube Analytics API report types.

use serde::{Deserialize, Serialize};

/// Response of `reports.query`.
///
/// With no dimensions requested the report has at most one row, holding one value per requested
/// metric in the order given by `column_headers`.
///
/// See: <https://developers.google.com/youtube/analytics/reference/reports/query>
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportResponse {
    /// The value will be `youtubeAnalytics#resultTable`.
    pub kind: String,
    #[serde(rename = "columnHeaders")]
    pub column_headers: Vec<ColumnHeader>,
    /// Absent when there is no data for the requested range.
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnHeader {
    /// The dimension or metric name, e.g. `views`.
    pub name: String,
    /// `DIMENSION` or `METRIC`.
    #[serde(rename = "columnType")]
    pub column_type: String,
    /// E.g. `INTEGER` or `FLOAT`.
    #[serde(rename = "dataType")]
    pub data_type: String,
}
