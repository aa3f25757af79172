//! Polling of one channel's metrics.

use crate::metrics::{MetricSource, MetricsClient, MetricsSnapshot};
use ha_integration_sdk::coordinator::{DataUpdateCoordinator, UpdateError, UpdateMethod};
use std::time::Duration;

pub type YouTubeCoordinator = DataUpdateCoordinator<MetricsUpdater>;

/// Fetches a [`MetricsSnapshot`] per poll and decides whether the poll counts as a failure.
#[derive(Debug, Clone)]
pub struct MetricsUpdater {
    client: MetricsClient,
}

impl MetricsUpdater {
    pub fn new(client: MetricsClient) -> Self {
        Self { client }
    }
}

impl UpdateMethod for MetricsUpdater {
    type Data = MetricsSnapshot;

    async fn update(&self) -> Result<MetricsSnapshot, UpdateError> {
        classify(self.client.get_all_metrics().await)
    }
}

/// Builds the coordinator for the client's channel.
pub fn new_coordinator(client: MetricsClient, interval: Duration) -> YouTubeCoordinator {
    let name = format!("youtube_studio_analytics {}", client.channel_id());
    DataUpdateCoordinator::new(name, MetricsUpdater::new(client), interval)
}

/// Turns a merged snapshot into the outcome of a poll.
///
/// Any source rejected for authentication fails the whole poll, since the other sources will not
/// last long on the same credential. If no source produced values the poll failed too. Anything
/// else is published, with the failed sources' markers in place.
pub fn classify(snapshot: MetricsSnapshot) -> Result<MetricsSnapshot, UpdateError> {
    if let Some((source, _)) = snapshot
        .errors
        .iter()
        .find(|(_, code)| code.as_str() == "auth_failed")
    {
        return Err(UpdateError::AuthFailed(format!(
            "{} rejected the stored credentials",
            source.error_key()
        )));
    }

    if snapshot.values.is_empty() {
        let reasons = MetricSource::ALL
            .iter()
            .filter_map(|source| {
                snapshot
                    .error(*source)
                    .map(|code| format!("{}={code}", source.error_key()))
            })
            .collect::<Vec<_>>();
        return Err(UpdateError::UpdateFailed(if reasons.is_empty() {
            "no metrics returned".to_string()
        } else {
            reasons.join(", ")
        }));
    }

    for (source, code) in &snapshot.errors {
        tracing::warn!(source = ?source, %code, "publishing partial metrics");
    }
    Ok(snapshot)
}
