//! One sensor per metric key, all attached to a device representing the channel.

use crate::DOMAIN;
use crate::metrics::{MetricSource, MetricValue, MetricsSnapshot};
use ha_integration_sdk::coordinator::CoordinatorEntity;
use ha_integration_sdk::entity::{
    DeviceInfo, NativeValue, SensorDeviceClass, SensorEntity, SensorEntityDescription,
    SensorStateClass,
};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use SensorStateClass::{Measurement, TotalIncreasing};

/// Analytics reports watch time in minutes; the sensor shows hours.
const WATCH_TIME_KEY: &str = "estimatedMinutesWatched_30d";

struct Catalogued {
    key: &'static str,
    name: &'static str,
    unit: Option<&'static str>,
    device_class: Option<SensorDeviceClass>,
    state_class: SensorStateClass,
}

const fn metric(key: &'static str, name: &'static str, state_class: SensorStateClass) -> Catalogued {
    Catalogued {
        key,
        name,
        unit: None,
        device_class: None,
        state_class,
    }
}

const CATALOGUE: &[Catalogued] = &[
    metric("views_30d", "Views", TotalIncreasing),
    Catalogued {
        key: WATCH_TIME_KEY,
        name: "Watch Hours",
        unit: Some("h"),
        device_class: Some(SensorDeviceClass::Duration),
        state_class: TotalIncreasing,
    },
    Catalogued {
        key: "averageViewDuration_30d",
        name: "Average View Duration",
        unit: Some("s"),
        device_class: Some(SensorDeviceClass::Duration),
        state_class: Measurement,
    },
    Catalogued {
        key: "averageViewPercentage_30d",
        name: "Average View Percentage",
        unit: Some("%"),
        device_class: None,
        state_class: Measurement,
    },
    metric("likes_30d", "Likes", TotalIncreasing),
    metric("dislikes_30d", "Dislikes", TotalIncreasing),
    metric("comments_30d", "Comments", TotalIncreasing),
    metric("shares_30d", "Shares", TotalIncreasing),
    metric("subscribersGained_30d", "Subscribers Gained", TotalIncreasing),
    metric("subscribersLost_30d", "Subscribers Lost", TotalIncreasing),
    metric("annotationClicks_30d", "Annotation Clicks", TotalIncreasing),
    Catalogued {
        key: "annotationClickThroughRate_30d",
        name: "Annotation Click Through Rate",
        unit: Some("%"),
        device_class: None,
        state_class: Measurement,
    },
    metric("subscriber_count_lifetime", "Subscriber Count", Measurement),
    metric("video_count_lifetime", "Video Count", TotalIncreasing),
    metric("view_count_lifetime", "Total Views", TotalIncreasing),
    metric("recent_videos_count_10vids", "Recent Videos Count", Measurement),
    metric(
        "recent_videos_total_views_10vids",
        "Recent Videos Total Views",
        TotalIncreasing,
    ),
    metric(
        "recent_videos_total_likes_10vids",
        "Recent Videos Total Likes",
        TotalIncreasing,
    ),
    metric(
        "recent_videos_total_comments_10vids",
        "Recent Videos Total Comments",
        TotalIncreasing,
    ),
];

/// Descriptions of every sensor an entry provides, in display order.
///
/// Names carry the period in parentheses, e.g. `Views (30 days)`.
pub fn sensor_descriptions() -> Vec<SensorEntityDescription> {
    CATALOGUE
        .iter()
        .map(|entry| {
            let label = MetricSource::of_key(entry.key).map_or("", MetricSource::label);
            let mut builder = SensorEntityDescription::builder();
            builder
                .key(entry.key)
                .name(format!("{} ({label})", entry.name))
                .state_class(entry.state_class);
            if let Some(unit) = entry.unit {
                builder.native_unit_of_measurement(unit);
            }
            if let Some(device_class) = entry.device_class {
                builder.device_class(device_class);
            }
            builder
                .build()
                .expect("key and name are set for every catalogued sensor")
        })
        .collect()
}

/// The device every sensor of a channel belongs to.
pub fn device_info(channel_id: &str, channel_title: &str) -> DeviceInfo {
    DeviceInfo {
        identifiers: BTreeSet::from([(DOMAIN.to_string(), channel_id.to_string())]),
        name: channel_title.to_string(),
        manufacturer: "YouTube".to_string(),
        model: "YouTube Channel".to_string(),
    }
}

/// A single metric of a single channel.
#[derive(Debug, Clone)]
pub struct YouTubeSensor {
    description: SensorEntityDescription,
    unique_id: String,
    name: String,
    channel_id: String,
    channel_title: String,
    source: Option<MetricSource>,
    coordinator: CoordinatorEntity<MetricsSnapshot>,
}

impl YouTubeSensor {
    pub fn new(
        description: SensorEntityDescription,
        channel_id: &str,
        channel_title: &str,
        coordinator: CoordinatorEntity<MetricsSnapshot>,
    ) -> Self {
        Self {
            unique_id: format!("{channel_id}_{}", description.key),
            name: format!("{channel_title} {}", description.name),
            source: MetricSource::of_key(&description.key),
            channel_id: channel_id.to_string(),
            channel_title: channel_title.to_string(),
            description,
            coordinator,
        }
    }
}

/// Creates every sensor for one channel, sharing one coordinator.
pub fn build_sensors(
    channel_id: &str,
    channel_title: &str,
    coordinator: &CoordinatorEntity<MetricsSnapshot>,
) -> Vec<YouTubeSensor> {
    sensor_descriptions()
        .into_iter()
        .map(|description| {
            YouTubeSensor::new(description, channel_id, channel_title, coordinator.clone())
        })
        .collect()
}

impl SensorEntity for YouTubeSensor {
    fn description(&self) -> &SensorEntityDescription {
        &self.description
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn device_info(&self) -> DeviceInfo {
        device_info(&self.channel_id, &self.channel_title)
    }

    fn available(&self) -> bool {
        self.coordinator.available()
    }

    fn native_value(&self) -> Option<NativeValue> {
        let data = self.coordinator.data()?;
        let value = data.get(&self.description.key)?;
        if self.description.key == WATCH_TIME_KEY {
            let minutes = value.as_f64()?;
            return Some(NativeValue::Float((minutes / 60.0 * 100.0).round() / 100.0));
        }
        match value {
            MetricValue::Null => None,
            MetricValue::Bool(b) => Some(NativeValue::Bool(*b)),
            MetricValue::Int(i) => Some(NativeValue::Int(*i)),
            MetricValue::Float(x) => Some(NativeValue::Float(*x)),
            MetricValue::Text(s) => Some(NativeValue::Text(s.clone())),
        }
    }

    fn extra_state_attributes(&self) -> IndexMap<String, serde_json::Value> {
        let mut attributes = IndexMap::from([
            ("channel_id".to_string(), self.channel_id.clone().into()),
            ("channel_name".to_string(), self.channel_title.clone().into()),
        ]);
        if let Some(data) = self.coordinator.data() {
            attributes.insert(
                "last_updated".to_string(),
                data.last_updated.to_string().into(),
            );
            if let Some(source) = self.source {
                attributes.insert("date_range".to_string(), source.date_range().into());
            }
        }
        attributes
    }
}
