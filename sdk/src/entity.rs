//! Sensor entities and the display metadata that describes them.
//!
//! A sensor is described once, statically, by a [`SensorEntityDescription`]. At runtime the
//! integration implements [`SensorEntity`] to turn the latest data into a [`NativeValue`]; the
//! host renders that into an [`EntityState`] together with the description's unit and classes.

use derive_builder::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What kind of quantity a sensor measures.
///
/// The host uses this to pick icons and to convert between compatible units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum SensorDeviceClass {
    /// A length of time.
    Duration,
    /// A point in time.
    Timestamp,
    /// An amount of money.
    Monetary,
}

/// How the host should treat successive values of a sensor for long-term statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStateClass {
    /// A current value, e.g. an average or a rate.
    Measurement,
    /// A total that may go up and down.
    Total,
    /// A monotonically increasing total that only resets to zero.
    TotalIncreasing,
}

/// Static description of a sensor.
#[derive(Debug, Clone, Builder, PartialEq, Serialize, Deserialize)]
pub struct SensorEntityDescription {
    /// The key of the value this sensor reads from the integration's data.
    #[builder(setter(into))]
    pub key: String,

    /// Human-readable name, without any device prefix.
    #[builder(setter(into))]
    pub name: String,

    #[builder(setter(into, strip_option), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_unit_of_measurement: Option<String>,

    #[builder(setter(strip_option), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<SensorDeviceClass>,

    #[builder(setter(strip_option), default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<SensorStateClass>,
}

impl SensorEntityDescription {
    pub fn builder() -> SensorEntityDescriptionBuilder {
        SensorEntityDescriptionBuilder::default()
    }
}

/// A sensor reading as produced by the integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            NativeValue::Int(i) => write!(f, "{i}"),
            NativeValue::Float(x) => write!(f, "{x}"),
            NativeValue::Text(s) => f.write_str(s),
        }
    }
}

/// The rendered state of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    /// The data source is failing; the last value should not be trusted.
    Unavailable,
    /// The data source is healthy but has no value for this entity.
    Unknown,
    Value(NativeValue),
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Unavailable => f.write_str("unavailable"),
            EntityState::Unknown => f.write_str("unknown"),
            EntityState::Value(v) => v.fmt(f),
        }
    }
}

/// Identifies the device an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// `(domain, id)` pairs identifying the device across integrations.
    pub identifiers: BTreeSet<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

/// A sensor entity provided by an integration.
pub trait SensorEntity: Send + Sync {
    fn description(&self) -> &SensorEntityDescription;

    /// Stable identifier, unique within the integration's domain.
    fn unique_id(&self) -> &str;

    /// Full display name.
    fn name(&self) -> &str;

    fn device_info(&self) -> DeviceInfo;

    /// Whether the entity's data source is currently healthy.
    fn available(&self) -> bool {
        true
    }

    /// The current reading, or `None` if there is no value.
    fn native_value(&self) -> Option<NativeValue>;

    fn extra_state_attributes(&self) -> IndexMap<String, serde_json::Value> {
        IndexMap::new()
    }

    fn state(&self) -> EntityState {
        if !self.available() {
            return EntityState::Unavailable;
        }
        match self.native_value() {
            Some(value) => EntityState::Value(value),
            None => EntityState::Unknown,
        }
    }
}
