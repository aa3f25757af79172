//! In-memory entity and device registries.

use crate::entity::DeviceInfo;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Mutex;

/// A registered entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub unique_id: String,
    pub platform: String,
    pub config_entry_id: String,
    pub device_id: Option<String>,
    pub original_name: String,
}

/// Maps stable unique ids onto host-facing entity ids.
///
/// Registering the same unique id twice returns the original entity id, so reloading an entry
/// keeps every entity id stable.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: Mutex<IndexMap<String, RegistryEntry>>,
}

impl EntityRegistry {
    pub fn register(
        &self,
        platform: &str,
        config_entry_id: &str,
        unique_id: &str,
        name: &str,
        device_id: Option<&str>,
    ) -> RegistryEntry {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(unique_id) {
            return existing.clone();
        }

        let taken: HashSet<&str> = entries.values().map(|e| e.entity_id.as_str()).collect();
        let base = format!("sensor.{}", slugify(name));
        let mut entity_id = base.clone();
        let mut n = 2;
        while taken.contains(entity_id.as_str()) {
            entity_id = format!("{base}_{n}");
            n += 1;
        }

        let entry = RegistryEntry {
            entity_id,
            unique_id: unique_id.to_string(),
            platform: platform.to_string(),
            config_entry_id: config_entry_id.to_string(),
            device_id: device_id.map(str::to_string),
            original_name: name.to_string(),
        };
        tracing::debug!(entity_id = %entry.entity_id, unique_id, "registered entity");
        entries.insert(unique_id.to_string(), entry.clone());
        entry
    }

    pub fn get(&self, unique_id: &str) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(unique_id)
            .cloned()
    }

    pub fn entries_for_config_entry(&self, config_entry_id: &str) -> Vec<RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|e| e.config_entry_id == config_entry_id)
            .cloned()
            .collect()
    }

    /// Forgets every entity of a removed config entry.
    pub fn remove_config_entry(&self, config_entry_id: &str) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, e| e.config_entry_id != config_entry_id);
        before - entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: String,
    pub config_entries: Vec<String>,
    pub info: DeviceInfo,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<DeviceEntry>>,
}

impl DeviceRegistry {
    /// Looks a device up by any of its identifiers, registering it if it is new.
    pub fn get_or_create(&self, config_entry_id: &str, info: DeviceInfo) -> DeviceEntry {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(device) = devices
            .iter_mut()
            .find(|d| !d.info.identifiers.is_disjoint(&info.identifiers))
        {
            if !device.config_entries.iter().any(|c| c == config_entry_id) {
                device.config_entries.push(config_entry_id.to_string());
            }
            device.info = info;
            return device.clone();
        }

        let device = DeviceEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            config_entries: vec![config_entry_id.to_string()],
            info,
        };
        tracing::debug!(device_id = %device.id, name = %device.info.name, "registered device");
        devices.push(device.clone());
        device
    }

    pub fn devices_for_config_entry(&self, config_entry_id: &str) -> Vec<DeviceEntry> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|d| d.config_entries.iter().any(|c| c == config_entry_id))
            .cloned()
            .collect()
    }

    pub fn remove_config_entry(&self, config_entry_id: &str) {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        for device in devices.iter_mut() {
            device.config_entries.retain(|c| c != config_entry_id);
        }
        devices.retain(|d| !d.config_entries.is_empty());
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("unnamed");
    }
    slug
}
