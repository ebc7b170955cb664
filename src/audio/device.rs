//! Capture-device enumeration, classification, and registry
//!
//! DAF needs acoustic isolation between the speaker's ears and the
//! microphone, so headset-style devices are preferred automatically.
//! Classification is a label heuristic; ids and labels are session-scoped
//! and never persisted.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::DeviceError;

/// Label substrings that indicate an acoustically-isolated microphone
const HEADSET_KEYWORDS: &[&str] = &[
    "headphone",
    "headset",
    "earphone",
    "earbud",
    "earpiece",
    "airpod",
    "bluetooth",
    "bt ",
];

/// A known capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Session-scoped identifier
    pub id: String,
    /// Human-readable label (populated only after a permission grant)
    pub label: String,
    /// True when the platform reports this as the default input
    pub is_default: bool,
    /// Headset classification inferred from the label
    pub is_headset: bool,
}

/// Heuristic keyword match for headset-style devices
pub fn is_headset_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    HEADSET_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// List audio-input devices through the default host.
///
/// cpal exposes labels without a separate permission grant, so no
/// acquire-then-release round trip is needed here; backends that gate labels
/// behind a grant perform that dance inside their `enumerate`.
pub fn list_input_devices() -> Result<Vec<DeviceDescriptor>, DeviceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?;

    let mut descriptors = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            descriptors.push(DeviceDescriptor {
                id: format!("input:{}", name),
                label: name.clone(),
                is_default: default_name.as_ref() == Some(&name),
                is_headset: is_headset_label(&name),
            });
        }
    }
    Ok(descriptors)
}

/// Find a cpal input device by registry id
pub fn get_input_device(id: &str) -> Result<cpal::Device, DeviceError> {
    let name = id.strip_prefix("input:").unwrap_or(id);
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(DeviceError::NotFound(id.to_string()))
}

/// Ordered collection of known capture devices.
///
/// Refreshed on explicit enumeration or a platform device-change
/// notification; not persisted across sessions.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    active_index: Option<usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the known device list, keeping the active selection if the
    /// device still exists
    pub fn refresh(&mut self, devices: Vec<DeviceDescriptor>) {
        let active_id = self.active_id().map(str::to_string);
        self.devices = devices;
        self.active_index = active_id.and_then(|id| self.index_of(&id));
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.id == id)
    }

    /// Marks a device as the active selection
    pub fn set_active(&mut self, id: &str) {
        self.active_index = self.index_of(id);
    }

    pub fn clear_active(&mut self) {
        self.active_index = None;
    }

    pub fn active(&self) -> Option<&DeviceDescriptor> {
        self.active_index.and_then(|i| self.devices.get(i))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active().map(|d| d.id.as_str())
    }

    /// The device auto-selection would pick: the first headset-classified
    /// device, else the platform default, else the first known device
    pub fn preferred(&self) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.is_headset)
            .or_else(|| self.devices.iter().find(|d| d.is_default))
            .or_else(|| self.devices.first())
    }

    /// Rotates to the next device in order. Returns None when fewer than
    /// two devices are known; cycling a single device is a no-op.
    pub fn cycle_next(&mut self) -> Option<&DeviceDescriptor> {
        if self.devices.len() < 2 {
            return None;
        }
        let next = match self.active_index {
            Some(i) => (i + 1) % self.devices.len(),
            None => 0,
        };
        self.active_index = Some(next);
        self.devices.get(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: &str, label: &str, is_default: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            label: label.to_string(),
            is_default,
            is_headset: is_headset_label(label),
        }
    }

    #[test]
    fn test_classification() {
        assert!(is_headset_label("Bluetooth Headset Mic"));
        assert!(is_headset_label("Sony WH-1000XM4 Headphones"));
        assert!(is_headset_label("AirPods Pro"));
        assert!(is_headset_label("USB Earbuds"));
        assert!(!is_headset_label("Built-in Microphone"));
        assert!(!is_headset_label("MacBook Pro Microphone"));
    }

    #[test]
    fn test_preferred_picks_headset_over_default() {
        let mut registry = DeviceRegistry::new();
        registry.refresh(vec![
            desc("input:built-in", "Built-in Microphone", true),
            desc("input:bt", "Bluetooth Headset Mic", false),
        ]);

        let preferred = registry.preferred().unwrap();
        assert_eq!(preferred.id, "input:bt");
        assert!(preferred.is_headset);
    }

    #[test]
    fn test_preferred_falls_back_to_default() {
        let mut registry = DeviceRegistry::new();
        registry.refresh(vec![
            desc("input:a", "Desk Mic", false),
            desc("input:b", "Built-in Microphone", true),
        ]);
        assert_eq!(registry.preferred().unwrap().id, "input:b");
    }

    #[test]
    fn test_cycle_requires_two_devices() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.cycle_next().is_none());

        registry.refresh(vec![desc("input:a", "Mic", true)]);
        assert!(registry.cycle_next().is_none());
    }

    #[test]
    fn test_cycle_rotates_in_order() {
        let mut registry = DeviceRegistry::new();
        registry.refresh(vec![
            desc("input:a", "Mic A", true),
            desc("input:b", "Mic B", false),
        ]);
        registry.set_active("input:a");

        assert_eq!(registry.cycle_next().unwrap().id, "input:b");
        assert_eq!(registry.cycle_next().unwrap().id, "input:a");
    }

    #[test]
    fn test_refresh_keeps_active_when_present() {
        let mut registry = DeviceRegistry::new();
        registry.refresh(vec![
            desc("input:a", "Mic A", true),
            desc("input:b", "Mic B", false),
        ]);
        registry.set_active("input:b");

        registry.refresh(vec![
            desc("input:b", "Mic B", false),
            desc("input:c", "Mic C", false),
        ]);
        assert_eq!(registry.active_id(), Some("input:b"));
    }

    #[test]
    fn test_refresh_drops_vanished_active() {
        let mut registry = DeviceRegistry::new();
        registry.refresh(vec![desc("input:a", "Mic A", true)]);
        registry.set_active("input:a");

        registry.refresh(vec![desc("input:b", "Mic B", true)]);
        assert!(registry.active().is_none());
    }
}
