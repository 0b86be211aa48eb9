//! Device registry.
//!
//! The engine never owns device metadata. It consults a [`DeviceRegistry`]
//! to resolve names, find responders for group broadcasts and keep the
//! last-known level of each device (the state mirror).
//!
//! [`MemoryRegistry`] is a small in-memory implementation loaded from JSON:
//!
//! ```json
//! [
//!   { "name": "Kitchen Pots", "short_name": "pots", "address": "42.22.B8",
//!     "type": "dimmer", "level": 0, "responds_to": ["12.5F.5E:2"] }
//! ]
//! ```

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::address::{Address, DeviceRef};
use crate::error::{InsteonError, Result};

/// Kind of device, as far as the engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Dimmer,
    Switch,
    /// The gateway itself.
    Plm,
    /// Relay-only I/O module. Its state cannot be queried after a broadcast.
    GarageIo,
    Keypad,
    #[serde(other)]
    Other,
}

impl DeviceType {
    /// Whether the device reports a level that is worth refreshing.
    pub fn is_dimmable(self) -> bool {
        matches!(self, DeviceType::Dimmer | DeviceType::Switch)
    }

    /// Whether group broadcasts set the mirror directly instead of querying.
    pub fn is_relay_only(self) -> bool {
        matches!(self, DeviceType::GarageIo)
    }
}

/// Lookup and state-mirror contract the engine consumes.
///
/// Indices are dense, `0..len()`.
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Resolve a device name or short name.
    fn address_for_name(&self, name: &str) -> Option<Address>;

    fn index_for_address(&self, address: Address) -> Option<usize>;

    fn address_for_index(&self, index: usize) -> Option<Address>;

    fn type_for_index(&self, index: usize) -> Option<DeviceType>;

    /// Last-known direct level (0..=255).
    fn level_for_index(&self, index: usize) -> Option<u8>;

    fn set_level_for_index(&self, index: usize, level: u8);

    /// Indices of devices that respond to `button` on `address`.
    ///
    /// A device always responds to its own button 1.
    fn responders_for(&self, address: Address, button: u8) -> Vec<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mirror level by address.
    fn level_for_address(&self, address: Address) -> Option<u8> {
        self.index_for_address(address)
            .and_then(|i| self.level_for_index(i))
    }

    /// Update the mirror by address. Returns false for unknown devices.
    fn set_level_for_address(&self, address: Address, level: u8) -> bool {
        match self.index_for_address(address) {
            Some(index) => {
                self.set_level_for_index(index, level);
                true
            }
            None => false,
        }
    }
}

/// One device entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    pub address: Address,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub level: u8,
    /// `address:button` pairs this device responds to.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "device_refs")]
    pub responds_to: Vec<DeviceRef>,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, address: Address, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            address,
            device_type,
            level: 0,
            responds_to: Vec::new(),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self
                .short_name
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case(name))
                .unwrap_or(false)
    }
}

mod device_refs {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::address::DeviceRef;

    pub fn serialize<S: Serializer>(refs: &[DeviceRef], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(refs.iter().map(|r| r.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<DeviceRef>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// In-memory registry guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<Vec<DeviceRecord>>,
}

impl MemoryRegistry {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Parse a JSON array of device records.
    pub fn from_json(json: &str) -> Result<Self> {
        let devices: Vec<DeviceRecord> = serde_json::from_str(json)?;
        Ok(Self::new(devices))
    }

    /// Load a JSON device file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            InsteonError::Config(format!("Cannot read device file {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Write the current records (levels included) as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// A copy of all records.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.devices.read().map(|d| d.clone()).unwrap_or_default()
    }

    /// Make `responder` respond to `controller:button`.
    pub fn add_responder(&self, responder: Address, controller: Address, button: u8) -> Result<()> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| InsteonError::Config("device registry lock poisoned".into()))?;
        let record = devices
            .iter_mut()
            .find(|d| d.address == responder)
            .ok_or_else(|| InsteonError::InvalidAddress(responder.to_string()))?;
        let link = DeviceRef::new(controller, Some(button));
        if !record.responds_to.contains(&link) {
            record.responds_to.push(link);
        }
        Ok(())
    }

    /// Display name by index.
    pub fn name_for_index(&self, index: usize) -> Option<String> {
        self.read(|d| d.get(index).map(|r| r.name.clone()))
    }

    fn read<R>(&self, f: impl FnOnce(&[DeviceRecord]) -> Option<R>) -> Option<R> {
        self.devices.read().ok().and_then(|d| f(&d))
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn address_for_name(&self, name: &str) -> Option<Address> {
        let name = name.trim();
        self.read(|d| d.iter().find(|r| r.matches_name(name)).map(|r| r.address))
    }

    fn index_for_address(&self, address: Address) -> Option<usize> {
        self.read(|d| d.iter().position(|r| r.address == address))
    }

    fn address_for_index(&self, index: usize) -> Option<Address> {
        self.read(|d| d.get(index).map(|r| r.address))
    }

    fn type_for_index(&self, index: usize) -> Option<DeviceType> {
        self.read(|d| d.get(index).map(|r| r.device_type))
    }

    fn level_for_index(&self, index: usize) -> Option<u8> {
        self.read(|d| d.get(index).map(|r| r.level))
    }

    fn set_level_for_index(&self, index: usize, level: u8) {
        if let Ok(mut devices) = self.devices.write() {
            if let Some(record) = devices.get_mut(index) {
                record.level = level;
            }
        }
    }

    fn responders_for(&self, address: Address, button: u8) -> Vec<usize> {
        let devices = match self.devices.read() {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };
        let mut out: Vec<usize> = devices
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.responds_to
                    .iter()
                    .any(|link| link.address == address && link.button == Some(button))
            })
            .map(|(i, _)| i)
            .collect();
        if button == 1 {
            if let Some(own) = devices.iter().position(|r| r.address == address) {
                if !out.contains(&own) {
                    out.push(own);
                }
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }
}
