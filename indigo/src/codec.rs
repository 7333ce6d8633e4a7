//! Property record decoding
//!
//! Turns a property notification as delivered by the transport into the
//! `(key, record)` pair stored in the mirror.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{IndigoError, IndigoResult};
use crate::key::PropertyKey;
use crate::{Permission, PropertyState, PropertyType};

/// A property vector as it arrived from the server
#[derive(Debug, Clone, PartialEq)]
pub struct RawProperty {
    pub device: String,
    pub name: String,
    pub property_type: PropertyType,
    pub state: PropertyState,
    pub perm: Permission,
    pub label: Option<String>,
    pub group: Option<String>,
    pub message: Option<String>,
    /// Item name and value, in wire order
    pub items: Vec<(String, String)>,
}

impl RawProperty {
    pub fn new(device: &str, name: &str, property_type: PropertyType) -> Self {
        Self {
            device: device.to_string(),
            name: name.to_string(),
            property_type,
            state: PropertyState::Idle,
            perm: Permission::ReadWrite,
            label: None,
            group: None,
            message: None,
            items: Vec::new(),
        }
    }

    /// Append an item; builder style for tests and transports
    pub fn with_item(mut self, name: &str, value: &str) -> Self {
        self.items.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }
}

/// Last-known value and metadata of one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub property_type: PropertyType,
    pub state: PropertyState,
    pub perm: Permission,
    pub label: Option<String>,
    pub group: Option<String>,
    pub items: BTreeMap<String, String>,
}

impl PropertyRecord {
    /// Current value of an item
    pub fn item(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(String::as_str)
    }

    /// Switch item value as a bool
    pub fn switch(&self, name: &str) -> Option<bool> {
        self.item(name).map(|v| v.trim().eq_ignore_ascii_case("on"))
    }

    /// Number item value
    pub fn number(&self, name: &str) -> Option<f64> {
        self.item(name).and_then(|v| v.trim().parse().ok())
    }

    /// Decode inline base64 content of a BLOB item
    pub fn blob_bytes(&self, name: &str) -> IndigoResult<Vec<u8>> {
        if self.property_type != PropertyType::Blob {
            return Err(IndigoError::Parse(format!(
                "item '{}' is not a BLOB item ({:?} property)",
                name, self.property_type
            )));
        }
        let text = self
            .item(name)
            .ok_or_else(|| IndigoError::Parse(format!("BLOB item '{}' not present", name)))?;
        BASE64
            .decode(text.trim())
            .map_err(|e| IndigoError::Parse(format!("BLOB item '{}': {}", name, e)))
    }
}

/// Converts a raw property into its mirror key and record
pub trait PropertyDecoder: Send + Sync {
    /// Key for `property` of `device` on the decoder's host
    fn key(&self, device: &str, property: &str) -> PropertyKey;

    /// Decode a notification. Must be pure.
    fn decode(&self, raw: &RawProperty) -> (PropertyKey, PropertyRecord);
}

/// Default decoder bound to one server host
#[derive(Debug, Clone)]
pub struct RecordCodec {
    host: String,
}

impl RecordCodec {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
        }
    }
}

impl PropertyDecoder for RecordCodec {
    fn key(&self, device: &str, property: &str) -> PropertyKey {
        PropertyKey::new(device, &self.host, property)
    }

    fn decode(&self, raw: &RawProperty) -> (PropertyKey, PropertyRecord) {
        let record = PropertyRecord {
            property_type: raw.property_type,
            state: raw.state,
            perm: raw.perm,
            label: raw.label.clone(),
            group: raw.group.clone(),
            items: raw.items.iter().cloned().collect(),
        };
        (self.key(&raw.device, &raw.name), record)
    }
}

pub(crate) fn parse_state(s: &str) -> PropertyState {
    match s {
        "Idle" => PropertyState::Idle,
        "Ok" => PropertyState::Ok,
        "Busy" => PropertyState::Busy,
        "Alert" => PropertyState::Alert,
        _ => PropertyState::Idle,
    }
}

pub(crate) fn parse_perm(s: &str) -> Permission {
    match s.to_lowercase().as_str() {
        "ro" => Permission::ReadOnly,
        "wo" => Permission::WriteOnly,
        _ => Permission::ReadWrite,
    }
}

/// Detect the image format of BLOB content from its magic bytes
pub fn detect_blob_format(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"SIMPLE") {
        Some(".fits")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(".png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(".jpeg")
    } else if data.starts_with(&[0x1F, 0x8B]) {
        Some(".gz")
    } else {
        None
    }
}
