//! Property keys
//!
//! A property is identified by the device that owns it, the host serving that
//! device, and the property name. The string form is `<device>@<host>.<name>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identifier of one remote property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey {
    device: String,
    host: String,
    property: String,
}

impl PropertyKey {
    /// Build the key for `property` of `device` served by `host`
    pub fn new(device: &str, host: &str, property: &str) -> Self {
        Self {
            device: device.to_string(),
            host: host.to_string(),
            property: property.to_string(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// `<device>@<host>`
    pub fn full_device_name(&self) -> String {
        format!("{}@{}", self.device, self.host)
    }

    /// True if this key names a property of `device` on `host`
    pub fn belongs_to(&self, device: &str, host: &str) -> bool {
        self.device == device && self.host == host
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.device, self.host, self.property)
    }
}
