//! Property mirror
//!
//! Last-known value and metadata for every property the server has announced.
//! Written from the transport's notification path, read from the command path.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::codec::PropertyRecord;
use crate::key::PropertyKey;
use crate::PropertyType;

/// Mapping of property key to its most recent record
#[derive(Debug, Default)]
pub struct PropertyMirror {
    entries: RwLock<HashMap<PropertyKey, PropertyRecord>>,
}

impl PropertyMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PropertyKey, PropertyRecord>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PropertyKey, PropertyRecord>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a property. Redefinition is not an error.
    pub fn define(&self, key: PropertyKey, record: PropertyRecord) {
        self.write().insert(key, record);
    }

    /// Replace the record of a known property.
    ///
    /// Returns false and leaves the mirror unchanged if `key` was never defined.
    pub fn update(&self, key: &PropertyKey, record: PropertyRecord) -> bool {
        match self.write().get_mut(key) {
            Some(entry) => {
                *entry = record;
                true
            }
            None => {
                tracing::warn!("update_property: {} not in known properties for update", key);
                false
            }
        }
    }

    /// Remove a known property. Returns false if `key` was never defined.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        if self.write().remove(key).is_some() {
            true
        } else {
            tracing::warn!("delete_property: {} not in known properties for delete", key);
            false
        }
    }

    /// Remove every property of `device` on `host`, returning the removed keys
    pub fn delete_device(&self, device: &str, host: &str) -> Vec<PropertyKey> {
        let mut entries = self.write();
        let keys: Vec<PropertyKey> = entries
            .keys()
            .filter(|k| k.belongs_to(device, host))
            .cloned()
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        if keys.is_empty() {
            tracing::warn!("delete_property: no known properties for device {}@{}", device, host);
        }
        keys
    }

    /// Wire type of a property, if it is known
    pub fn lookup_type(&self, key: &PropertyKey) -> Option<PropertyType> {
        self.read().get(key).map(|r| r.property_type)
    }

    /// Current record of a property
    pub fn get(&self, key: &PropertyKey) -> Option<PropertyRecord> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every entry, ordered by key
    pub fn snapshot(&self) -> Vec<(PropertyKey, PropertyRecord)> {
        let mut entries: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}
