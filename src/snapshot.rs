//! Live projection of a device's property values.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::schema::{PropertyDescriptor, Schema};
use crate::status::Status;
use crate::value::PropertyValue;

/// A property's last known value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: PropertyValue,
    /// When the value was last read from or written to the device
    pub updated_at: DateTime<Utc>,
}

/// Current value of every property plus the last operation's status.
///
/// Only the mapping engine mutates a snapshot; callers receive clones or
/// watch for new versions.
#[derive(Debug, Clone)]
pub struct Snapshot {
    schema: Arc<Schema>,
    entries: Vec<Option<Entry>>,
    status: Status,
    version: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Empty snapshot with a good status.
    pub fn new(schema: Arc<Schema>) -> Self {
        let entries = vec![None; schema.len()];
        Self {
            schema,
            entries,
            status: Status::ok(),
            version: 0,
            updated_at: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Value of a property, `None` if unknown or never read.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entry(name).map(|e| &e.value)
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.schema
            .position(name)
            .and_then(|i| self.entries.get(i))
            .and_then(Option::as_ref)
    }

    /// Status of the last operation that reached the device.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Incremented on every commit that stores values; 0 until the first.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Whether any property holds a value.
    pub fn is_populated(&self) -> bool {
        self.entries.iter().any(Option::is_some)
    }

    /// Every property in schema order with its value, if any.
    pub fn iter(&self) -> impl Iterator<Item = (&PropertyDescriptor, Option<&PropertyValue>)> + '_ {
        self.schema
            .properties()
            .iter()
            .zip(&self.entries)
            .map(|(desc, entry)| (desc, entry.as_ref().map(|e| &e.value)))
    }

    pub(crate) fn value_at(&self, position: usize) -> Option<&PropertyValue> {
        self.entries
            .get(position)
            .and_then(Option::as_ref)
            .map(|e| &e.value)
    }

    /// Store values by schema position and replace the status.
    ///
    /// Returns whether any value was stored.
    pub(crate) fn apply(&mut self, updates: Vec<(usize, PropertyValue)>, status: Status) -> bool {
        self.status = status;
        if updates.is_empty() {
            return false;
        }

        let now = Utc::now();
        for (position, value) in updates {
            if let Some(slot) = self.entries.get_mut(position) {
                *slot = Some(Entry {
                    value,
                    updated_at: now,
                });
            }
        }
        self.version += 1;
        self.updated_at = Some(now);
        true
    }
}
