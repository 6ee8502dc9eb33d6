//! Telemetry field table
//!
//! Collects the structured payloads scripts publish on the `user-data`
//! topic into named fields with running statistics. Rendering and
//! persistence belong to the embedding application; the store only
//! exports and imports JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_bus::{BusEvent, EventBus, Subscription, Topic};
use crate::types::ThreadSafe;

/// Storage key for the exported field table
pub const FIELDS_STORAGE_KEY: &str = "config.fields";

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Numeric value, statistics are tracked
    Number,
    /// Text value
    String,
    /// Boolean value
    Boolean,
    /// Anything else
    Object,
}

impl FieldType {
    /// Classify a JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Number(_) => FieldType::Number,
            Value::String(_) => FieldType::String,
            Value::Bool(_) => FieldType::Boolean,
            _ => FieldType::Object,
        }
    }
}

/// One named telemetry value with statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryField {
    /// Store-assigned id
    pub id: u64,
    /// Key as published by the script
    pub key: String,
    /// Display name, defaults to the key
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Latest value
    pub value: Value,
    /// Declared type
    pub data_type: FieldType,
    /// Average of numeric updates, floored to three decimals
    pub avg: Option<f64>,
    /// Running sum of numeric updates
    pub avg_sum: Option<f64>,
    /// Smallest numeric value seen
    pub min: Option<f64>,
    /// Largest numeric value seen
    pub max: Option<f64>,
    /// Time of the latest update
    pub last_update: DateTime<Utc>,
    /// Number of values recorded, including the initial one
    pub update_count: u64,
}

impl TelemetryField {
    fn new(id: u64, key: &str, value: Value, data_type: FieldType) -> Self {
        let number = value.as_f64();
        Self {
            id,
            key: key.to_string(),
            name: key.to_string(),
            description: String::new(),
            value,
            data_type,
            avg: number,
            avg_sum: number,
            min: number,
            max: number,
            last_update: Utc::now(),
            update_count: 1,
        }
    }

    fn record(&mut self, value: Value) {
        self.last_update = Utc::now();
        self.update_count += 1;

        if let Some(number) = value.as_f64() {
            let sum = self.avg_sum.unwrap_or(0.0) + number;
            self.avg_sum = Some(sum);
            self.avg = Some((sum / self.update_count as f64 * 1000.0).floor() / 1000.0);
            self.min = Some(self.min.map_or(number, |min| min.min(number)));
            self.max = Some(self.max.map_or(number, |max| max.max(number)));
        }
        self.value = value;
    }
}

/// Table of telemetry fields keyed by name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldStore {
    fields: Vec<TelemetryField>,
    next_id: u64,
}

impl Default for FieldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            next_id: 1,
        }
    }

    /// Create a store seeded with `pitch`, `roll` and `yaw`
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.init_default_fields();
        store
    }

    /// Seed the IMU fields if the store is empty
    pub fn init_default_fields(&mut self) {
        if self.fields.is_empty() {
            for key in ["pitch", "roll", "yaw"] {
                self.create_field(key, Value::from(0), FieldType::Number);
            }
        }
    }

    /// Add a field
    pub fn create_field(
        &mut self,
        key: &str,
        value: Value,
        data_type: FieldType,
    ) -> &TelemetryField {
        let id = self.next_id;
        self.next_id += 1;
        self.fields.push(TelemetryField::new(id, key, value, data_type));
        &self.fields[self.fields.len() - 1]
    }

    /// Record a value, creating the field on first sight
    pub fn update(&mut self, key: &str, value: Value) {
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => field.record(value),
            None => {
                let data_type = FieldType::of(&value);
                self.create_field(key, value, data_type);
            }
        }
    }

    /// Record every entry of an object payload. Returns the number of
    /// entries applied; non-object payloads are ignored.
    pub fn apply(&mut self, payload: &Value) -> usize {
        let Some(map) = payload.as_object() else {
            tracing::debug!("Ignoring non-object user data payload");
            return 0;
        };
        for (key, value) in map {
            self.update(key, value.clone());
        }
        map.len()
    }

    /// Look up a field by key
    pub fn get(&self, key: &str) -> Option<&TelemetryField> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// All fields in creation order
    pub fn fields(&self) -> &[TelemetryField] {
        &self.fields
    }

    /// Remove a field by id. Returns true if it existed.
    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.id != id);
        self.fields.len() != before
    }

    /// Export the table as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Import a table exported with [`FieldStore::to_json`]
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut store: FieldStore = serde_json::from_str(json)?;
        let max_id = store.fields.iter().map(|f| f.id).max().unwrap_or(0);
        store.next_id = store.next_id.max(max_id + 1);
        Ok(store)
    }

    /// Feed `user-data` events from `bus` into `store`
    pub fn attach(store: ThreadSafe<FieldStore>, bus: &EventBus) -> Subscription {
        bus.subscribe(Topic::UserData, move |event| {
            if let BusEvent::UserData(payload) = event {
                store.lock().apply(payload);
            }
        })
    }
}
