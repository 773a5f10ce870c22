//! The record model: the unit of information flowing through the pipeline.
//!
//! A [`Record`] pairs a measurement name with ordered field and tag maps and
//! a capture timestamp. Records are mutable while they travel through a
//! single link; fan-out to multiple consumers always deep-copies so no two
//! links alias the same maps.
//!
//! # The suppression sentinel
//!
//! A record with an empty `measurement` *and* empty `fields` is the
//! suppression sentinel: the universal "nothing to emit" signal. Workers
//! never forward a sentinel past the module that produced it.
//!
//! # Examples
//!
//! ```rust
//! use metricloom::record::Record;
//! use serde_json::json;
//!
//! let record = Record::new("cpu")
//!     .with_field("usage", json!(0.93))
//!     .with_tag("host", json!("db-1"));
//!
//! assert!(!record.is_sentinel());
//! assert_eq!(record.field("usage"), Some(&json!(0.93)));
//! assert!(Record::sentinel().is_sentinel());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One measurement flowing through the module graph.
///
/// Field values may be scalars or lists; tag values are scalars used as
/// dimensional metadata. Both maps preserve insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Measurement identifier, e.g. `"cpu"` or `"frame_rate"`.
    pub measurement: String,
    /// The metric payload: ordered key -> scalar-or-list values.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Dimensional metadata: ordered key -> scalar values.
    #[serde(default)]
    pub tags: Map<String, Value>,
    /// Capture instant; defaults to the creation instant.
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl Record {
    /// Create an empty record for the given measurement, timestamped now.
    #[must_use]
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Map::new(),
            tags: Map::new(),
            time: Utc::now(),
        }
    }

    /// The suppression sentinel: empty measurement, empty fields.
    ///
    /// Returned by modules that have nothing to emit on this invocation.
    #[must_use]
    pub fn sentinel() -> Self {
        Self::new("")
    }

    /// Whether this record is the suppression sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.measurement.is_empty() && self.fields.is_empty()
    }

    /// Add a field, builder-style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Add a tag, builder-style.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tags.insert(key.into(), value);
        self
    }

    /// Override the capture instant, builder-style.
    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Look up a field value by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a tag value by key.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }

    /// Merge computed key -> value pairs into `fields`.
    ///
    /// With `replace_existing`, the current field map is cleared first.
    /// Used by tag/variable decoration on a parent input's in-flight record.
    pub fn merge_fields(&mut self, pairs: &Map<String, Value>, replace_existing: bool) {
        if replace_existing {
            self.fields.clear();
        }
        for (key, value) in pairs {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Merge computed key -> value pairs into `tags`.
    ///
    /// With `replace_existing`, the current tag map is cleared first.
    pub fn merge_tags(&mut self, pairs: &Map<String, Value>, replace_existing: bool) {
        if replace_existing {
            self.tags.clear();
        }
        for (key, value) in pairs {
            self.tags.insert(key.clone(), value.clone());
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::sentinel()
    }
}
