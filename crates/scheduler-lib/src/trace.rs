//! Typed access to task trace records
//!
//! A trace record is the sparse set of resource fields reported for one
//! finished task instance. Only a fixed set of fields is known, and every
//! field belongs to exactly one value category. Reads go through typed
//! accessors that reject unknown fields, wrong categories and unset fields.

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Value category of a trace field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCategory {
    String,
    /// Milliseconds
    Time,
    Integer,
    Percentage,
    /// Bytes
    Memory,
}

impl fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldCategory::String => "string",
            FieldCategory::Time => "time",
            FieldCategory::Integer => "integer",
            FieldCategory::Percentage => "percentage",
            FieldCategory::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Field names read by the labelling engine
pub mod fields {
    pub const CPU_PERCENT: &str = "%cpu";
    pub const MEM_PERCENT: &str = "%mem";
    pub const RSS: &str = "rss";
    pub const VMEM: &str = "vmem";
    pub const RCHAR: &str = "rchar";
    pub const WCHAR: &str = "wchar";
    pub const READ_BYTES: &str = "read_bytes";
    pub const WRITE_BYTES: &str = "write_bytes";
    pub const REALTIME: &str = "realtime";
    pub const SYSCR: &str = "syscr";
    pub const SYSCW: &str = "syscw";
    pub const VOL_CTXT: &str = "vol_ctxt";
    pub const INV_CTXT: &str = "inv_ctxt";
}

const KNOWN_FIELDS: &[(&str, FieldCategory)] = &[
    ("name", FieldCategory::String),
    ("status", FieldCategory::String),
    ("hash", FieldCategory::String),
    ("native_id", FieldCategory::String),
    ("process", FieldCategory::String),
    ("submit", FieldCategory::Time),
    ("start", FieldCategory::Time),
    ("complete", FieldCategory::Time),
    ("duration", FieldCategory::Time),
    (fields::REALTIME, FieldCategory::Time),
    ("exit", FieldCategory::Integer),
    (fields::SYSCR, FieldCategory::Integer),
    (fields::SYSCW, FieldCategory::Integer),
    (fields::VOL_CTXT, FieldCategory::Integer),
    (fields::INV_CTXT, FieldCategory::Integer),
    (fields::CPU_PERCENT, FieldCategory::Percentage),
    (fields::MEM_PERCENT, FieldCategory::Percentage),
    (fields::RSS, FieldCategory::Memory),
    (fields::VMEM, FieldCategory::Memory),
    ("peak_rss", FieldCategory::Memory),
    ("peak_vmem", FieldCategory::Memory),
    (fields::RCHAR, FieldCategory::Memory),
    (fields::WCHAR, FieldCategory::Memory),
    (fields::READ_BYTES, FieldCategory::Memory),
    (fields::WRITE_BYTES, FieldCategory::Memory),
];

/// Look up the declared category of a field
pub fn category_of(field: &str) -> Option<FieldCategory> {
    KNOWN_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, category)| *category)
}

/// A single typed trace value
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValue {
    String(String),
    Time(u64),
    Integer(i64),
    Percentage(f64),
    Memory(u64),
}

impl TraceValue {
    pub fn category(&self) -> FieldCategory {
        match self {
            TraceValue::String(_) => FieldCategory::String,
            TraceValue::Time(_) => FieldCategory::Time,
            TraceValue::Integer(_) => FieldCategory::Integer,
            TraceValue::Percentage(_) => FieldCategory::Percentage,
            TraceValue::Memory(_) => FieldCategory::Memory,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            TraceValue::String(s) => Value::from(s.clone()),
            TraceValue::Time(v) | TraceValue::Memory(v) => Value::from(*v),
            TraceValue::Integer(v) => Value::from(*v),
            TraceValue::Percentage(v) => Value::from(*v),
        }
    }

    fn from_json(field: &str, category: FieldCategory, value: &Value) -> Result<Self, TraceError> {
        let invalid = |reason: &str| TraceError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        match category {
            FieldCategory::String => value
                .as_str()
                .map(|s| TraceValue::String(s.to_string()))
                .ok_or_else(|| invalid("expected a string")),
            FieldCategory::Time => non_negative(value)
                .map(TraceValue::Time)
                .ok_or_else(|| invalid("expected a non-negative duration in milliseconds")),
            FieldCategory::Integer => value
                .as_i64()
                .map(TraceValue::Integer)
                .ok_or_else(|| invalid("expected an integer")),
            FieldCategory::Percentage => value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(TraceValue::Percentage)
                .ok_or_else(|| invalid("expected a finite number")),
            FieldCategory::Memory => non_negative(value)
                .map(TraceValue::Memory)
                .ok_or_else(|| invalid("expected a non-negative byte count")),
        }
    }
}

fn non_negative(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
    })
}

/// Sparse, category-checked map of trace fields for one task instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct TraceRecord {
    values: BTreeMap<String, TraceValue>,
}

impl TraceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, rejecting unknown fields and values of the wrong category
    pub fn set(&mut self, field: &str, value: TraceValue) -> Result<(), TraceError> {
        let declared =
            category_of(field).ok_or_else(|| TraceError::UnknownField(field.to_string()))?;
        if declared != value.category() {
            return Err(TraceError::WrongCategory {
                field: field.to_string(),
                actual: declared,
                requested: value.category(),
            });
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    /// Builder-style variant of [`TraceRecord::set`]
    pub fn with(mut self, field: &str, value: TraceValue) -> Result<Self, TraceError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn fetch(&self, field: &str, requested: FieldCategory) -> Result<&TraceValue, TraceError> {
        let declared =
            category_of(field).ok_or_else(|| TraceError::UnknownField(field.to_string()))?;
        if declared != requested {
            return Err(TraceError::WrongCategory {
                field: field.to_string(),
                actual: declared,
                requested,
            });
        }
        self.values
            .get(field)
            .ok_or_else(|| TraceError::Undefined(field.to_string()))
    }

    pub fn get_string(&self, field: &str) -> Result<&str, TraceError> {
        match self.fetch(field, FieldCategory::String)? {
            TraceValue::String(s) => Ok(s),
            other => Err(self.mismatch(field, other)),
        }
    }

    /// Milliseconds
    pub fn get_time(&self, field: &str) -> Result<u64, TraceError> {
        match self.fetch(field, FieldCategory::Time)? {
            TraceValue::Time(v) => Ok(*v),
            other => Err(self.mismatch(field, other)),
        }
    }

    pub fn get_integer(&self, field: &str) -> Result<i64, TraceError> {
        match self.fetch(field, FieldCategory::Integer)? {
            TraceValue::Integer(v) => Ok(*v),
            other => Err(self.mismatch(field, other)),
        }
    }

    pub fn get_percentage(&self, field: &str) -> Result<f64, TraceError> {
        match self.fetch(field, FieldCategory::Percentage)? {
            TraceValue::Percentage(v) => Ok(*v),
            other => Err(self.mismatch(field, other)),
        }
    }

    /// Bytes
    pub fn get_memory(&self, field: &str) -> Result<u64, TraceError> {
        match self.fetch(field, FieldCategory::Memory)? {
            TraceValue::Memory(v) => Ok(*v),
            other => Err(self.mismatch(field, other)),
        }
    }

    // Unreachable while `set` keeps stored values in their declared category.
    fn mismatch(&self, field: &str, stored: &TraceValue) -> TraceError {
        TraceError::InvalidValue {
            field: field.to_string(),
            reason: format!("stored value has category {}", stored.category()),
        }
    }
}

impl TryFrom<Map<String, Value>> for TraceRecord {
    type Error = TraceError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut record = TraceRecord::new();
        for (field, value) in map {
            let category =
                category_of(&field).ok_or_else(|| TraceError::UnknownField(field.clone()))?;
            if value.is_null() {
                continue;
            }
            let value = TraceValue::from_json(&field, category, &value)?;
            record.values.insert(field, value);
        }
        Ok(record)
    }
}

impl From<TraceRecord> for Map<String, Value> {
    fn from(record: TraceRecord) -> Self {
        record
            .values
            .iter()
            .map(|(field, value)| (field.clone(), value.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> TraceRecord {
        TraceRecord::new()
            .with(fields::CPU_PERCENT, TraceValue::Percentage(180.5))
            .unwrap()
            .with(fields::RSS, TraceValue::Memory(1_048_576))
            .unwrap()
            .with(fields::REALTIME, TraceValue::Time(12_000))
            .unwrap()
            .with("name", TraceValue::String("align (1)".to_string()))
            .unwrap()
    }

    #[test]
    fn test_typed_accessors() {
        let record = sample_record();
        assert_eq!(record.get_percentage(fields::CPU_PERCENT).unwrap(), 180.5);
        assert_eq!(record.get_memory(fields::RSS).unwrap(), 1_048_576);
        assert_eq!(record.get_time(fields::REALTIME).unwrap(), 12_000);
        assert_eq!(record.get_string("name").unwrap(), "align (1)");
    }

    #[test]
    fn test_undefined_field_is_error() {
        let record = sample_record();
        assert_eq!(
            record.get_memory(fields::READ_BYTES),
            Err(TraceError::Undefined(fields::READ_BYTES.to_string()))
        );
    }

    #[test]
    fn test_wrong_category_is_error() {
        let record = sample_record();
        let err = record.get_time(fields::RSS).unwrap_err();
        assert!(matches!(
            err,
            TraceError::WrongCategory {
                actual: FieldCategory::Memory,
                requested: FieldCategory::Time,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut record = TraceRecord::new();
        assert!(matches!(
            record.set("gpu_util", TraceValue::Percentage(1.0)),
            Err(TraceError::UnknownField(_))
        ));
        assert!(matches!(
            record.get_integer("gpu_util"),
            Err(TraceError::UnknownField(_))
        ));
    }

    #[test]
    fn test_set_with_wrong_category_rejected() {
        let mut record = TraceRecord::new();
        let result = record.set(fields::RCHAR, TraceValue::Integer(5));
        assert!(result.is_err());
        assert!(record.is_empty());
    }

    #[test]
    fn test_from_json_object() {
        let record: TraceRecord = serde_json::from_value(json!({
            "%cpu": 95.2,
            "rss": 2048,
            "rchar": 4096.0,
            "realtime": 1500,
            "syscr": 12,
            "status": "COMPLETED",
            "vmem": null
        }))
        .unwrap();

        assert_eq!(record.len(), 6);
        assert_eq!(record.get_memory(fields::RCHAR).unwrap(), 4096);
        assert_eq!(record.get_integer(fields::SYSCR).unwrap(), 12);
        assert!(!record.contains(fields::VMEM));
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        let negative: Result<TraceRecord, _> = serde_json::from_value(json!({ "rss": -1 }));
        assert!(negative.is_err());

        let unknown: Result<TraceRecord, _> = serde_json::from_value(json!({ "cpu": 1 }));
        assert!(unknown.is_err());

        let text_for_number: Result<TraceRecord, _> =
            serde_json::from_value(json!({ "%cpu": "high" }));
        assert!(text_for_number.is_err());
    }

    #[test]
    fn test_serializes_back_to_json() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["%cpu"], json!(180.5));
        assert_eq!(value["rss"], json!(1_048_576));
        assert_eq!(value["name"], json!("align (1)"));
    }
}
