// File: ./src/model/record.rs
// Wire shapes exchanged with the backend and the persisted cache file.
//
// ⚠️ FORMAT COMPATIBILITY:
// The persisted file is read back by older device firmware. Key names
// ("lastUpdateTime", "items", "Start", "End", "Duration") must not change.
use crate::error::CacheResult;
use crate::timezone::parse_backend_time;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event as reported by a backend connector.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRecord {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attributes: Map<String, Value>,
}

impl RawEventRecord {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            start,
            end,
            attributes,
        }
    }

    /// Build a record from backend UTC time strings ("2024-03-04T15:30:00Z").
    pub fn from_backend_times(
        start: &str,
        end: &str,
        attributes: Map<String, Value>,
        offset: &FixedOffset,
    ) -> CacheResult<Self> {
        Ok(Self {
            start: parse_backend_time(start, offset)?,
            end: parse_backend_time(end, offset)?,
            attributes,
        })
    }
}

/// Flat, JSON-safe form of a single item inside the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Epoch seconds.
    #[serde(rename = "Start")]
    pub start: f64,
    /// Epoch seconds.
    #[serde(rename = "End")]
    pub end: f64,
    /// Seconds. Informational only, recomputed from Start/End on load.
    #[serde(rename = "Duration", default)]
    pub duration: f64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Whole cache file.
///
/// Items are kept as raw JSON values so that one malformed record does not
/// prevent the rest of the file from loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageBlob {
    #[serde(rename = "lastUpdateTime", default)]
    pub last_update_time: f64,
    #[serde(
        rename = "lastUpdateTime_ISO",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update_time_iso: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_storage_record_flattens_attributes() {
        let value = json!({
            "ItemId": "abc",
            "Subject": "Standup",
            "Start": 1_700_000_000.0,
            "End": 1_700_001_800.0,
            "Duration": 1800.0
        });
        let record: StorageRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.start, 1_700_000_000.0);
        assert_eq!(record.attributes.len(), 2);
        assert!(!record.attributes.contains_key("Start"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["Subject"], "Standup");
        assert_eq!(back["End"], 1_700_001_800.0);
    }

    #[test]
    fn test_blob_tolerates_missing_fields() {
        let blob: StorageBlob = serde_json::from_str("{}").unwrap();
        assert_eq!(blob.last_update_time, 0.0);
        assert!(blob.items.is_empty());

        // Integer timestamps written by other tools are accepted too.
        let blob: StorageBlob =
            serde_json::from_str(r#"{"lastUpdateTime": 1700000000, "items": []}"#).unwrap();
        assert_eq!(blob.last_update_time, 1_700_000_000.0);
    }
}
