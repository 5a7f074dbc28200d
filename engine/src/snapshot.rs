//! Snapshot types for persisting and restoring a database.
//!
//! A durable environment writes one snapshot file per database. Snapshots
//! are designed for deterministic serialization: stores are kept in a
//! `BTreeMap` and records are written in primary-key order.

use crate::{DatabaseName, IndexDef, Key, KeyPath, Record, SchemaVersion, StoreName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Database name
    pub name: DatabaseName,
    /// Schema version the database was opened at
    pub version: SchemaVersion,
    /// Stores by name
    pub stores: BTreeMap<StoreName, StoreSnapshot>,
}

/// A point-in-time snapshot of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// How primary keys are derived
    pub key_path: KeyPath,
    /// Indexes in declaration order
    pub indexes: Vec<IndexDef>,
    /// Last generated surrogate key (auto-increment stores)
    #[serde(default)]
    pub next_key: u64,
    /// Records in primary-key order
    pub records: Vec<StoredRecord>,
}

/// A record together with its primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: Key,
    pub value: Record,
}

impl DatabaseSnapshot {
    /// Create a new empty snapshot.
    pub fn new(name: impl Into<DatabaseName>, version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            name: name.into(),
            version,
            stores: BTreeMap::new(),
        }
    }

    /// Count records across all stores.
    pub fn record_count(&self) -> usize {
        self.stores.values().map(|s| s.records.len()).sum()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| e.to_string())
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let snapshot: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            ));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer_snapshot(records: Vec<(i64, &str)>) -> StoreSnapshot {
        StoreSnapshot {
            key_path: KeyPath::Field("CustomerID".into()),
            indexes: vec![IndexDef {
                name: "CustomerID".into(),
                key_path: "CustomerID".into(),
                unique: true,
            }],
            next_key: 0,
            records: records
                .into_iter()
                .map(|(id, name)| StoredRecord {
                    key: Key::from(id),
                    value: json!({"CustomerID": id, "CustomerName": name}),
                })
                .collect(),
        }
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = DatabaseSnapshot::new("demo", 1);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = DatabaseSnapshot::new("demo", 2);
        snapshot.stores.insert(
            "Customer".into(),
            customer_snapshot(vec![(1, "A"), (2, "B")]),
        );

        let json = snapshot.to_json().unwrap();
        let restored = DatabaseSnapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
        assert_eq!(restored.record_count(), 2);
    }

    #[test]
    fn deterministic_serialization() {
        let mut first = DatabaseSnapshot::new("demo", 1);
        let mut second = DatabaseSnapshot::new("demo", 1);

        first.stores.insert("A".into(), customer_snapshot(vec![]));
        first.stores.insert("B".into(), customer_snapshot(vec![(1, "x")]));

        second.stores.insert("B".into(), customer_snapshot(vec![(1, "x")]));
        second.stores.insert("A".into(), customer_snapshot(vec![]));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "name": "demo",
            "version": 1,
            "stores": {}
        }"#;

        let result = DatabaseSnapshot::from_json(json);
        assert!(result.unwrap_err().contains("unsupported snapshot format"));
    }
}
