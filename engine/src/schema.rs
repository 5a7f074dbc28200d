//! Schema description for stores and their indexes.
//!
//! Callers describe each store with a [`StoreSpec`]. At creation time the
//! spec is turned into a key path and a list of index definitions; the
//! fields flagged unique form the store's primary key.

use crate::{
    error::Result, field_value, Error, IndexName, Key, StoreName, MODIFIED_DATA_FIELD,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Declaration of one index in a store spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Index name; also the field (or dotted path) it projects
    pub name: IndexName,
    /// Whether index values must be unique across the store
    #[serde(default)]
    pub is_unique: bool,
}

impl IndexSpec {
    /// A unique index over `name`.
    pub fn unique(name: impl Into<IndexName>) -> Self {
        Self {
            name: name.into(),
            is_unique: true,
        }
    }

    /// A non-unique index over `name`.
    pub fn non_unique(name: impl Into<IndexName>) -> Self {
        Self {
            name: name.into(),
            is_unique: false,
        }
    }
}

/// Declaration of a store to create during a schema upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// Store name
    pub store_name: StoreName,
    /// Indexes in declaration order
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Also create a non-unique `ModifiedData` index
    #[serde(default)]
    pub add_modified_data_col: bool,
}

impl StoreSpec {
    /// Create a new store spec.
    pub fn new(store_name: impl Into<StoreName>, indexes: Vec<IndexSpec>) -> Self {
        Self {
            store_name: store_name.into(),
            indexes,
            add_modified_data_col: false,
        }
    }

    /// Builder-style method to request the `ModifiedData` index.
    pub fn with_modified_data(mut self) -> Self {
        self.add_modified_data_col = true;
        self
    }

    /// Key path derived from the fields flagged unique.
    pub fn key_path(&self) -> KeyPath {
        let unique: Vec<String> = self
            .indexes
            .iter()
            .filter(|i| i.is_unique)
            .map(|i| i.name.clone())
            .collect();

        match unique.as_slice() {
            [] => KeyPath::AutoIncrement,
            [field] => KeyPath::Field(field.clone()),
            _ => KeyPath::Composite(unique),
        }
    }

    /// Index definitions to create, including `ModifiedData` if requested.
    pub fn index_defs(&self) -> Vec<IndexDef> {
        let mut defs: Vec<IndexDef> = self
            .indexes
            .iter()
            .map(|i| IndexDef {
                name: i.name.clone(),
                key_path: i.name.clone(),
                unique: i.is_unique,
            })
            .collect();

        if self.add_modified_data_col {
            defs.push(IndexDef {
                name: MODIFIED_DATA_FIELD.to_string(),
                key_path: MODIFIED_DATA_FIELD.to_string(),
                unique: false,
            });
        }

        defs
    }

    /// Check for problems that would fail store creation.
    pub fn validate(&self) -> Result<()> {
        if self.store_name.trim().is_empty() {
            return Err(Error::schema(&self.store_name, "store name is empty"));
        }

        let mut seen = HashSet::new();
        for def in self.index_defs() {
            if !is_valid_path(&def.key_path) {
                return Err(Error::schema(
                    &self.store_name,
                    format!("invalid key path '{}'", def.key_path),
                ));
            }
            if !seen.insert(def.name.clone()) {
                return Err(Error::schema(
                    &self.store_name,
                    format!("duplicate index name '{}'", def.name),
                ));
            }
        }

        Ok(())
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(|segment| !segment.trim().is_empty())
}

/// A created index: a named projection over one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub name: IndexName,
    pub key_path: String,
    pub unique: bool,
}

/// How a store derives the primary key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyPath {
    /// One field holds the key
    Field(String),
    /// Several fields form an array key, in declaration order
    Composite(Vec<String>),
    /// Keys are generated by the store
    AutoIncrement,
}

impl KeyPath {
    /// Extract the primary key from a record.
    ///
    /// Returns `None` for auto-increment stores and for records whose key
    /// fields do not hold valid keys.
    pub fn extract(&self, record: &serde_json::Value) -> Option<Key> {
        match self {
            KeyPath::Field(path) => Key::from_value(field_value(record, path)?),
            KeyPath::Composite(paths) => paths
                .iter()
                .map(|p| field_value(record, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            KeyPath::AutoIncrement => None,
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Field(path) => write!(f, "{}", path),
            KeyPath::Composite(paths) => write!(f, "[{}]", paths.join(",")),
            KeyPath::AutoIncrement => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer_spec() -> StoreSpec {
        StoreSpec::new(
            "Customer",
            vec![
                IndexSpec::unique("CustomerID"),
                IndexSpec::non_unique("CustomerName"),
            ],
        )
        .with_modified_data()
    }

    #[test]
    fn single_unique_field_is_key_path() {
        assert_eq!(
            customer_spec().key_path(),
            KeyPath::Field("CustomerID".into())
        );
    }

    #[test]
    fn several_unique_fields_form_composite_key() {
        let spec = StoreSpec::new(
            "Policy",
            vec![IndexSpec::unique("PolicyID"), IndexSpec::unique("PolicyRef")],
        );
        let key_path = spec.key_path();
        assert_eq!(
            key_path,
            KeyPath::Composite(vec!["PolicyID".into(), "PolicyRef".into()])
        );

        let key = key_path
            .extract(&json!({"PolicyID": 1, "PolicyRef": "P1"}))
            .unwrap();
        assert_eq!(key.to_value(), json!([1, "P1"]));
        assert!(key_path.extract(&json!({"PolicyID": 1})).is_none());
    }

    #[test]
    fn no_unique_fields_means_auto_increment() {
        let spec = StoreSpec::new("Log", vec![IndexSpec::non_unique("Level")]);
        assert_eq!(spec.key_path(), KeyPath::AutoIncrement);
    }

    #[test]
    fn modified_data_index_is_appended() {
        let defs = customer_spec().index_defs();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["CustomerID", "CustomerName", "ModifiedData"]);
        assert!(!defs[2].unique);
    }

    #[test]
    fn validate_rejects_bad_specs() {
        assert!(customer_spec().validate().is_ok());

        let dup = StoreSpec::new(
            "Customer",
            vec![IndexSpec::unique("A"), IndexSpec::non_unique("A")],
        );
        assert!(matches!(dup.validate(), Err(Error::Schema { .. })));

        let clash = StoreSpec::new("Customer", vec![IndexSpec::non_unique("ModifiedData")])
            .with_modified_data();
        assert!(clash.validate().is_err());

        let bad_path = StoreSpec::new("Customer", vec![IndexSpec::unique("Address.")]);
        assert!(bad_path.validate().is_err());

        let unnamed = StoreSpec::new(" ", vec![]);
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: StoreSpec = serde_json::from_value(json!({
            "storeName": "Customer",
            "indexes": [
                {"name": "CustomerID", "isUnique": true},
                {"name": "CustomerName", "isUnique": false}
            ],
            "addModifiedDataCol": true
        }))
        .unwrap();

        assert_eq!(spec, customer_spec());
    }
}
