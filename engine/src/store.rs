//! Object stores - the in-memory state of one database.
//!
//! An [`ObjectStore`] holds records keyed by primary key plus one ordered
//! projection per declared index. [`DatabaseState`] groups the stores of a
//! database with its schema version and converts to and from snapshots.

use crate::snapshot::{DatabaseSnapshot, StoreSnapshot, StoredRecord};
use crate::{
    error::{Result, TxCause},
    field_value, DatabaseName, Error, IndexDef, Key, KeyPath, KeyRange, Record, SchemaVersion,
    StoreName, StoreSpec,
};
use std::collections::{BTreeMap, BTreeSet};

/// An ordered projection of a store over one field.
#[derive(Debug, Clone)]
struct Index {
    def: IndexDef,
    /// Index key -> primary keys of the records holding it
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl Index {
    fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    fn key_for(&self, record: &Record) -> Option<Key> {
        field_value(record, &self.def.key_path).and_then(Key::from_value)
    }

    fn insert(&mut self, index_key: Key, primary_key: Key) {
        self.entries.entry(index_key).or_default().insert(primary_key);
    }

    fn remove(&mut self, index_key: &Key, primary_key: &Key) {
        if let Some(holders) = self.entries.get_mut(index_key) {
            holders.remove(primary_key);
            if holders.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }
}

/// One entry visited by a cursor.
#[derive(Debug, Clone, Copy)]
pub struct CursorEntry<'a> {
    /// Index key, or the primary key when no index is used
    pub key: &'a Key,
    pub primary_key: &'a Key,
    pub value: &'a Record,
}

/// A named set of records within a database.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    name: StoreName,
    key_path: KeyPath,
    indexes: Vec<Index>,
    records: BTreeMap<Key, Record>,
    next_key: u64,
}

impl ObjectStore {
    /// Create an empty store from a spec.
    pub fn create(spec: &StoreSpec) -> Result<Self> {
        spec.validate()?;

        Ok(Self {
            name: spec.store_name.clone(),
            key_path: spec.key_path(),
            indexes: spec.index_defs().into_iter().map(Index::new).collect(),
            records: BTreeMap::new(),
            next_key: 0,
        })
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How primary keys are derived.
    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    /// Index names in declaration order.
    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(|i| i.def.name.as_str()).collect()
    }

    /// Definition of an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.find_index(name).map(|i| &i.def)
    }

    fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.def.name == name)
    }

    /// Get a record by primary key.
    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a record, returning its primary key.
    ///
    /// Fails without modifying the store if the record has no valid key or
    /// would duplicate a value in a unique index.
    pub fn put(&mut self, record: Record) -> std::result::Result<Key, TxCause> {
        let primary_key = match &self.key_path {
            KeyPath::AutoIncrement => Key::Number((self.next_key + 1) as f64),
            path => path.extract(&record).ok_or_else(|| {
                TxCause::Data(format!("record has no valid key at '{}'", path))
            })?,
        };

        self.write(primary_key, record)
    }

    /// Write `record` back over the record stored at `primary_key`.
    ///
    /// Stores with generated keys keep `primary_key`. Stores whose key lives
    /// in the record behave like [`put`](Self::put).
    pub fn put_at(&mut self, primary_key: &Key, record: Record) -> std::result::Result<Key, TxCause> {
        match self.key_path {
            KeyPath::AutoIncrement => self.write(primary_key.clone(), record),
            _ => self.put(record),
        }
    }

    fn write(&mut self, primary_key: Key, record: Record) -> std::result::Result<Key, TxCause> {
        for index in self.indexes.iter().filter(|i| i.def.unique) {
            let Some(index_key) = index.key_for(&record) else {
                continue;
            };
            let taken = index
                .entries
                .get(&index_key)
                .is_some_and(|holders| holders.iter().any(|h| h != &primary_key));
            if taken {
                return Err(TxCause::Constraint(format!(
                    "index '{}' already holds {}",
                    index.def.name, index_key
                )));
            }
        }

        if let (KeyPath::AutoIncrement, Key::Number(n)) = (&self.key_path, &primary_key) {
            if *n >= (self.next_key + 1) as f64 {
                self.next_key = n.floor() as u64;
            }
        }

        self.delete(&primary_key);
        for index in &mut self.indexes {
            if let Some(index_key) = index.key_for(&record) {
                index.insert(index_key, primary_key.clone());
            }
        }
        self.records.insert(primary_key.clone(), record);

        Ok(primary_key)
    }

    /// Remove a record by primary key.
    pub fn delete(&mut self, primary_key: &Key) -> Option<Record> {
        let old = self.records.remove(primary_key)?;
        for index in &mut self.indexes {
            if let Some(index_key) = index.key_for(&old) {
                index.remove(&index_key, primary_key);
            }
        }
        Some(old)
    }

    /// Remove every record. Generated keys keep counting upward.
    pub fn clear(&mut self) {
        self.records.clear();
        for index in &mut self.indexes {
            index.entries.clear();
        }
    }

    /// Walk records in cursor order.
    ///
    /// Without an index this is primary-key order; with one it is
    /// (index key, primary key) order and records lacking the indexed field
    /// are skipped.
    pub fn cursor(
        &self,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> std::result::Result<Vec<CursorEntry<'_>>, TxCause> {
        if range.is_some_and(KeyRange::is_empty) {
            return Ok(Vec::new());
        }

        let Some(index_name) = index_name else {
            let iter: Box<dyn Iterator<Item = (&Key, &Record)> + '_> = match range {
                Some(range) => Box::new(self.records.range::<Key, _>(range.bounds())),
                None => Box::new(self.records.iter()),
            };
            return Ok(iter
                .map(|(key, value)| CursorEntry {
                    key,
                    primary_key: key,
                    value,
                })
                .collect());
        };

        let index = self
            .find_index(index_name)
            .ok_or_else(|| TxCause::IndexNotFound(index_name.to_string()))?;

        let iter: Box<dyn Iterator<Item = (&Key, &BTreeSet<Key>)> + '_> = match range {
            Some(range) => Box::new(index.entries.range::<Key, _>(range.bounds())),
            None => Box::new(index.entries.iter()),
        };

        Ok(iter
            .flat_map(|(key, holders)| holders.iter().map(move |pk| (key, pk)))
            .filter_map(|(key, primary_key)| {
                self.records.get(primary_key).map(|value| CursorEntry {
                    key,
                    primary_key,
                    value,
                })
            })
            .collect())
    }

    /// Delete every record whose key on the given index (primary key when
    /// `None`) is one of `keys`. Returns the number of records removed.
    pub fn delete_matching(
        &mut self,
        index_name: Option<&str>,
        keys: &[Key],
    ) -> std::result::Result<usize, TxCause> {
        let wanted: BTreeSet<&Key> = keys.iter().collect();
        let doomed: Vec<Key> = self
            .cursor(index_name, None)?
            .into_iter()
            .filter(|entry| wanted.contains(entry.key))
            .map(|entry| entry.primary_key.clone())
            .collect();

        Ok(doomed
            .iter()
            .filter(|pk| self.delete(pk).is_some())
            .count())
    }

    /// Export the store as a snapshot.
    pub fn export(&self) -> StoreSnapshot {
        StoreSnapshot {
            key_path: self.key_path.clone(),
            indexes: self.indexes.iter().map(|i| i.def.clone()).collect(),
            next_key: self.next_key,
            records: self
                .records
                .iter()
                .map(|(key, value)| StoredRecord {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a store, including its indexes, from a snapshot.
    pub fn import(name: impl Into<StoreName>, snapshot: StoreSnapshot) -> std::result::Result<Self, String> {
        let mut store = Self {
            name: name.into(),
            key_path: snapshot.key_path,
            indexes: snapshot.indexes.into_iter().map(Index::new).collect(),
            records: BTreeMap::new(),
            next_key: snapshot.next_key,
        };

        for StoredRecord { key, value } in snapshot.records {
            for index in &mut store.indexes {
                if let Some(index_key) = index.key_for(&value) {
                    if index.def.unique && index.entries.contains_key(&index_key) {
                        return Err(format!(
                            "store '{}' has duplicate {} in unique index '{}'",
                            store.name, index_key, index.def.name
                        ));
                    }
                    index.insert(index_key, key.clone());
                }
            }
            store.records.insert(key, value);
        }

        Ok(store)
    }
}

/// All stores of one database plus its schema version.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    version: SchemaVersion,
    stores: BTreeMap<StoreName, ObjectStore>,
}

impl DatabaseState {
    /// Create an empty database at a version.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            stores: BTreeMap::new(),
        }
    }

    /// Current schema version.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: SchemaVersion) {
        self.version = version;
    }

    /// Store names in sorted order.
    pub fn store_names(&self) -> Vec<StoreName> {
        self.stores.keys().cloned().collect()
    }

    /// Check if a store exists.
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Get a store by name.
    pub fn store(&self, name: &str) -> Result<&ObjectStore> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    /// Get a mutable store by name.
    pub fn store_mut(&mut self, name: &str) -> Result<&mut ObjectStore> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    /// Create a store. Fails if the name is taken or the store spec is invalid.
    pub fn create_store(&mut self, spec: &StoreSpec) -> Result<&ObjectStore> {
        if self.stores.contains_key(&spec.store_name) {
            return Err(Error::schema(&spec.store_name, "store already exists"));
        }
        let store = ObjectStore::create(spec)?;
        Ok(self.stores.entry(spec.store_name.clone()).or_insert(store))
    }

    /// Install a store under its name, returning the one it replaces.
    pub(crate) fn replace_store(&mut self, store: ObjectStore) -> Option<ObjectStore> {
        self.stores.insert(store.name.clone(), store)
    }

    /// Export the database as a snapshot.
    pub fn export(&self, name: impl Into<DatabaseName>) -> DatabaseSnapshot {
        let mut snapshot = DatabaseSnapshot::new(name, self.version);
        for (store_name, store) in &self.stores {
            snapshot.stores.insert(store_name.clone(), store.export());
        }
        snapshot
    }

    /// Rebuild a database from a snapshot.
    pub fn import(snapshot: DatabaseSnapshot) -> std::result::Result<Self, String> {
        let mut state = Self::new(snapshot.version);
        for (store_name, store) in snapshot.stores {
            let store = ObjectStore::import(store_name.clone(), store)?;
            state.stores.insert(store_name, store);
        }
        Ok(state)
    }
}
