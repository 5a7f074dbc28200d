//! The store engine: primitive async operations on named databases.
//!
//! Every operation opens its own connection and a transaction scoped to one
//! store, then closes both before returning. Nothing is cached between
//! calls, so each scan reads current storage.

use crate::{
    apply_patch, error::Result, Environment, Error, Filter, Key, KeyRange, Record, SchemaVersion,
    StoreName, StoreSpec,
};
use serde_json::{Map, Value};

/// Primitive operations against the databases of one environment.
#[derive(Debug, Clone)]
pub struct StoreEngine {
    env: Environment,
}

impl StoreEngine {
    /// Create an engine over an environment.
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    /// The underlying environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Open `database` at `version`, creating every store in `specs` if the
    /// version is newer than the stored one.
    ///
    /// A version that is already current leaves the schema untouched.
    pub async fn open_for_schema_change(
        &self,
        database: &str,
        version: SchemaVersion,
        specs: &[StoreSpec],
    ) -> Result<()> {
        let result = self
            .env
            .open_with_upgrade(database, Some(version), |tx| {
                for spec in specs {
                    let store = tx.create_store(spec)?;
                    tracing::info!(
                        database = %database,
                        store = %spec.store_name,
                        key_path = %store.key_path(),
                        indexes = store.index_names().len(),
                        "created store"
                    );
                }
                Ok(())
            })
            .await;

        logged("create_database", result).map(|_connection| ())
    }

    /// Delete a database with all its stores.
    pub async fn delete_database(&self, database: &str) -> Result<()> {
        let result = self.env.delete_database(database).await;
        if result.is_ok() {
            tracing::info!(database = %database, "deleted database");
        }
        logged("delete_database", result)
    }

    /// Read every record of a store in cursor order, optionally narrowed to
    /// an index and a key range.
    pub async fn scan(
        &self,
        database: &str,
        store: &str,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<Record>> {
        require_name("store", store)?;

        let result: Result<Vec<Record>> = async {
            let conn = self.env.open(database, None).await?;
            let tx = conn.read(store, "select").await?;
            let records = tx.scan(index_name, range)?;
            Ok(records)
        }
        .await;

        if let Ok(records) = &result {
            tracing::debug!(database = %database, store = %store, count = records.len(), "scanned");
        }
        logged("select", result)
    }

    /// Like [`scan`](Self::scan), pairing each record with its primary key.
    pub async fn scan_keyed(
        &self,
        database: &str,
        store: &str,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<(Key, Record)>> {
        require_name("store", store)?;

        let result: Result<Vec<(Key, Record)>> = async {
            let conn = self.env.open(database, None).await?;
            let tx = conn.read(store, "select").await?;
            let entries = tx.keyed_scan(index_name, range)?;
            Ok(entries)
        }
        .await;

        logged("select", result)
    }

    /// Shallow-merge `patch` onto every record `filter` accepts, in one
    /// transaction. Each record is written back under its own primary key.
    ///
    /// Returns how many records were updated.
    pub async fn update_matching(
        &self,
        database: &str,
        store: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<usize> {
        require_name("store", store)?;

        let result: Result<usize> = async {
            let conn = self.env.open(database, None).await?;
            let mut tx = conn.write(store, "update").await?;

            let targets: Vec<(Key, Record)> = tx
                .keyed_scan(None, None)?
                .into_iter()
                .filter(|(_, record)| filter(record))
                .collect();
            if targets.is_empty() {
                return Ok(0);
            }

            let count = targets.len();
            for (primary_key, mut record) in targets {
                apply_patch(&mut record, patch);
                tx.put_at(&primary_key, record)?;
            }
            tx.commit().await?;
            Ok(count)
        }
        .await;

        if let Ok(count) = &result {
            tracing::debug!(database = %database, store = %store, count, "updated");
        }
        logged("update", result)
    }

    /// Insert or replace records in one transaction.
    ///
    /// Returns how many records were written. Either all of them commit or
    /// none do.
    pub async fn put(&self, database: &str, store: &str, records: Vec<Record>) -> Result<usize> {
        require_name("store", store)?;

        let result: Result<usize> = async {
            let conn = self.env.open(database, None).await?;
            let mut tx = conn.write(store, "store").await?;

            let count = records.len();
            if count == 0 {
                return Ok(0);
            }
            for record in records {
                tx.put(record)?;
            }
            tx.commit().await?;
            Ok(count)
        }
        .await;

        if let Ok(count) = &result {
            tracing::debug!(database = %database, store = %store, count, "stored");
        }
        logged("store", result)
    }

    /// Delete records whose key on `index_name` (the primary key when
    /// `None`) is one of `keys`. Returns how many were actually deleted.
    pub async fn delete_by_keys(
        &self,
        database: &str,
        store: &str,
        keys: &[Key],
        index_name: Option<&str>,
    ) -> Result<usize> {
        require_name("store", store)?;

        let result: Result<usize> = async {
            let conn = self.env.open(database, None).await?;
            let mut tx = conn.write(store, "delete").await?;

            let deleted = tx.delete_matching(index_name, keys)?;
            if deleted > 0 {
                tx.commit().await?;
            }
            Ok(deleted)
        }
        .await;

        if let Ok(deleted) = &result {
            tracing::debug!(
                database = %database,
                store = %store,
                requested = keys.len(),
                deleted,
                "deleted"
            );
        }
        logged("delete", result)
    }

    /// Remove every record from a store.
    ///
    /// A store that does not exist is left alone and the call succeeds.
    pub async fn clear(&self, database: &str, store: &str) -> Result<()> {
        require_name("store", store)?;

        let result: Result<()> = async {
            let conn = self.env.open(database, None).await?;
            let mut tx = match conn.write(store, "truncate").await {
                Ok(tx) => tx,
                Err(Error::StoreNotFound(_)) => {
                    tracing::debug!(database = %database, store = %store, "nothing to clear");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            tx.clear();
            tx.commit().await
        }
        .await;

        logged("truncate", result)
    }

    /// Name of the store's first declared index, used as its primary key.
    pub async fn primary_key_name(&self, database: &str, store: &str) -> Result<String> {
        require_name("store", store)?;

        let result: Result<String> = async {
            let conn = self.env.open(database, None).await?;
            let tx = conn.read(store, "primary_key_name").await?;
            let name = tx
                .store()
                .index_names()
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| Error::PrimaryKeyNotFound(store.to_string()))?;
            Ok(name)
        }
        .await;

        logged("primary_key_name", result)
    }

    /// Check whether the environment knows a database.
    ///
    /// Never fails: an error while listing databases counts as "no".
    pub async fn database_exists(&self, database: &str) -> bool {
        match self.env.database_names().await {
            Ok(names) => names.iter().any(|n| n == database),
            Err(e) => {
                tracing::warn!(database = %database, error = %e, "could not list databases");
                false
            }
        }
    }

    /// Check whether a database has a store. A missing database has none.
    pub async fn collection_exists(&self, database: &str, store: &str) -> Result<bool> {
        Ok(self
            .collection_names(database)
            .await?
            .iter()
            .any(|name| name == store))
    }

    /// Store names of a database, sorted. Empty if the database is missing.
    pub async fn collection_names(&self, database: &str) -> Result<Vec<StoreName>> {
        if !self.database_exists(database).await {
            return Ok(Vec::new());
        }
        let conn = logged("fetch_all_stores", self.env.open(database, None).await)?;
        Ok(conn.store_names().await)
    }
}

fn require_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::contract(format!("{} name must not be blank", what)));
    }
    Ok(())
}

/// Log a rejected operation before handing the error back.
fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
    result.inspect_err(|e| tracing::error!(operation, error = %e, "operation failed"))
}
