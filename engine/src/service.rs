//! [`DbService`]: the query and write contract for one database.
//!
//! A service is a value bound to one database name at construction. Every
//! call goes through the [`StoreEngine`] with that name; there is no shared
//! "current database" anywhere.
//!
//! Composite operations (`store_many`, `update`, the joins) issue one
//! transaction per store access. They are not atomic across stores: if one
//! part fails, parts that already committed stay committed.

use crate::join::{inner_join, left_join, ArrayJoinOptions, JoinOptions};
use crate::query::{finish, run_pipeline, Filter, SelectOptions, Selection};
use crate::{
    error::Result, field_value, into_batch, loose_equals, DatabaseName, Environment,
    Key, Record, SchemaVersion, StoreEngine, StoreName, StoreSpec,
};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Which records an [`update`](DbService::update) touches.
#[derive(Clone)]
pub enum UpdateTarget {
    /// Records whose primary-key field loosely equals one of these values
    Keys(Vec<Value>),
    /// Records the predicate accepts
    Filter(Filter),
}

impl UpdateTarget {
    /// One primary-key value.
    pub fn key(value: impl Into<Value>) -> Self {
        UpdateTarget::Keys(vec![value.into()])
    }

    /// Several primary-key values.
    pub fn keys<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        UpdateTarget::Keys(values.into_iter().map(Into::into).collect())
    }

    /// Records matching a predicate.
    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        UpdateTarget::Filter(Arc::new(f))
    }
}

impl fmt::Debug for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateTarget::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            UpdateTarget::Filter(_) => f.write_str("Filter(..)"),
        }
    }
}

/// Query and write operations against one database.
#[derive(Debug, Clone)]
pub struct DbService {
    engine: StoreEngine,
    database: DatabaseName,
}

impl DbService {
    /// Bind a service to `database`.
    pub fn new(engine: StoreEngine, database: impl Into<DatabaseName>) -> Self {
        Self {
            engine,
            database: database.into(),
        }
    }

    /// A service over a fresh in-memory environment.
    pub fn in_memory(database: impl Into<DatabaseName>) -> Self {
        Self::new(StoreEngine::new(Environment::in_memory()), database)
    }

    /// Name of the bound database.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn engine(&self) -> &StoreEngine {
        &self.engine
    }

    /// Scan a store and run the select pipeline over it.
    pub async fn select(&self, store: &str, options: &SelectOptions) -> Result<Selection> {
        options.validate()?;
        let records = self
            .engine
            .scan(
                &self.database,
                store,
                options.index_name.as_deref(),
                options.key_range.as_ref(),
            )
            .await?;
        Ok(run_pipeline(records, options))
    }

    async fn select_filtered(&self, store: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
        let options = SelectOptions {
            filter: filter.cloned(),
            ..SelectOptions::default()
        };
        Ok(self.select(store, &options).await?.into_vec())
    }

    /// Primary keys of the records `options` selects, in cursor order.
    ///
    /// Only the index, range, filter and first-only settings apply. This is
    /// how callers reach records whose keys were generated by the store.
    pub async fn select_keys(&self, store: &str, options: &SelectOptions) -> Result<Vec<Key>> {
        options.validate()?;
        let entries = self
            .engine
            .scan_keyed(
                &self.database,
                store,
                options.index_name.as_deref(),
                options.key_range.as_ref(),
            )
            .await?;

        let keys = entries
            .into_iter()
            .filter(|(_, record)| options.filter.as_ref().map_or(true, |f| f(record)))
            .map(|(key, _)| key);
        Ok(if options.first_only {
            keys.take(1).collect()
        } else {
            keys.collect()
        })
    }

    /// Write a record, or each element of an array of records. Returns the
    /// number of records written.
    pub async fn store(&self, store: &str, data: Value) -> Result<usize> {
        self.engine
            .put(&self.database, store, into_batch(data))
            .await
    }

    /// Write to several stores concurrently, one transaction per store.
    ///
    /// Pairs whose data is `null` or an empty array are skipped and count 0.
    /// Counts come back in input order. If any write fails, the first
    /// failure in input order is returned; the other writes still ran.
    pub async fn store_many(&self, pairs: Vec<(StoreName, Value)>) -> Result<Vec<usize>> {
        let writes = pairs.into_iter().map(|(store, data)| async move {
            let nothing = match &data {
                Value::Null => true,
                Value::Array(items) => items.is_empty(),
                _ => false,
            };
            if nothing {
                tracing::warn!(database = %self.database, store = %store, "no data to store");
                return Ok(0);
            }

            self.store(&store, data).await.inspect_err(|e| {
                tracing::error!(store = %store, error = %e, "store_many failed for store")
            })
        });

        join_all(writes).await.into_iter().collect()
    }

    /// Shallow-merge `patch` onto every targeted record and write them back.
    ///
    /// Returns the number of records updated; 0 when nothing matched.
    pub async fn update(
        &self,
        store: &str,
        target: UpdateTarget,
        patch: &Map<String, Value>,
    ) -> Result<usize> {
        let filter: Filter = match target {
            UpdateTarget::Filter(filter) => filter,
            UpdateTarget::Keys(keys) => {
                let key_field = self.engine.primary_key_name(&self.database, store).await?;
                Arc::new(move |record: &Record| {
                    let value = field_value(record, &key_field);
                    keys.iter().any(|key| loose_equals(Some(key), value))
                })
            }
        };

        self.engine
            .update_matching(&self.database, store, &filter, patch)
            .await
    }

    /// Delete records by primary key, or by key on `index_name`. Returns the
    /// number actually deleted.
    pub async fn delete(&self, store: &str, keys: &[Key], index_name: Option<&str>) -> Result<usize> {
        self.engine
            .delete_by_keys(&self.database, store, keys, index_name)
            .await
    }

    /// Remove every record from a store. A missing store is not an error.
    pub async fn truncate(&self, store: &str) -> Result<()> {
        self.engine.clear(&self.database, store).await
    }

    /// Inner join of two stores.
    pub async fn select_inner_join(&self, options: &JoinOptions) -> Result<Selection> {
        self.select_join(options, false).await
    }

    /// Left join of two stores.
    pub async fn select_left_join(&self, options: &JoinOptions) -> Result<Selection> {
        self.select_join(options, true).await
    }

    async fn select_join(&self, options: &JoinOptions, keep_unmatched: bool) -> Result<Selection> {
        options.validate()?;

        let left = self
            .select_filtered(&options.left_store, options.left_filter.as_ref())
            .await?;
        let right = self
            .select_filtered(&options.right_store, options.right_filter.as_ref())
            .await?;

        let join = if keep_unmatched { left_join } else { inner_join };
        let joined = join(
            &left,
            &right,
            &options.left_field,
            Some(options.right_field.as_str()),
            &options.merge,
        );

        tracing::debug!(
            left = %options.left_store,
            right = %options.right_store,
            left_count = left.len(),
            right_count = right.len(),
            joined = joined.len(),
            "joined stores"
        );

        Ok(finish(
            joined,
            options.order_by.as_ref(),
            options.ascending,
            options.first_only,
        ))
    }

    /// Inner join of a store against `options.join_array`.
    pub async fn select_inner_join_on_array(
        &self,
        store: &str,
        options: &ArrayJoinOptions,
    ) -> Result<Selection> {
        self.select_array_join(store, options, false).await
    }

    /// Left join of a store against `options.join_array`.
    pub async fn select_left_join_on_array(
        &self,
        store: &str,
        options: &ArrayJoinOptions,
    ) -> Result<Selection> {
        self.select_array_join(store, options, true).await
    }

    async fn select_array_join(
        &self,
        store: &str,
        options: &ArrayJoinOptions,
        keep_unmatched: bool,
    ) -> Result<Selection> {
        options.validate()?;

        let records = self
            .select_filtered(store, options.store_filter.as_ref())
            .await?;

        let join = if keep_unmatched { left_join } else { inner_join };
        let joined = join(
            &records,
            &options.join_array,
            &options.db_field,
            options.array_field.as_deref(),
            &options.merge,
        );

        Ok(finish(
            joined,
            options.order_by.as_ref(),
            options.ascending,
            options.first_only,
        ))
    }

    /// Check whether a database exists in this service's environment.
    pub async fn database_exists(&self, name: &str) -> bool {
        self.engine.database_exists(name).await
    }

    /// Check whether the bound database has a store.
    pub async fn store_exists(&self, store: &str) -> Result<bool> {
        self.engine.collection_exists(&self.database, store).await
    }

    /// Store names of the bound database, sorted.
    pub async fn fetch_all_stores(&self) -> Result<Vec<StoreName>> {
        self.engine.collection_names(&self.database).await
    }

    /// Create the bound database at `version` with the given stores.
    pub async fn create_database(&self, version: SchemaVersion, specs: &[StoreSpec]) -> Result<()> {
        self.engine
            .open_for_schema_change(&self.database, version, specs)
            .await
    }

    /// Delete the bound database.
    pub async fn delete_database(&self) -> Result<()> {
        self.engine.delete_database(&self.database).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, IndexSpec};
    use serde_json::json;

    async fn service() -> DbService {
        let svc = DbService::in_memory("demo");
        svc.create_database(
            1,
            &[
                StoreSpec::new("Customer", vec![IndexSpec::unique("CustomerID")]),
                StoreSpec::new("Log", vec![IndexSpec::non_unique("Level")]),
            ],
        )
        .await
        .unwrap();
        svc
    }

    #[tokio::test]
    async fn store_many_skips_empty_pairs() {
        let svc = service().await;
        let counts = svc
            .store_many(vec![
                ("Customer".into(), json!([{"CustomerID": 1}, {"CustomerID": 2}])),
                ("Log".into(), json!([])),
                ("Log".into(), Value::Null),
                ("Log".into(), json!({"Level": "info"})),
            ])
            .await
            .unwrap();

        assert_eq!(counts, vec![2, 0, 0, 1]);
    }

    #[tokio::test]
    async fn store_many_reports_first_failure() {
        let svc = service().await;
        let err = svc
            .store_many(vec![
                ("Log".into(), json!({"Level": "info"})),
                ("Missing".into(), json!({"a": 1})),
                ("Customer".into(), json!({"CustomerID": 1})),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        // Other writes were not rolled back
        assert_eq!(svc.select("Customer", &SelectOptions::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_by_filter() {
        let svc = service().await;
        svc.store("Log", json!([{"Level": "info"}, {"Level": "warn"}, {"Level": "info"}]))
            .await
            .unwrap();

        let patch = json!({"Seen": true});
        let updated = svc
            .update(
                "Log",
                UpdateTarget::filter(|r| r["Level"] == "info"),
                patch.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let seen = svc
            .select("Log", &SelectOptions::new().filter(|r| r["Seen"] == true))
            .await
            .unwrap();
        assert_eq!(seen.len(), 2);

        // Records were replaced in place, not copied
        let all = svc.select("Log", &SelectOptions::new()).await.unwrap().into_vec();
        assert_eq!(
            all,
            vec![
                json!({"Level": "info", "Seen": true}),
                json!({"Level": "warn"}),
                json!({"Level": "info", "Seen": true}),
            ]
        );

        let updated = svc
            .update(
                "Log",
                UpdateTarget::filter(|r| r["Level"] == "info"),
                patch.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(svc.select("Log", &SelectOptions::new()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn generated_keys_can_be_selected_and_deleted() {
        let svc = service().await;
        svc.store("Log", json!([{"Level": "info"}, {"Level": "warn"}, {"Level": "info"}]))
            .await
            .unwrap();

        let keys = svc
            .select_keys("Log", &SelectOptions::new().filter(|r| r["Level"] == "info"))
            .await
            .unwrap();
        assert_eq!(keys, vec![Key::from(1), Key::from(3)]);

        let first = svc
            .select_keys("Log", &SelectOptions::new().first_only())
            .await
            .unwrap();
        assert_eq!(first, vec![Key::from(1)]);

        assert_eq!(svc.delete("Log", &keys, None).await.unwrap(), 2);
        assert_eq!(
            svc.select("Log", &SelectOptions::new()).await.unwrap().into_vec(),
            vec![json!({"Level": "warn"})]
        );
    }

    #[tokio::test]
    async fn update_by_key_keeps_record_count() {
        let svc = service().await;
        svc.store("Customer", json!([{"CustomerID": 1}, {"CustomerID": 2}]))
            .await
            .unwrap();

        let patch = json!({"Tier": "gold"});
        let updated = svc
            .update("Customer", UpdateTarget::keys(["2", "9"]), patch.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            svc.select("Customer", &SelectOptions::new()).await.unwrap().into_vec(),
            vec![json!({"CustomerID": 1}), json!({"CustomerID": 2, "Tier": "gold"})]
        );
    }

    #[tokio::test]
    async fn array_join_on_bare_items() {
        let svc = service().await;
        svc.store("Customer", json!([{"CustomerID": 1}, {"CustomerID": 2}, {"CustomerID": 3}]))
            .await
            .unwrap();

        let options = ArrayJoinOptions::new("CustomerID", vec![json!("3"), json!(1)])
            .order_by("CustomerID")
            .descending();
        let out = svc
            .select_inner_join_on_array("Customer", &options)
            .await
            .unwrap()
            .into_vec();

        assert_eq!(out, vec![json!({"CustomerID": 3}), json!({"CustomerID": 1})]);
    }

    #[tokio::test]
    async fn join_first_only() {
        let svc = service().await;
        svc.store("Customer", json!([{"CustomerID": 1}, {"CustomerID": 2}]))
            .await
            .unwrap();

        let options = ArrayJoinOptions::new("CustomerID", vec![json!({"Id": 2, "Tag": "x"})])
            .array_field("Id")
            .first_only();
        let out = svc
            .select_left_join_on_array("Customer", &options)
            .await
            .unwrap();

        assert_eq!(out, Selection::First(Some(json!({"CustomerID": 1}))));
    }

    #[tokio::test]
    async fn contract_checks_run_before_storage() {
        let svc = DbService::in_memory("never-created");

        let err = svc
            .select_inner_join(&JoinOptions::new("Customer", "", "Policy", "CustomerID"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert!(!svc.database_exists("never-created").await);
    }
}
