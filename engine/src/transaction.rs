//! Read and write transactions scoped to one store.
//!
//! Read transactions share the database lock. A write transaction holds it
//! exclusively and works on a staged copy of its store; the copy replaces
//! the live store only when [`WriteTransaction::commit`] succeeds, so a
//! transaction that fails or is dropped leaves nothing behind.

use crate::env::{DatabaseSlot, Environment, SlotState};
use crate::error::{Result, TxCause, TxOutcome};
use crate::store::{CursorEntry, ObjectStore};
use crate::{Error, Key, KeyRange, Record};
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

fn transaction_error(
    operation: &str,
    outcome: TxOutcome,
    store: &ObjectStore,
    cause: TxCause,
) -> Error {
    Error::Transaction {
        operation: operation.to_string(),
        outcome,
        store: store.name().to_string(),
        key_path: store.key_path().to_string(),
        cause,
    }
}

/// A read-only view of one store.
pub struct ReadTransaction<'c> {
    operation: String,
    store: RwLockReadGuard<'c, ObjectStore>,
}

impl<'c> ReadTransaction<'c> {
    pub(crate) async fn begin(
        slot: &'c DatabaseSlot,
        store_name: &str,
        operation: &str,
    ) -> Result<Self> {
        let guard = slot.state.read().await;
        let store = RwLockReadGuard::try_map(guard, |state: &SlotState| {
            state.db.as_ref().and_then(|db| db.store(store_name).ok())
        })
        .map_err(|_| Error::StoreNotFound(store_name.to_string()))?;

        Ok(Self {
            operation: operation.to_string(),
            store,
        })
    }

    /// The store being read.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Entries in cursor order.
    pub fn cursor(
        &self,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<CursorEntry<'_>>> {
        self.store
            .cursor(index_name, range)
            .map_err(|cause| self.fail(cause))
    }

    /// Copies of the records in cursor order.
    pub fn scan(&self, index_name: Option<&str>, range: Option<&KeyRange>) -> Result<Vec<Record>> {
        Ok(self
            .cursor(index_name, range)?
            .into_iter()
            .map(|entry| entry.value.clone())
            .collect())
    }

    /// Primary keys and copies of the records in cursor order.
    pub fn keyed_scan(
        &self,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<(Key, Record)>> {
        Ok(self
            .cursor(index_name, range)?
            .into_iter()
            .map(|entry| (entry.primary_key.clone(), entry.value.clone()))
            .collect())
    }

    fn fail(&self, cause: TxCause) -> Error {
        transaction_error(&self.operation, TxOutcome::Error, &self.store, cause)
    }
}

/// A read-write transaction on one store.
///
/// Changes are invisible to everyone else until [`commit`](Self::commit).
pub struct WriteTransaction<'c> {
    env: &'c Environment,
    database: &'c str,
    operation: String,
    guard: RwLockWriteGuard<'c, SlotState>,
    staged: ObjectStore,
}

impl<'c> WriteTransaction<'c> {
    pub(crate) async fn begin(
        env: &'c Environment,
        slot: &'c DatabaseSlot,
        store_name: &str,
        operation: &str,
    ) -> Result<Self> {
        let guard = slot.state.write().await;
        let staged = guard
            .db
            .as_ref()
            .ok_or_else(|| Error::StoreNotFound(store_name.to_string()))?
            .store(store_name)?
            .clone();

        Ok(Self {
            env,
            database: &slot.name,
            operation: operation.to_string(),
            guard,
            staged,
        })
    }

    /// The staged store, including uncommitted changes.
    pub fn store(&self) -> &ObjectStore {
        &self.staged
    }

    /// Copies of the staged records in cursor order.
    pub fn scan(&self, index_name: Option<&str>, range: Option<&KeyRange>) -> Result<Vec<Record>> {
        let entries = self
            .staged
            .cursor(index_name, range)
            .map_err(|cause| self.fail(cause))?;
        Ok(entries.into_iter().map(|e| e.value.clone()).collect())
    }

    /// Staged primary keys and records in cursor order.
    pub fn keyed_scan(
        &self,
        index_name: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<(Key, Record)>> {
        let entries = self
            .staged
            .cursor(index_name, range)
            .map_err(|cause| self.fail(cause))?;
        Ok(entries
            .into_iter()
            .map(|e| (e.primary_key.clone(), e.value.clone()))
            .collect())
    }

    /// Insert or replace a record.
    pub fn put(&mut self, record: Record) -> Result<Key> {
        self.staged.put(record).map_err(|cause| self.fail(cause))
    }

    /// Replace the record stored at `primary_key`.
    pub fn put_at(&mut self, primary_key: &Key, record: Record) -> Result<Key> {
        self.staged
            .put_at(primary_key, record)
            .map_err(|cause| self.fail(cause))
    }

    /// Remove one record by primary key.
    pub fn delete(&mut self, primary_key: &Key) -> Option<Record> {
        self.staged.delete(primary_key)
    }

    /// Remove records whose index key (or primary key) is in `keys`.
    pub fn delete_matching(&mut self, index_name: Option<&str>, keys: &[Key]) -> Result<usize> {
        self.staged
            .delete_matching(index_name, keys)
            .map_err(|cause| self.fail(cause))
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.staged.clear();
    }

    /// Install the staged store and persist the database.
    ///
    /// If persisting fails the previous store is put back and the
    /// transaction reports an abort.
    pub async fn commit(self) -> Result<()> {
        let Self {
            env,
            database,
            operation,
            mut guard,
            staged,
        } = self;

        let store_name = staged.name().to_string();
        let key_path = staged.key_path().to_string();

        let Some(db) = guard.db.as_mut() else {
            return Err(Error::StoreNotFound(store_name));
        };

        let previous = db.replace_store(staged);
        if let Err(reason) = env.persist(database, db).await {
            if let Some(previous) = previous {
                db.replace_store(previous);
            }
            tracing::error!(database = %database, store = %store_name, %reason, "commit failed");
            return Err(Error::Transaction {
                operation,
                outcome: TxOutcome::Abort,
                store: store_name,
                key_path,
                cause: TxCause::Persist(reason),
            });
        }

        Ok(())
    }

    fn fail(&self, cause: TxCause) -> Error {
        transaction_error(&self.operation, TxOutcome::Abort, &self.staged, cause)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Environment, ErrorKind, IndexSpec, StoreSpec};
    use serde_json::json;

    async fn customer_env() -> Environment {
        let env = Environment::in_memory();
        env.open_with_upgrade("demo", Some(1), |tx| {
            tx.create_store(&StoreSpec::new(
                "Customer",
                vec![
                    IndexSpec::unique("CustomerID"),
                    IndexSpec::non_unique("CustomerName"),
                ],
            ))
            .map(|_| ())
        })
        .await
        .unwrap();
        env
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let env = customer_env().await;
        let conn = env.open("demo", None).await.unwrap();

        {
            let mut tx = conn.write("Customer", "store").await.unwrap();
            tx.put(json!({"CustomerID": 1})).unwrap();
            assert_eq!(tx.store().len(), 1);
        }

        let tx = conn.read("Customer", "select").await.unwrap();
        assert!(tx.store().is_empty());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let env = customer_env().await;
        let conn = env.open("demo", None).await.unwrap();

        let mut tx = conn.write("Customer", "store").await.unwrap();
        tx.put(json!({"CustomerID": 1, "CustomerName": "A"})).unwrap();
        tx.put(json!({"CustomerID": 2, "CustomerName": "B"})).unwrap();
        tx.commit().await.unwrap();

        let tx = conn.read("Customer", "select").await.unwrap();
        assert_eq!(tx.scan(Some("CustomerName"), None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failures_name_operation_store_and_key_path() {
        let env = customer_env().await;
        let conn = env.open("demo", None).await.unwrap();

        let mut tx = conn.write("Customer", "store").await.unwrap();
        let err = tx.put(json!({"CustomerName": "keyless"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert!(err
            .to_string()
            .starts_with("store transaction abort at Customer.CustomerID: DataError"));
        drop(tx);

        let tx = conn.read("Customer", "select").await.unwrap();
        let err = tx.scan(Some("Missing"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "select transaction error at Customer.CustomerID: NotFoundError: no index named 'Missing'"
        );
    }

    #[tokio::test]
    async fn missing_store_is_not_found() {
        let env = customer_env().await;
        let conn = env.open("demo", None).await.unwrap();

        let err = conn.read("Policy", "select").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = conn.write("Policy", "store").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
