//! The storage environment: a host of named, versioned databases.
//!
//! An [`Environment`] plays the role a browser's key-value host plays for a
//! web page. It opens databases, runs schema upgrades when a caller asks for
//! a newer version, deletes databases, and lists the ones it knows about.
//! Databases live either in memory or as one snapshot file each in a
//! directory.

use crate::snapshot::DatabaseSnapshot;
use crate::store::{DatabaseState, ObjectStore};
use crate::transaction::{ReadTransaction, WriteTransaction};
use crate::{error::Result, DatabaseName, Error, SchemaVersion, StoreName, StoreSpec};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const SNAPSHOT_EXTENSION: &str = "json";

/// Where databases are kept.
#[derive(Debug, Clone)]
enum Backend {
    Memory,
    Directory(PathBuf),
}

/// Lock-protected contents of one database slot.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    /// Whether the on-disk copy has been read
    loaded: bool,
    /// `None` while the database does not exist
    pub(crate) db: Option<DatabaseState>,
}

/// One named database and the connections open against it.
#[derive(Debug)]
pub(crate) struct DatabaseSlot {
    pub(crate) name: DatabaseName,
    pub(crate) state: RwLock<SlotState>,
    connections: AtomicUsize,
}

impl DatabaseSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(SlotState::default()),
            connections: AtomicUsize::new(0),
        }
    }

    fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct EnvInner {
    backend: Backend,
    slots: DashMap<DatabaseName, Arc<DatabaseSlot>>,
}

/// Host of named databases.
///
/// Cloning is cheap; clones share the same databases.
#[derive(Debug, Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// An environment whose databases vanish when it is dropped.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    /// An environment persisting each database as a snapshot file in `dir`.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Open {
                database: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_backend(Backend::Directory(dir)))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                backend,
                slots: DashMap::new(),
            }),
        }
    }

    /// Directory holding snapshot files, if durable.
    pub fn data_dir(&self) -> Option<&Path> {
        match &self.inner.backend {
            Backend::Memory => None,
            Backend::Directory(dir) => Some(dir),
        }
    }

    fn slot(&self, name: &str) -> Arc<DatabaseSlot> {
        self.inner
            .slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DatabaseSlot::new(name)))
            .clone()
    }

    /// Open a database without a schema upgrade.
    ///
    /// A database that does not exist is created empty at version 1 (or at
    /// `version`, if given).
    pub async fn open(&self, name: &str, version: Option<SchemaVersion>) -> Result<Connection> {
        self.open_with_upgrade(name, version, |_| Ok(())).await
    }

    /// Open a database, running `upgrade` once if `version` is newer than
    /// the stored version.
    ///
    /// The upgrade works on a copy of the database: if it fails, nothing it
    /// did is kept. Upgrading while any other connection is open fails with
    /// [`Error::Blocked`].
    pub async fn open_with_upgrade<F>(
        &self,
        name: &str,
        version: Option<SchemaVersion>,
        upgrade: F,
    ) -> Result<Connection>
    where
        F: FnOnce(&mut UpgradeTransaction<'_>) -> Result<()>,
    {
        check_database_name(name)?;
        if version == Some(0) {
            return Err(Error::contract("database version must be positive"));
        }

        let slot = self.slot(name);
        let mut guard = slot.state.write().await;
        self.load(&slot.name, &mut guard).await?;

        let current = guard.db.as_ref().map(DatabaseState::version).unwrap_or(0);
        let requested = version.unwrap_or(current.max(1));

        if requested < current {
            return Err(Error::VersionTooLow {
                database: name.to_string(),
                requested,
                current,
            });
        }

        if requested > current {
            let open_connections = slot.open_connections();
            if open_connections > 0 {
                return Err(Error::Blocked {
                    database: name.to_string(),
                    open_connections,
                });
            }

            let mut next = guard.db.clone().unwrap_or_default();
            next.set_version(requested);

            let mut tx = UpgradeTransaction {
                state: &mut next,
                old_version: current,
            };
            upgrade(&mut tx)?;

            self.persist(name, &next).await.map_err(|reason| Error::Open {
                database: name.to_string(),
                reason,
            })?;

            tracing::info!(
                database = %name,
                old_version = current,
                new_version = requested,
                "database upgraded"
            );
            guard.db = Some(next);
        }

        drop(guard);
        slot.connections.fetch_add(1, Ordering::SeqCst);

        Ok(Connection {
            env: self.clone(),
            slot,
        })
    }

    /// Delete a database and all its stores.
    ///
    /// Fails with [`Error::Blocked`] while any connection is open. Deleting
    /// a database that does not exist succeeds.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        check_database_name(name)?;

        let slot = self.slot(name);
        let mut guard = slot.state.write().await;

        let open_connections = slot.open_connections();
        if open_connections > 0 {
            return Err(Error::Blocked {
                database: name.to_string(),
                open_connections,
            });
        }

        if let Backend::Directory(dir) = &self.inner.backend {
            match tokio::fs::remove_file(snapshot_path(dir, name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Open {
                        database: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        guard.loaded = true;
        guard.db = None;
        Ok(())
    }

    /// Names of all existing databases, sorted.
    pub async fn database_names(&self) -> Result<Vec<DatabaseName>> {
        match &self.inner.backend {
            Backend::Memory => {
                let slots: Vec<Arc<DatabaseSlot>> = self
                    .inner
                    .slots
                    .iter()
                    .map(|entry| entry.value().clone())
                    .collect();

                let mut names = Vec::new();
                for slot in slots {
                    if slot.state.read().await.db.is_some() {
                        names.push(slot.name.clone());
                    }
                }
                names.sort();
                Ok(names)
            }
            Backend::Directory(dir) => list_snapshots(dir).await.map_err(|e| Error::Open {
                database: dir.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn load(&self, name: &str, state: &mut SlotState) -> Result<()> {
        if state.loaded {
            return Ok(());
        }

        if let Backend::Directory(dir) = &self.inner.backend {
            let path = snapshot_path(dir, name);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let db = DatabaseSnapshot::from_json(&text)
                        .and_then(DatabaseState::import)
                        .map_err(|reason| Error::Open {
                            database: name.to_string(),
                            reason,
                        })?;
                    tracing::debug!(database = %name, path = %path.display(), "database loaded");
                    state.db = Some(db);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Open {
                        database: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        state.loaded = true;
        Ok(())
    }

    /// Write a database to disk. A no-op for in-memory environments.
    pub(crate) async fn persist(
        &self,
        name: &str,
        state: &DatabaseState,
    ) -> std::result::Result<(), String> {
        let Backend::Directory(dir) = &self.inner.backend else {
            return Ok(());
        };

        let json = state.export(name).to_json()?;
        let path = snapshot_path(dir, name);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| format!("writing {}: {}", tmp.display(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| format!("renaming {}: {}", tmp.display(), e))?;

        tracing::trace!(database = %name, path = %path.display(), "database persisted");
        Ok(())
    }
}

fn check_database_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\']);
    if invalid {
        return Err(Error::Open {
            database: name.to_string(),
            reason: "invalid database name".to_string(),
        });
    }
    Ok(())
}

fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, SNAPSHOT_EXTENSION))
}

async fn list_snapshots(dir: &Path) -> std::io::Result<Vec<DatabaseName>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// The store-creation step of a schema upgrade.
pub struct UpgradeTransaction<'a> {
    state: &'a mut DatabaseState,
    old_version: SchemaVersion,
}

impl UpgradeTransaction<'_> {
    /// Version the database had before this upgrade (0 if it was new).
    pub fn old_version(&self) -> SchemaVersion {
        self.old_version
    }

    /// Version the database is being upgraded to.
    pub fn new_version(&self) -> SchemaVersion {
        self.state.version()
    }

    /// Create a store with its indexes.
    pub fn create_store(&mut self, spec: &StoreSpec) -> Result<&ObjectStore> {
        self.state.create_store(spec)
    }

    /// Names of the stores that exist so far.
    pub fn store_names(&self) -> Vec<StoreName> {
        self.state.store_names()
    }
}

/// An open connection to one database.
///
/// While any connection is alive, upgrades and deletion of its database are
/// blocked. The connection closes when dropped.
#[derive(Debug)]
pub struct Connection {
    env: Environment,
    slot: Arc<DatabaseSlot>,
}

impl Connection {
    /// Database name.
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// The environment this connection belongs to.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Current schema version.
    pub async fn version(&self) -> SchemaVersion {
        let guard = self.slot.state.read().await;
        guard.db.as_ref().map(DatabaseState::version).unwrap_or(0)
    }

    /// Store names in sorted order.
    pub async fn store_names(&self) -> Vec<StoreName> {
        let guard = self.slot.state.read().await;
        guard
            .db
            .as_ref()
            .map(DatabaseState::store_names)
            .unwrap_or_default()
    }

    /// Start a read-only transaction on one store.
    pub async fn read(&self, store: &str, operation: &str) -> Result<ReadTransaction<'_>> {
        ReadTransaction::begin(&self.slot, store, operation).await
    }

    /// Start a read-write transaction on one store.
    pub async fn write(&self, store: &str, operation: &str) -> Result<WriteTransaction<'_>> {
        WriteTransaction::begin(&self.env, &self.slot, store, operation).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.slot.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
