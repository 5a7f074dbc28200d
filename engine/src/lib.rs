//! # Keyshelf Engine
//!
//! An embedded, IndexedDB-style data-access layer.
//!
//! This crate stores JSON records in named, versioned databases made of
//! object stores with indexes, and layers a small query engine and
//! relational-style joins on top of cursor-based retrieval.
//!
//! ## Design Principles
//!
//! - **One transaction per access**: every select, write, delete or clear
//!   opens its own transaction on one store and commits or aborts as a whole
//! - **No hidden state**: each scan reads current storage; a [`DbService`]
//!   is a value bound to one database name, not a global
//! - **Non-mutating joins**: merges always build new records
//! - **Deterministic persistence**: durable databases are snapshot files
//!   with sorted stores and key-ordered records
//!
//! ## Core Concepts
//!
//! ### Store Engine
//!
//! The [`StoreEngine`] is the only component that talks to storage. It opens
//! databases through an [`Environment`], creates stores during a schema
//! upgrade, and exposes primitive scan, put, delete and clear operations.
//!
//! ### Query Layer
//!
//! A select runs a fixed pipeline: scan, filter, transform, sort, and
//! optionally keep only the first record. See [`SelectOptions`] and
//! [`run_pipeline`].
//!
//! ### Join Layer
//!
//! [`inner_join`] and [`left_join`] match records on a field using
//! case-insensitive, null-aware [`loose_equals`], fanning out on the right.
//! A [`MergePolicy`] decides what each matched pair becomes.
//!
//! ### Sorting
//!
//! [`sort_records`] orders by a field, several fields, a comparator, or the
//! natural order of primitive items. See [`OrderBy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use keyshelf_engine::{DbService, IndexSpec, JoinOptions, SelectOptions, StoreSpec};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> keyshelf_engine::error::Result<()> {
//! let svc = DbService::in_memory("demo");
//!
//! // 1. Create the database and its stores
//! svc.create_database(1, &[
//!     StoreSpec::new("Customer", vec![IndexSpec::unique("CustomerID")]),
//!     StoreSpec::new("Policy", vec![
//!         IndexSpec::unique("PolicyID"),
//!         IndexSpec::non_unique("CustomerID"),
//!     ]),
//! ]).await?;
//!
//! // 2. Write records
//! svc.store("Customer", json!([{"CustomerID": 123}, {"CustomerID": 124}])).await?;
//! svc.store("Policy", json!({"PolicyID": 1, "CustomerID": 123})).await?;
//!
//! // 3. Query
//! let found = svc
//!     .select("Customer", &SelectOptions::new().filter(|c| c["CustomerID"] == 124))
//!     .await?;
//! assert_eq!(found.len(), 1);
//!
//! // 4. Join
//! let joined = svc
//!     .select_left_join(&JoinOptions::new("Customer", "CustomerID", "Policy", "CustomerID"))
//!     .await?
//!     .into_vec();
//! assert_eq!(joined[0], json!({"CustomerID": 123, "PolicyID": 1}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! [`Environment::open_dir`] keeps each database as a JSON
//! [`DatabaseSnapshot`] file, rewritten atomically on every commit.

pub mod engine;
pub mod env;
pub mod error;
pub mod join;
pub mod key;
pub mod query;
pub mod record;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod sort;
pub mod store;
pub mod transaction;

// Re-export main types at crate root
pub use engine::StoreEngine;
pub use env::{Connection, Environment, UpgradeTransaction};
pub use error::{Error, ErrorKind, TxCause, TxOutcome};
pub use join::{inner_join, left_join, ArrayJoinOptions, JoinOptions, MergeFn, MergePolicy};
pub use key::{Key, KeyRange};
pub use query::{run_pipeline, Filter, SelectOptions, Selection, Transform};
pub use record::{
    apply_patch, field_value, into_batch, loose_equals, loose_string, merged, Record,
    MODIFIED_DATA_FIELD,
};
pub use schema::{IndexDef, IndexSpec, KeyPath, StoreSpec};
pub use service::{DbService, UpdateTarget};
pub use snapshot::{DatabaseSnapshot, StoreSnapshot, StoredRecord, SNAPSHOT_FORMAT_VERSION};
pub use sort::{compare_values, sort_records, Comparator, Normalizer, OrderBy, SortField};
pub use store::{CursorEntry, DatabaseState, ObjectStore};
pub use transaction::{ReadTransaction, WriteTransaction};

/// Type aliases for clarity
pub type DatabaseName = String;
pub type StoreName = String;
pub type IndexName = String;
pub type SchemaVersion = u32;
