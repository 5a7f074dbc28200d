//! Error types for the keyshelf engine.

use crate::{DatabaseName, SchemaVersion, StoreName};
use thiserror::Error;

/// All possible errors from the keyshelf engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Connection errors
    #[error("database '{database}' is blocked by {open_connections} open connection(s)")]
    Blocked {
        database: DatabaseName,
        open_connections: usize,
    },

    #[error("cannot open database '{database}' at version {requested}: stored version is {current}")]
    VersionTooLow {
        database: DatabaseName,
        requested: SchemaVersion,
        current: SchemaVersion,
    },

    #[error("failed to open database '{database}': {reason}")]
    Open {
        database: DatabaseName,
        reason: String,
    },

    // Schema errors
    #[error("cannot create store '{store}': {reason}")]
    Schema { store: StoreName, reason: String },

    // Transaction errors
    #[error("{operation} transaction {outcome} at {store}.{key_path}: {cause}")]
    Transaction {
        operation: String,
        outcome: TxOutcome,
        store: StoreName,
        key_path: String,
        cause: TxCause,
    },

    // Caller errors
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("store not found: {0}")]
    StoreNotFound(StoreName),

    #[error("primary key not found for store {0}")]
    PrimaryKeyNotFound(StoreName),
}

/// How a failed transaction ended.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The transaction was rolled back before commit.
    #[error("abort")]
    Abort,
    /// A request inside the transaction failed.
    #[error("error")]
    Error,
}

/// The underlying failure inside a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxCause {
    /// A unique index would hold the same key twice.
    #[error("ConstraintError: {0}")]
    Constraint(String),
    /// A record did not yield a valid key for the store's key path.
    #[error("DataError: {0}")]
    Data(String),
    /// The named index does not exist on the store.
    #[error("NotFoundError: no index named '{0}'")]
    IndexNotFound(String),
    /// The committed state could not be written to disk.
    #[error("UnknownError: {0}")]
    Persist(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Schema,
    Transaction,
    ContractViolation,
    NotFound,
}

impl Error {
    /// The taxonomy class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Blocked { .. } | Error::VersionTooLow { .. } | Error::Open { .. } => {
                ErrorKind::Connection
            }
            Error::Schema { .. } => ErrorKind::Schema,
            Error::Transaction { .. } => ErrorKind::Transaction,
            Error::ContractViolation(_) => ErrorKind::ContractViolation,
            Error::StoreNotFound(_) | Error::PrimaryKeyNotFound(_) => ErrorKind::NotFound,
        }
    }

    pub(crate) fn schema(store: impl Into<StoreName>, reason: impl Into<String>) -> Self {
        Error::Schema {
            store: store.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        Error::ContractViolation(msg.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
