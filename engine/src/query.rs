//! The select pipeline: scan, filter, transform, sort, truncate.
//!
//! The scan is done by the store engine; [`run_pipeline`] applies the
//! remaining stages to the materialized records, in order and without
//! suspending. The join layer reuses the same pipeline for each side it
//! reads from storage.

use crate::sort::{sort_records, OrderBy};
use crate::{error::Result, Error, KeyRange, Record};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding which records survive the filter stage.
pub type Filter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Function replacing each surviving record.
pub type Transform = Arc<dyn Fn(Record) -> Record + Send + Sync>;

/// Options for a select.
#[derive(Clone)]
pub struct SelectOptions {
    /// Walk this index instead of the primary key
    pub index_name: Option<String>,
    /// Narrow the walk to keys in this range
    pub key_range: Option<KeyRange>,
    pub filter: Option<Filter>,
    pub transform: Option<Transform>,
    pub order_by: Option<OrderBy>,
    /// Direction for [`OrderBy::Field`]; defaults to `true`
    pub ascending: bool,
    /// Return only the first record (or none)
    pub first_only: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            index_name: None,
            key_range: None,
            filter: None,
            transform: None,
            order_by: None,
            ascending: true,
            first_only: false,
        }
    }
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.key_range = Some(range);
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Record) -> Record + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    pub fn descending(self) -> Self {
        self.ascending(false)
    }

    pub fn first_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(index) = &self.index_name {
            if index.trim().is_empty() {
                return Err(Error::contract("index name must not be blank"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SelectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOptions")
            .field("index_name", &self.index_name)
            .field("key_range", &self.key_range)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .field("order_by", &self.order_by)
            .field("ascending", &self.ascending)
            .field("first_only", &self.first_only)
            .finish()
    }
}

/// Result of a select: every record, or just the first one.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All(Vec<Record>),
    First(Option<Record>),
}

impl Selection {
    /// The records, as a sequence of zero or more.
    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Selection::All(records) => records,
            Selection::First(record) => record.into_iter().collect(),
        }
    }

    /// The first record, if any.
    pub fn into_first(self) -> Option<Record> {
        match self {
            Selection::All(records) => records.into_iter().next(),
            Selection::First(record) => record,
        }
    }

    /// JSON form: an array, a single record, or `null`.
    pub fn into_value(self) -> Value {
        match self {
            Selection::All(records) => Value::Array(records),
            Selection::First(record) => record.unwrap_or(Value::Null),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Selection::All(records) => records.len(),
            Selection::First(record) => usize::from(record.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply filter, transform, sort and truncation to scanned records.
pub fn run_pipeline(mut records: Vec<Record>, options: &SelectOptions) -> Selection {
    if let Some(filter) = &options.filter {
        records.retain(|record| filter(record));
    }

    if let Some(transform) = &options.transform {
        records = records.into_iter().map(|record| transform(record)).collect();
    }

    finish(
        records,
        options.order_by.as_ref(),
        options.ascending,
        options.first_only,
    )
}

/// Sort and truncation, shared with the join layer.
pub(crate) fn finish(
    mut records: Vec<Record>,
    order_by: Option<&OrderBy>,
    ascending: bool,
    first_only: bool,
) -> Selection {
    if let Some(order_by) = order_by {
        sort_records(&mut records, order_by, ascending);
    }

    if first_only {
        Selection::First(records.into_iter().next())
    } else {
        Selection::All(records)
    }
}
