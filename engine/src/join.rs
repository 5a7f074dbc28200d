//! In-memory joins over selected records.
//!
//! Both join kinds fan out on the right: a left record with N matches yields
//! N output records. They differ only for left records without a match,
//! which an inner join drops and a left join passes through unmodified.
//!
//! Field values match under [`loose_equals`](crate::loose_equals): null
//! matches null, comparison is case-insensitive, and numbers match their
//! string form.

use crate::query::Filter;
use crate::sort::OrderBy;
use crate::{error::Result, field_value, loose_string, merged, Error, Record, StoreName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Function building one output record from a matched pair.
pub type MergeFn = Arc<dyn Fn(&Record, &Record) -> Record + Send + Sync>;

/// How a matched (left, right) pair becomes one output record.
#[derive(Clone, Default)]
pub enum MergePolicy {
    /// A new record with the left fields overlaid by the right fields
    #[default]
    Merge,
    /// The left record, unmodified
    LeftOnly,
    /// Whatever the function returns
    With(MergeFn),
}

impl MergePolicy {
    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&Record, &Record) -> Record + Send + Sync + 'static,
    {
        MergePolicy::With(Arc::new(f))
    }

    /// Combine one matched pair. Neither input is modified.
    pub fn apply(&self, left: &Record, right: &Record) -> Record {
        match self {
            MergePolicy::Merge => merged(left, right),
            MergePolicy::LeftOnly => left.clone(),
            MergePolicy::With(f) => f(left, right),
        }
    }
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Merge => f.write_str("Merge"),
            MergePolicy::LeftOnly => f.write_str("LeftOnly"),
            MergePolicy::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Options for joining two stores.
#[derive(Clone)]
pub struct JoinOptions {
    pub left_store: StoreName,
    pub left_field: String,
    pub right_store: StoreName,
    pub right_field: String,
    pub left_filter: Option<Filter>,
    pub right_filter: Option<Filter>,
    pub merge: MergePolicy,
    pub order_by: Option<OrderBy>,
    pub ascending: bool,
    pub first_only: bool,
}

impl JoinOptions {
    /// Join `left_store.left_field` to `right_store.right_field`.
    pub fn new(
        left_store: impl Into<StoreName>,
        left_field: impl Into<String>,
        right_store: impl Into<StoreName>,
        right_field: impl Into<String>,
    ) -> Self {
        Self {
            left_store: left_store.into(),
            left_field: left_field.into(),
            right_store: right_store.into(),
            right_field: right_field.into(),
            left_filter: None,
            right_filter: None,
            merge: MergePolicy::default(),
            order_by: None,
            ascending: true,
            first_only: false,
        }
    }

    pub fn left_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.left_filter = Some(Arc::new(f));
        self
    }

    pub fn right_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.right_filter = Some(Arc::new(f));
        self
    }

    pub fn merge(mut self, policy: MergePolicy) -> Self {
        self.merge = policy;
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn first_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        require_store(&self.left_store)?;
        require_store(&self.right_store)?;
        require_path("left join field", &self.left_field)?;
        require_path("right join field", &self.right_field)
    }
}

/// Options for joining a store against a caller-supplied array.
#[derive(Clone)]
pub struct ArrayJoinOptions {
    /// Field of the store records to match on
    pub db_field: String,
    /// Field of the array items to match on; `None` matches the items
    /// themselves
    pub array_field: Option<String>,
    pub join_array: Vec<Record>,
    pub store_filter: Option<Filter>,
    pub merge: MergePolicy,
    pub order_by: Option<OrderBy>,
    pub ascending: bool,
    pub first_only: bool,
}

impl ArrayJoinOptions {
    /// Match `db_field` of each store record against the items of
    /// `join_array`.
    pub fn new(db_field: impl Into<String>, join_array: Vec<Record>) -> Self {
        Self {
            db_field: db_field.into(),
            array_field: None,
            join_array,
            store_filter: None,
            merge: MergePolicy::default(),
            order_by: None,
            ascending: true,
            first_only: false,
        }
    }

    pub fn array_field(mut self, field: impl Into<String>) -> Self {
        self.array_field = Some(field.into());
        self
    }

    pub fn store_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.store_filter = Some(Arc::new(f));
        self
    }

    pub fn merge(mut self, policy: MergePolicy) -> Self {
        self.merge = policy;
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn first_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        require_path("db field", &self.db_field)?;
        match &self.array_field {
            Some(field) => require_path("array field", field),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for JoinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinOptions")
            .field("left", &format_args!("{}.{}", self.left_store, self.left_field))
            .field("right", &format_args!("{}.{}", self.right_store, self.right_field))
            .field("left_filter", &self.left_filter.is_some())
            .field("right_filter", &self.right_filter.is_some())
            .field("merge", &self.merge)
            .field("order_by", &self.order_by)
            .field("ascending", &self.ascending)
            .field("first_only", &self.first_only)
            .finish()
    }
}

impl fmt::Debug for ArrayJoinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayJoinOptions")
            .field("db_field", &self.db_field)
            .field("array_field", &self.array_field)
            .field("join_array", &self.join_array.len())
            .field("store_filter", &self.store_filter.is_some())
            .field("merge", &self.merge)
            .field("order_by", &self.order_by)
            .field("ascending", &self.ascending)
            .field("first_only", &self.first_only)
            .finish()
    }
}

fn require_store(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::contract("store name must not be blank"));
    }
    Ok(())
}

fn require_path(what: &str, path: &str) -> Result<()> {
    if path.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(Error::contract(format!("{} '{}' is not a field path", what, path)));
    }
    Ok(())
}

/// Join key: the lowercased loose string, `None` for null or missing.
fn match_key(value: Option<&Record>) -> Option<String> {
    loose_string(value).map(|s| s.to_lowercase())
}

/// Inner join: one output record per matched pair, in left-then-right order.
pub fn inner_join(
    left: &[Record],
    right: &[Record],
    left_field: &str,
    right_field: Option<&str>,
    merge: &MergePolicy,
) -> Vec<Record> {
    join(left, right, left_field, right_field, merge, false)
}

/// Left join: like [`inner_join`], but left records without a match appear
/// once, unmodified.
pub fn left_join(
    left: &[Record],
    right: &[Record],
    left_field: &str,
    right_field: Option<&str>,
    merge: &MergePolicy,
) -> Vec<Record> {
    join(left, right, left_field, right_field, merge, true)
}

fn join(
    left: &[Record],
    right: &[Record],
    left_field: &str,
    right_field: Option<&str>,
    merge: &MergePolicy,
    keep_unmatched: bool,
) -> Vec<Record> {
    // Buckets hold right records in encounter order
    let mut buckets: HashMap<Option<String>, Vec<&Record>> = HashMap::new();
    for item in right {
        let value = match right_field {
            Some(field) => field_value(item, field),
            None => Some(item),
        };
        buckets.entry(match_key(value)).or_default().push(item);
    }

    let mut out = Vec::new();
    for item in left {
        match buckets.get(&match_key(field_value(item, left_field))) {
            Some(matches) => out.extend(matches.iter().map(|other| merge.apply(item, other))),
            None if keep_unmatched => out.push(item.clone()),
            None => {}
        }
    }
    out
}
