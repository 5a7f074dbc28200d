//! Ordering of result sequences.
//!
//! [`sort_records`] sorts by one field, by several fields, by a caller
//! comparator, or by the natural string order of each item. All modes use a
//! stable sort, so items that compare equal keep their encounter order.

use crate::{field_value, loose_string, Record};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied comparator over two records.
pub type Comparator = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Per-field value conversion applied to both sides before comparing.
pub type Normalizer = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// How to order a result sequence.
#[derive(Clone)]
pub enum OrderBy {
    /// One field; string values compare case-insensitively. Honors the
    /// `ascending` flag.
    Field(String),
    /// Several fields, left to right, first difference wins. Each field
    /// carries its own direction; the `ascending` flag is ignored.
    Fields(Vec<SortField>),
    /// Full control. The `ascending` flag is ignored.
    Comparator(Comparator),
    /// Natural string order of the items themselves, for sequences of
    /// primitives.
    Natural,
}

impl OrderBy {
    /// Order by a caller comparator.
    pub fn comparator<F>(f: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    {
        OrderBy::Comparator(Arc::new(f))
    }
}

impl fmt::Debug for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBy::Field(name) => f.debug_tuple("Field").field(name).finish(),
            OrderBy::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            OrderBy::Comparator(_) => f.write_str("Comparator(..)"),
            OrderBy::Natural => f.write_str("Natural"),
        }
    }
}

impl From<&str> for OrderBy {
    fn from(field: &str) -> Self {
        OrderBy::Field(field.to_string())
    }
}

impl From<String> for OrderBy {
    fn from(field: String) -> Self {
        OrderBy::Field(field)
    }
}

impl From<Vec<SortField>> for OrderBy {
    fn from(fields: Vec<SortField>) -> Self {
        OrderBy::Fields(fields)
    }
}

/// One field of a multi-field ordering.
#[derive(Clone)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
    normalize: Option<Normalizer>,
}

impl SortField {
    /// Ascending on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
            normalize: None,
        }
    }

    /// Descending on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            descending: true,
            ..Self::asc(field)
        }
    }

    /// Convert both values with `f` before comparing.
    pub fn normalized<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        self.normalize = Some(Arc::new(f));
        self
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let left = field_value(a, &self.field);
        let right = field_value(b, &self.field);

        let ordering = match &self.normalize {
            Some(normalize) => compare_values(Some(&normalize(left)), Some(&normalize(right))),
            None => compare_values(left, right),
        };

        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl fmt::Debug for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortField")
            .field("field", &self.field)
            .field("descending", &self.descending)
            .field("normalized", &self.normalize.is_some())
            .finish()
    }
}

impl From<&str> for SortField {
    fn from(field: &str) -> Self {
        SortField::asc(field)
    }
}

/// Sort records in place.
pub fn sort_records(records: &mut [Record], order_by: &OrderBy, ascending: bool) {
    match order_by {
        OrderBy::Field(field) => records.sort_by(|a, b| {
            let ordering = compare_folded(field_value(a, field), field_value(b, field));
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }),
        OrderBy::Fields(fields) => records.sort_by(|a, b| {
            fields
                .iter()
                .map(|field| field.compare(a, b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        OrderBy::Comparator(compare) => records.sort_by(|a, b| compare(a, b)),
        OrderBy::Natural => records.sort_by_cached_key(natural_key),
    }
}

/// Total order over optional JSON values.
///
/// Values of different kinds order by kind: missing or null, then booleans,
/// numbers, strings, arrays and objects. Within a kind values compare
/// naturally; arrays element-wise, objects by their serialized text.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return kind_rank(a).cmp(&kind_rank(b)),
    };

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => kind_rank(Some(a)).cmp(&kind_rank(Some(b))),
    }
}

/// Like [`compare_values`] but strings compare lowercased.
fn compare_folded(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        _ => compare_values(a, b),
    }
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn natural_key(value: &Record) -> String {
    loose_string(Some(value)).unwrap_or_else(|| "null".to_string())
}
