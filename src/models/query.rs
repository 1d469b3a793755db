use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Converts a serializable record into a document.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(document))
}

/// Document filter, evaluated the same way by every store backend.
///
/// Paths are dotted (`staff.personId`) and descend through arrays, so a
/// condition on an array field holds when any element satisfies it.
/// A missing field compares equal to `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::NotIn(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => field_equals(document, field, expected),
            Filter::Ne(field, expected) => !field_equals(document, field, expected),
            Filter::In(field, values) => values.iter().any(|v| field_equals(document, field, v)),
            Filter::NotIn(field, values) => {
                !values.iter().any(|v| field_equals(document, field, v))
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
            Filter::Not(inner) => !inner.matches(document),
        }
    }
}

fn field_equals(document: &Document, path: &str, expected: &Value) -> bool {
    let found = resolve_path(document, path);
    if found.is_empty() {
        return expected.is_null();
    }
    found.into_iter().any(|value| match value {
        Value::Array(items) => {
            value == expected || items.iter().any(|item| values_equal(item, expected))
        }
        _ => values_equal(value, expected),
    })
}

// Integers read back from storage may come back as floats.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Resolves a dotted path, fanning out over arrays met along the way.
pub fn resolve_path<'a>(document: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let first = match segments.next().and_then(|key| document.get(key)) {
        Some(value) => value,
        None => return Vec::new(),
    };

    let mut current = vec![first];
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => next.extend(
                    items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .filter_map(|map| map.get(segment)),
                ),
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Field whitelist applied to returned documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Keeps top-level fields named in the projection (or prefixing a dotted entry).
    pub fn apply(&self, document: Document) -> Document {
        document
            .into_iter()
            .filter(|(key, _)| {
                self.fields.iter().any(|field| {
                    field == key || field.split('.').next().map_or(false, |head| head == key.as_str())
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn descending(field: &str) -> Self {
        SortSpec {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }

    pub fn ascending(field: &str) -> Self {
        SortSpec {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    /// Orders two documents by the sort field; documents lacking it always sort last.
    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        let a = resolve_path(left, &self.field).into_iter().next();
        let b = resolve_path(right, &self.field).into_iter().next();
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ordering = compare_values(a, b);
                match self.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Filter, sort, limit and project a set of documents.
///
/// Every backend funnels its reads through here so query semantics stay
/// identical regardless of where the documents live.
pub fn run_query<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    filter: &Filter,
    sort: Option<&SortSpec>,
    limit: Option<usize>,
    projection: Option<&Projection>,
) -> Vec<Document> {
    let mut selected: Vec<&Document> = documents
        .into_iter()
        .filter(|document| filter.matches(document))
        .collect();

    if let Some(sort) = sort {
        // stable sort keeps insertion order among equal keys
        selected.sort_by(|a, b| sort.compare(a, b));
    }

    selected
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|document| match projection {
            Some(projection) => projection.apply(document.clone()),
            None => document.clone(),
        })
        .collect()
}
