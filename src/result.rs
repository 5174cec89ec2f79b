//! Result wrappers: navigable records and paginated collections.
//!
//! Raw response maps are wrapped recursively; any nested object carrying
//! the `edges` collection shape becomes a [`CollectionResult`] with
//! pagination helpers. Paging re-invokes the whole synthesis pipeline
//! through a callback with the collection's cursor substituted at its
//! exact nesting depth, every other option untouched.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NolocoError;
use crate::options::{CollectionOptions, Include};

/// Re-invokes the originating operation with rewritten options.
pub type PaginationCallback =
    Arc<dyn Fn(CollectionOptions) -> BoxFuture<'static, Result<QueryResult, NolocoError>> + Send + Sync>;

/// Cursor position info for a collection page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    /// Whether a previous page exists.
    pub has_previous_page: bool,
    /// Whether a next page exists.
    pub has_next_page: bool,
    /// Cursor of the first edge.
    pub start_cursor: Option<String>,
    /// Cursor of the last edge.
    pub end_cursor: Option<String>,
}

/// A wrapped root result: the addressed record or collection.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Single record.
    Record(RecordResult),
    /// Paginated collection.
    Collection(CollectionResult),
}

impl QueryResult {
    /// The record, if this result is one.
    #[must_use]
    pub fn into_record(self) -> Option<RecordResult> {
        match self {
            Self::Record(record) => Some(record),
            Self::Collection(_) => None,
        }
    }

    /// The collection, if this result is one.
    #[must_use]
    pub fn into_collection(self) -> Option<CollectionResult> {
        match self {
            Self::Collection(collection) => Some(collection),
            Self::Record(_) => None,
        }
    }
}

/// A field value on a wrapped record.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Plain value.
    Scalar(Value),
    /// Nested single record.
    Record(RecordResult),
    /// Nested paginated collection.
    Collection(CollectionResult),
}

/// A single wrapped record.
#[derive(Debug, Clone)]
pub struct RecordResult {
    fields: IndexMap<String, FieldValue>,
}

impl RecordResult {
    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Look up a plain field value.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.field(name)? {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Look up a nested record.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&RecordResult> {
        match self.field(name)? {
            FieldValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Look up a nested collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionResult> {
        match self.field(name)? {
            FieldValue::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Field names in response order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[derive(Clone)]
struct PaginationContext {
    /// Options the root operation was invoked with.
    options: CollectionOptions,
    /// Include chain from the root result down to this collection.
    path: Vec<String>,
    callback: Option<PaginationCallback>,
}

impl fmt::Debug for PaginationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationContext")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A wrapped paginated collection.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    /// Total number of records matching the query.
    pub total_count: Option<u64>,
    /// Records on this page.
    pub items: Vec<RecordResult>,
    /// Cursor position info.
    pub page_info: PageInfo,
    context: PaginationContext,
}

enum CursorMove {
    After(String),
    Before(String),
}

impl CollectionResult {
    /// Fetch the next page, or `None` when there is none (or the result
    /// was not produced by a pageable query).
    pub async fn next_page(&self) -> Result<Option<CollectionResult>, NolocoError> {
        if !self.page_info.has_next_page {
            return Ok(None);
        }
        let Some(cursor) = self.page_info.end_cursor.clone() else {
            return Ok(None);
        };
        self.turn_page(CursorMove::After(cursor)).await
    }

    /// Fetch the previous page, or `None` when there is none.
    pub async fn previous_page(&self) -> Result<Option<CollectionResult>, NolocoError> {
        if !self.page_info.has_previous_page {
            return Ok(None);
        }
        let Some(cursor) = self.page_info.start_cursor.clone() else {
            return Ok(None);
        };
        self.turn_page(CursorMove::Before(cursor)).await
    }

    async fn turn_page(&self, cursor: CursorMove) -> Result<Option<CollectionResult>, NolocoError> {
        let Some(callback) = self.context.callback.clone() else {
            return Ok(None);
        };
        let mut options = self.context.options.clone();
        {
            let node = options_at(&mut options, &self.context.path);
            match cursor {
                CursorMove::After(cursor) => {
                    node.before = None;
                    node.after = Some(cursor);
                }
                CursorMove::Before(cursor) => {
                    node.after = None;
                    node.before = Some(cursor);
                }
            }
        }
        let result = callback(options).await?;
        Ok(descend(result, &self.context.path))
    }
}

/// Navigate to the options node at an include path, materializing nested
/// nodes for bare include markers along the way.
fn options_at<'a>(options: &'a mut CollectionOptions, path: &[String]) -> &'a mut CollectionOptions {
    let mut node = options;
    for segment in path {
        let entry = node
            .include
            .entry(segment.clone())
            .or_insert_with(|| Include::Nested(Box::default()));
        if matches!(entry, Include::All) {
            *entry = Include::Nested(Box::default());
        }
        // After the normalization above, every entry is `Nested`, so descend
        // into it. This is the sole reborrow path out of the loop body.
        match entry {
            Include::Nested(nested) => node = nested.as_mut(),
            Include::All => unreachable!("entry normalized to Nested above"),
        }
    }
    node
}

/// Walk a fresh root result down to the collection at `path`.
fn descend(result: QueryResult, path: &[String]) -> Option<CollectionResult> {
    if path.is_empty() {
        return result.into_collection();
    }
    let QueryResult::Record(mut record) = result else {
        return None;
    };
    for (depth, segment) in path.iter().enumerate() {
        let value = record.fields.shift_remove(segment)?;
        match value {
            FieldValue::Record(nested) if depth + 1 < path.len() => record = nested,
            FieldValue::Collection(collection) if depth + 1 == path.len() => {
                return Some(collection);
            }
            _ => return None,
        }
    }
    None
}

fn wrap_record(
    object: serde_json::Map<String, Value>,
    options: &CollectionOptions,
    path: &[String],
    callback: Option<&PaginationCallback>,
) -> RecordResult {
    let mut fields = IndexMap::new();
    for (name, value) in object {
        let wrapped = match value {
            Value::Object(nested) => {
                let child_path: Vec<String> =
                    path.iter().cloned().chain([name.clone()]).collect();
                if nested.contains_key("edges") {
                    FieldValue::Collection(wrap_collection(nested, options, &child_path, callback))
                } else {
                    FieldValue::Record(wrap_record(nested, options, &child_path, callback))
                }
            }
            other => FieldValue::Scalar(other),
        };
        fields.insert(name, wrapped);
    }
    RecordResult { fields }
}

fn wrap_collection(
    object: serde_json::Map<String, Value>,
    options: &CollectionOptions,
    path: &[String],
    callback: Option<&PaginationCallback>,
) -> CollectionResult {
    let total_count = object.get("totalCount").and_then(Value::as_u64);
    let page_info = object
        .get("pageInfo")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let mut items = Vec::new();
    if let Some(edges) = object.get("edges").and_then(Value::as_array) {
        for edge in edges {
            if let Some(Value::Object(node)) = edge.get("node").cloned() {
                items.push(wrap_record(node, options, path, callback));
            }
        }
    }

    CollectionResult {
        total_count,
        items,
        page_info,
        context: PaginationContext {
            options: options.clone(),
            path: path.to_vec(),
            callback: callback.cloned(),
        },
    }
}

/// Wrap the raw value under a document's root selection name.
///
/// `options` are the root operation's original (unflattened) options;
/// `callback` re-invokes that operation for pagination, or `None` when the
/// result is not pageable (mutation returns).
pub fn wrap_result(
    raw: Value,
    options: &CollectionOptions,
    callback: Option<PaginationCallback>,
) -> Result<QueryResult, NolocoError> {
    let Value::Object(object) = raw else {
        return Err(NolocoError::Protocol {
            message: "result root is not an object".to_string(),
        });
    };
    let callback = callback.as_ref();
    if object.contains_key("edges") {
        Ok(QueryResult::Collection(wrap_collection(
            object,
            options,
            &[],
            callback,
        )))
    } else {
        Ok(QueryResult::Record(wrap_record(object, options, &[], callback)))
    }
}
