//! Error types for the Noloco client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP error information captured from reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorInfo {
    /// Error message.
    pub message: String,
    /// HTTP status code (if available).
    pub status_code: Option<u16>,
    /// Whether the error was a timeout.
    pub is_timeout: bool,
    /// Whether the error was a connection failure.
    pub is_connect: bool,
}

impl From<reqwest::Error> for HttpErrorInfo {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|status| status.as_u16()),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
        }
    }
}

/// Location of a query error within the document (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryErrorLocation {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

/// Path segment within the response where a query error occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

/// Query-level error reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    /// Human-readable error message.
    pub message: String,
    /// Location(s) within the document.
    #[serde(default)]
    pub locations: Vec<QueryErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default)]
    pub path: Vec<QueryPathSegment>,
    /// Extensions metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// Error type for Noloco client operations.
#[derive(Debug, Clone, Error)]
pub enum NolocoError {
    /// No data type with the given name exists in the project schema.
    #[error("data type {name} was not found in the project schema")]
    DataTypeNotFound {
        /// Requested data type name.
        name: String,
    },

    /// No field with the given name exists on the data type.
    #[error("field {field} was not found on data type {data_type}")]
    FieldNotFound {
        /// Owning data type name.
        data_type: String,
        /// Requested field name.
        field: String,
    },

    /// A relationship name could not be resolved forward or in reverse.
    #[error("relationship {relationship} could not be resolved from data type {data_type}")]
    RelationshipNotFound {
        /// Data type the relationship was referenced from.
        data_type: String,
        /// Requested relationship name.
        relationship: String,
    },

    /// More than one reverse field matches the relationship name.
    #[error(
        "relationship {relationship} on data type {data_type} matches more than one \
         reverse field: {candidates:?}"
    )]
    RelationshipAmbiguous {
        /// Data type the relationship was referenced from.
        data_type: String,
        /// Requested relationship name.
        relationship: String,
        /// Data types declaring a matching reverse field.
        candidates: Vec<String>,
    },

    /// A single-valued relationship was given a multi-record connection.
    #[error("field {field} on data type {data_type} connects a single record")]
    InvalidSingleFieldConnection {
        /// Owning data type name.
        data_type: String,
        /// Relationship field name.
        field: String,
    },

    /// A multi-valued relationship was given a non-list connection.
    #[error("field {field} on data type {data_type} connects a list of records")]
    InvalidMultiFieldConnection {
        /// Owning data type name.
        data_type: String,
        /// Relationship field name.
        field: String,
    },

    /// A non-unique field was used as a single-record lookup.
    #[error("field {field} on data type {data_type} is not unique and cannot be looked up by")]
    FieldNotUnique {
        /// Owning data type name.
        data_type: String,
        /// Field name.
        field: String,
    },

    /// The lookup predicate is not a single-field equals comparison.
    #[error("unsupported lookup predicate on data type {data_type}: {detail}")]
    UnsupportedLookupPredicate {
        /// Data type being looked up.
        data_type: String,
        /// What was wrong with the predicate.
        detail: String,
    },

    /// The schema declares a field type this client does not recognize.
    #[error("field {field} on data type {data_type} has unsupported type {found}")]
    UnsupportedFieldType {
        /// Owning data type name.
        data_type: String,
        /// Field name.
        field: String,
        /// The declared type name.
        found: String,
    },

    /// The account API key was rejected.
    #[error("account API key did not authenticate for portal {portal}: {message}")]
    AccountApiKey {
        /// Portal name.
        portal: String,
        /// Underlying failure.
        message: String,
    },

    /// The project API key could not be validated.
    #[error("project API key could not be validated for portal {portal}: {message}")]
    ProjectApiKey {
        /// Portal name.
        portal: String,
        /// Underlying failure.
        message: String,
    },

    /// Query-level errors returned by the platform.
    #[error("query errors: {errors:?}")]
    Query {
        /// Query error list.
        errors: Vec<QueryError>,
    },

    /// HTTP/network error.
    #[error("HTTP error: {0:?}")]
    Http(HttpErrorInfo),

    /// HTTP response status error.
    #[error("HTTP status {status} with body: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated if needed).
        body: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),

    /// A file referenced by an upload argument could not be read.
    #[error("could not read upload {path}: {message}")]
    Upload {
        /// File path the caller supplied.
        path: String,
        /// Underlying I/O failure.
        message: String,
    },

    /// Protocol violation in a platform response.
    #[error("protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },
}

impl From<reqwest::Error> for NolocoError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(HttpErrorInfo::from(err))
    }
}

impl From<serde_json::Error> for NolocoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl NolocoError {
    /// Returns `true` for failures that a schema refresh may resolve.
    ///
    /// Covers lookups against the cached schema description and query-level
    /// rejections from the platform, both of which indicate the cached
    /// schema may be stale. The enclosing operation refreshes the schema
    /// and retries exactly once on these.
    #[must_use]
    pub const fn is_schema_stale(&self) -> bool {
        matches!(
            self,
            Self::DataTypeNotFound { .. }
                | Self::FieldNotFound { .. }
                | Self::RelationshipNotFound { .. }
                | Self::Query { .. }
        )
    }

    /// Returns `true` for caller-input faults that must never be retried.
    #[must_use]
    pub const fn is_argument_shape(&self) -> bool {
        matches!(
            self,
            Self::InvalidSingleFieldConnection { .. }
                | Self::InvalidMultiFieldConnection { .. }
                | Self::FieldNotUnique { .. }
                | Self::UnsupportedLookupPredicate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lookup_errors_are_stale() {
        let err = NolocoError::DataTypeNotFound {
            name: "user".to_string(),
        };
        assert!(err.is_schema_stale());

        let err = NolocoError::Query { errors: vec![] };
        assert!(err.is_schema_stale());
    }

    #[test]
    fn argument_shape_errors_are_not_stale() {
        let err = NolocoError::InvalidSingleFieldConnection {
            data_type: "user".to_string(),
            field: "company".to_string(),
        };
        assert!(!err.is_schema_stale());
        assert!(err.is_argument_shape());
    }

    #[test]
    fn ambiguous_relationship_is_not_retried() {
        let err = NolocoError::RelationshipAmbiguous {
            data_type: "user".to_string(),
            relationship: "tasksCollection".to_string(),
            candidates: vec!["task".to_string(), "ticket".to_string()],
        };
        assert!(!err.is_schema_stale());
    }

    #[test]
    fn query_error_deserializes_with_defaults() {
        let err: QueryError = serde_json::from_str(r#"{"message": "boom"}"#).expect("parse");
        assert_eq!(err.message, "boom");
        assert!(err.locations.is_empty());
        assert!(err.path.is_empty());
    }
}
