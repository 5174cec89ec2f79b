//! noloco-client - Typed Rust client for the Noloco data platform.
//!
//! This crate provides:
//! - Schema-driven synthesis of request documents: nested selections,
//!   typed filter/sort/pagination arguments, and mutation arguments are
//!   derived from the project's fetched schema description.
//! - CRUD and CSV-export operations (`get`, `find`, `create`, `update`,
//!   `delete`, `export_csv`) with relationship includes to arbitrary depth.
//! - Result wrappers with cursor pagination that re-synthesizes the
//!   originating request at the paged collection's nesting depth.
//! - A one-shot schema refresh-and-retry on stale-schema failures.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]

mod client;
mod config;
mod document;
mod error;
mod mutation;
mod options;
mod result;
mod schema;
mod selection;

pub use client::{NolocoClient, NolocoClientBuilder};
pub use config::NolocoConfig;
pub use document::{assemble, build_operation_args, Operation};
pub use error::{
    HttpErrorInfo, NolocoError, QueryError, QueryErrorLocation, QueryPathSegment,
};
pub use mutation::{derive_args, MutationArgs};
pub use options::{
    annotate, change_where_to_lookup, flatten, has_upload, variables, CollectionOptions, Direction,
    FlatArg, FlattenedArgs, Include, IncludeTree, OrderBy, TypedInclude, TypedOptions, TypedValue,
};
pub use result::{
    wrap_result, CollectionResult, FieldValue, PageInfo, PaginationCallback, QueryResult,
    RecordResult,
};
pub use schema::{
    map_field_type, resolve_relationship, DataField, DataType, FieldType, RelationshipDirection,
    RelationshipKind, ResolvedRelationship, Schema,
};
pub use selection::compile_selection;
