//! Document assembler: stitches the operation-argument header, the root
//! argument bindings, and the compiled selection body into one request
//! document.
//!
//! Operation arguments declare the flattened (globally unique) variable
//! names; binding sites use the local argument names against those
//! variables, which is what lets `where`/`first`/`orderBy` recur at every
//! nesting level without collision.

use crate::error::NolocoError;
use crate::options::{FlattenedArgs, TypedOptions};
use crate::schema::{pascal_case, DataType, Schema};
use crate::selection::{
    compile_selection, render_binding, render_collection_fragment, render_object_fragment,
};

/// Fetches a project's API keys by portal name.
pub const PROJECT_API_KEYS_QUERY: &str = "query($projectId: String!) { \
     project(projectId: $projectId) { id name apiKeys { user project } } }";

/// Validates a project token and identifies the calling user.
pub const VALIDATE_API_KEYS_QUERY: &str = "query($projectToken: String!) { \
     validateApiKeys(projectToken: $projectToken) { user { id email } projectName } }";

/// Fetches the full schema description for a project.
pub const PROJECT_DATA_TYPES_QUERY: &str = "query($projectId: String!) { \
     project(projectId: $projectId) { id dataTypes { name fields { \
     name type unique required relationship reverseName } } } }";

/// The operation a document is synthesized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Single-record query.
    Get,
    /// Collection query.
    Find,
    /// Collection CSV export.
    ExportCsv,
    /// Create mutation.
    Create,
    /// Update mutation.
    Update,
    /// Delete mutation.
    Delete,
}

impl Operation {
    /// The root selection name, which doubles as the variable prefix.
    #[must_use]
    pub fn result_name(self, data_type_name: &str) -> String {
        match self {
            Self::Get => data_type_name.to_string(),
            Self::Find => format!("{data_type_name}Collection"),
            Self::ExportCsv => format!("{data_type_name}CsvExport"),
            Self::Create => format!("create{}", pascal_case(data_type_name)),
            Self::Update => format!("update{}", pascal_case(data_type_name)),
            Self::Delete => format!("delete{}", pascal_case(data_type_name)),
        }
    }

    /// Whether the document keyword is `mutation`.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }

    /// Whether the root result carries the paginated collection shape.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Find)
    }
}

/// Render the operation-argument declaration header, empty when there are
/// no arguments.
#[must_use]
pub fn build_operation_args(flat: &FlattenedArgs) -> String {
    if flat.is_empty() {
        return String::new();
    }
    let declarations: Vec<String> = flat
        .iter()
        .map(|(name, arg)| format!("${name}: {}", arg.gql_type))
        .collect();
    format!("({})", declarations.join(", "))
}

/// Assemble a complete request document.
///
/// The CSV export bypasses the selection compiler and returns only the
/// `base64` scalar; mutations reuse the compiler against the post-mutation
/// return shape.
pub fn assemble(
    operation: Operation,
    data_type: &DataType,
    schema: &Schema,
    typed: &TypedOptions,
    flat: &FlattenedArgs,
) -> Result<String, NolocoError> {
    let root_name = operation.result_name(&data_type.name);
    let operation_args = build_operation_args(flat);
    let binding = render_binding(&root_name, typed);

    let fragment = if operation == Operation::ExportCsv {
        render_object_fragment(&root_name, &binding, "base64")
    } else {
        let body = compile_selection(data_type, schema, typed, &root_name)?;
        if operation.is_collection() {
            render_collection_fragment(&root_name, &binding, &body)
        } else {
            render_object_fragment(&root_name, &binding, &body)
        }
    };

    let keyword = if operation.is_mutation() {
        "mutation"
    } else {
        "query"
    };
    Ok(format!("{keyword}{operation_args} {{\n{fragment}\n}}"))
}
