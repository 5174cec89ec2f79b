//! Collection options, typed argument maps, and the option flattener.
//!
//! Caller-supplied options are annotated into a tree of typed arguments
//! keyed by their local names (`where`, `orderBy`, ...), then flattened
//! into one globally-unique, order-stable variable map for the document
//! header and the transport bindings. Flattening is a pure pre-order
//! projection: every leaf appears exactly once under its underscore-joined
//! path, so the same local name can recur at every nesting level.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NolocoError;
use crate::schema::{map_field_type, pascal_case, resolve_relationship, DataType, Schema};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Collection ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort by.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

/// One entry in a selection tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Include {
    /// Include the relationship with no nested selection or options.
    All,
    /// Include the relationship with its own nested selection and options.
    Nested(Box<CollectionOptions>),
}

/// Insertion-ordered selection tree: relationship name to include entry.
pub type IncludeTree = IndexMap<String, Include>;

/// Options for addressing a record or collection.
///
/// `filter` is rendered as the platform's `where` argument. `after` and
/// `before` are mutually exclusive opaque cursors; `after` wins when both
/// are set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionOptions {
    /// Cursor to paginate after.
    pub after: Option<String>,
    /// Cursor to paginate before (ignored when `after` is set).
    pub before: Option<String>,
    /// Page size.
    pub first: Option<i64>,
    /// Sort order.
    pub order_by: Option<OrderBy>,
    /// Filter predicate (the `where` argument).
    pub filter: Option<Value>,
    /// Relationships to include, in selection order.
    pub include: IncludeTree,
}

impl CollectionOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `after` cursor.
    #[must_use]
    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    /// Set the `before` cursor.
    #[must_use]
    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_first(mut self, first: i64) -> Self {
        self.first = Some(first);
        self
    }

    /// Set the sort order.
    #[must_use]
    pub fn with_order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Set the filter predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a relationship to the selection.
    #[must_use]
    pub fn with_include(mut self, name: impl Into<String>, include: Include) -> Self {
        self.include.insert(name.into(), include);
        self
    }
}

/// An argument carrying its request type name and runtime value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    /// Request type name, e.g. `UserWhereInput`.
    pub gql_type: String,
    /// Runtime value bound to the argument.
    pub value: Value,
}

impl TypedValue {
    /// Create a typed argument value.
    #[must_use]
    pub fn new(gql_type: impl Into<String>, value: Value) -> Self {
        Self {
            gql_type: gql_type.into(),
            value,
        }
    }
}

/// A typed include entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedInclude {
    /// Bare include marker, contributing no arguments.
    All,
    /// Nested node with its own typed options.
    Nested(TypedOptions),
}

/// The annotated, tree-shaped option map driving selection compilation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedOptions {
    /// Local arguments at this level, in insertion order.
    pub args: IndexMap<String, TypedValue>,
    /// Included relationships at this level, in selection order.
    pub include: IndexMap<String, TypedInclude>,
}

/// Annotate caller options against the data type they address.
///
/// Filter/sort/pagination types are always derived from the type actually
/// being filtered, so nested includes recurse with the relationship's
/// target type.
pub fn annotate(
    data_type: &DataType,
    schema: &Schema,
    options: &CollectionOptions,
) -> Result<TypedOptions, NolocoError> {
    let mut typed = TypedOptions::default();

    if let Some(after) = &options.after {
        typed
            .args
            .insert("after".to_string(), TypedValue::new("String", Value::from(after.clone())));
    } else if let Some(before) = &options.before {
        typed
            .args
            .insert("before".to_string(), TypedValue::new("String", Value::from(before.clone())));
    }
    if let Some(first) = options.first {
        typed
            .args
            .insert("first".to_string(), TypedValue::new("Int", Value::from(first)));
    }
    if let Some(order_by) = &options.order_by {
        typed.args.insert(
            "orderBy".to_string(),
            TypedValue::new("OrderBy", serde_json::to_value(order_by)?),
        );
    }
    if let Some(filter) = &options.filter {
        let where_type = format!("{}WhereInput", pascal_case(&data_type.name));
        typed
            .args
            .insert("where".to_string(), TypedValue::new(where_type, filter.clone()));
    }

    for (name, include) in &options.include {
        let entry = match include {
            Include::All => TypedInclude::All,
            Include::Nested(nested) => {
                let resolved = resolve_relationship(name, data_type, schema)?;
                TypedInclude::Nested(annotate(resolved.data_type, schema, nested)?)
            }
        };
        typed.include.insert(name.clone(), entry);
    }

    Ok(typed)
}

/// Rewrite a single-record `where` predicate into a direct lookup argument.
///
/// Expects exactly one field with an `equals` comparison; the field's own
/// type (or `id_type` for the `id` field) becomes the argument type and the
/// `where`/`equals` wrapper is discarded. Non-`id` fields must be declared
/// unique.
pub fn change_where_to_lookup(
    data_type: &DataType,
    typed: &mut TypedOptions,
    id_type: &str,
) -> Result<(), NolocoError> {
    let Some(where_arg) = typed.args.shift_remove("where") else {
        return Ok(());
    };

    let Value::Object(predicate) = where_arg.value else {
        return Err(NolocoError::UnsupportedLookupPredicate {
            data_type: data_type.name.clone(),
            detail: "predicate must be an object".to_string(),
        });
    };
    if predicate.len() != 1 {
        return Err(NolocoError::UnsupportedLookupPredicate {
            data_type: data_type.name.clone(),
            detail: format!("expected exactly one field, got {}", predicate.len()),
        });
    }
    let Some((field_name, comparison)) = predicate.into_iter().next() else {
        return Err(NolocoError::UnsupportedLookupPredicate {
            data_type: data_type.name.clone(),
            detail: "empty predicate".to_string(),
        });
    };

    let Value::Object(mut comparison) = comparison else {
        return Err(NolocoError::UnsupportedLookupPredicate {
            data_type: data_type.name.clone(),
            detail: format!("comparison for {field_name} must be an object"),
        });
    };
    let value = match (comparison.remove("equals"), comparison.is_empty()) {
        (Some(value), true) => value,
        _ => {
            return Err(NolocoError::UnsupportedLookupPredicate {
                data_type: data_type.name.clone(),
                detail: format!("only a single `equals` comparison is supported for {field_name}"),
            });
        }
    };

    let gql_type = if field_name == "id" {
        id_type.to_string()
    } else {
        let field = data_type.field(&field_name)?;
        if !field.unique {
            return Err(NolocoError::FieldNotUnique {
                data_type: data_type.name.clone(),
                field: field_name,
            });
        }
        map_field_type(data_type, field, false)?
    };

    typed.args.insert(field_name, TypedValue::new(gql_type, value));
    Ok(())
}

/// A flattened argument: globally unique variable, local binding name.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatArg {
    /// Local argument name at its binding site.
    pub local: String,
    /// Request type name.
    pub gql_type: String,
    /// Runtime value.
    pub value: Value,
}

/// Flat variable map in pre-order traversal order.
pub type FlattenedArgs = IndexMap<String, FlatArg>;

/// Flatten a typed option tree into a globally-unique variable map.
///
/// Each argument is keyed `prefix_local`; nested includes recurse with
/// `prefix_relationshipName`. Bare include markers contribute nothing.
#[must_use]
pub fn flatten(prefix: &str, typed: &TypedOptions) -> FlattenedArgs {
    let mut flat = FlattenedArgs::new();
    flatten_into(prefix, typed, &mut flat);
    flat
}

fn flatten_into(prefix: &str, typed: &TypedOptions, out: &mut FlattenedArgs) {
    for (name, arg) in &typed.args {
        out.insert(
            format!("{prefix}_{name}"),
            FlatArg {
                local: name.clone(),
                gql_type: arg.gql_type.clone(),
                value: arg.value.clone(),
            },
        );
    }
    for (name, include) in &typed.include {
        if let TypedInclude::Nested(nested) = include {
            flatten_into(&format!("{prefix}_{name}"), nested, out);
        }
    }
}

/// Project the flattened map into transport variable bindings.
#[must_use]
pub fn variables(flat: &FlattenedArgs) -> serde_json::Map<String, Value> {
    flat.iter()
        .map(|(name, arg)| (name.clone(), arg.value.clone()))
        .collect()
}

/// Whether any flattened argument carries an upload.
#[must_use]
pub fn has_upload(flat: &FlattenedArgs) -> bool {
    flat.values().any(|arg| arg.gql_type.starts_with("Upload"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::{DataField, FieldType, RelationshipKind};

    fn field(name: &str, field_type: FieldType, unique: bool) -> DataField {
        DataField {
            name: name.to_string(),
            field_type,
            required: false,
            unique,
            relationship: None,
            reverse_name: None,
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![
            DataType {
                name: "user".to_string(),
                fields: vec![
                    field("id", FieldType::Integer, true),
                    field("email", FieldType::Text, true),
                    field("firstName", FieldType::Text, false),
                    DataField {
                        name: "role".to_string(),
                        field_type: FieldType::DataType("role".to_string()),
                        required: false,
                        unique: false,
                        relationship: Some(RelationshipKind::ManyToOne),
                        reverse_name: Some("users".to_string()),
                    },
                ],
            },
            DataType {
                name: "role".to_string(),
                fields: vec![field("name", FieldType::Text, false)],
            },
        ])
    }

    #[test]
    fn annotate_types_collection_arguments() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new()
            .with_after("cursor")
            .with_first(10)
            .with_order_by("createdAt", Direction::Asc)
            .with_filter(json!({"roleId": {"equals": 2}}));

        let typed = annotate(user, &schema, &options).expect("annotated");

        let keys: Vec<&String> = typed.args.keys().collect();
        assert_eq!(keys, ["after", "first", "orderBy", "where"]);
        assert_eq!(typed.args["after"].gql_type, "String");
        assert_eq!(typed.args["first"].gql_type, "Int");
        assert_eq!(typed.args["orderBy"].gql_type, "OrderBy");
        assert_eq!(
            typed.args["orderBy"].value,
            json!({"field": "createdAt", "direction": "ASC"})
        );
        assert_eq!(typed.args["where"].gql_type, "UserWhereInput");
    }

    #[test]
    fn annotate_ignores_before_when_after_present() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_after("a").with_before("b");

        let typed = annotate(user, &schema, &options).expect("annotated");

        assert!(typed.args.contains_key("after"));
        assert!(!typed.args.contains_key("before"));
    }

    #[test]
    fn annotate_derives_nested_types_from_target() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_include(
            "role",
            Include::Nested(Box::new(
                CollectionOptions::new().with_filter(json!({"name": {"equals": "admin"}})),
            )),
        );

        let typed = annotate(user, &schema, &options).expect("annotated");

        let TypedInclude::Nested(nested) = &typed.include["role"] else {
            panic!("expected nested include");
        };
        assert_eq!(nested.args["where"].gql_type, "RoleWhereInput");
    }

    #[test]
    fn lookup_rewrites_id_equals_with_override() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_filter(json!({"id": {"equals": 7}}));
        let mut typed = annotate(user, &schema, &options).expect("annotated");

        change_where_to_lookup(user, &mut typed, "ID!").expect("rewritten");

        assert!(!typed.args.contains_key("where"));
        assert_eq!(typed.args["id"].gql_type, "ID!");
        assert_eq!(typed.args["id"].value, json!(7));
    }

    #[test]
    fn lookup_uses_field_type_for_unique_fields() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options =
            CollectionOptions::new().with_filter(json!({"email": {"equals": "team@noloco.io"}}));
        let mut typed = annotate(user, &schema, &options).expect("annotated");

        change_where_to_lookup(user, &mut typed, "ID").expect("rewritten");

        assert_eq!(typed.args["email"].gql_type, "String");
        assert_eq!(typed.args["email"].value, json!("team@noloco.io"));
    }

    #[test]
    fn lookup_rejects_non_unique_fields() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options =
            CollectionOptions::new().with_filter(json!({"firstName": {"equals": "Jane"}}));
        let mut typed = annotate(user, &schema, &options).expect("annotated");

        let err = change_where_to_lookup(user, &mut typed, "ID").expect_err("not unique");
        assert!(matches!(err, NolocoError::FieldNotUnique { field, .. } if field == "firstName"));
    }

    #[test]
    fn lookup_rejects_multi_field_predicates() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new()
            .with_filter(json!({"id": {"equals": 1}, "email": {"equals": "x"}}));
        let mut typed = annotate(user, &schema, &options).expect("annotated");

        let err = change_where_to_lookup(user, &mut typed, "ID").expect_err("two fields");
        assert!(matches!(err, NolocoError::UnsupportedLookupPredicate { .. }));
    }

    #[test]
    fn lookup_rejects_non_equals_comparisons() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_filter(json!({"id": {"lt": 3}}));
        let mut typed = annotate(user, &schema, &options).expect("annotated");

        let err = change_where_to_lookup(user, &mut typed, "ID").expect_err("lt unsupported");
        assert!(matches!(err, NolocoError::UnsupportedLookupPredicate { .. }));
    }

    fn collect_leaves(prefix: &str, typed: &TypedOptions, out: &mut Vec<(String, Value)>) {
        for (name, arg) in &typed.args {
            out.push((format!("{prefix}_{name}"), arg.value.clone()));
        }
        for (name, include) in &typed.include {
            if let TypedInclude::Nested(nested) = include {
                collect_leaves(&format!("{prefix}_{name}"), nested, out);
            }
        }
    }

    #[test]
    fn flatten_is_an_order_preserving_round_trip() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new()
            .with_first(5)
            .with_filter(json!({"id": {"gt": 0}}))
            .with_include(
                "role",
                Include::Nested(Box::new(
                    CollectionOptions::new()
                        .with_first(2)
                        .with_filter(json!({"name": {"equals": "admin"}})),
                )),
            );
        let typed = annotate(user, &schema, &options).expect("annotated");

        let flat = flatten("userCollection", &typed);

        let mut expected = Vec::new();
        collect_leaves("userCollection", &typed, &mut expected);
        let actual: Vec<(String, Value)> = flat
            .iter()
            .map(|(name, arg)| (name.clone(), arg.value.clone()))
            .collect();
        assert_eq!(actual, expected);

        let keys: Vec<&String> = flat.keys().collect();
        assert_eq!(
            keys,
            [
                "userCollection_first",
                "userCollection_where",
                "userCollection_role_first",
                "userCollection_role_where",
            ]
        );
        assert_eq!(flat["userCollection_role_where"].local, "where");
    }

    #[test]
    fn bare_include_markers_contribute_no_arguments() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new()
            .with_first(1)
            .with_include("role", Include::All);
        let typed = annotate(user, &schema, &options).expect("annotated");

        let flat = flatten("user", &typed);

        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("user_first"));
    }

    #[test]
    fn upload_detection_scans_flat_types() {
        let mut flat = FlattenedArgs::new();
        flat.insert(
            "createUser_avatar".to_string(),
            FlatArg {
                local: "avatar".to_string(),
                gql_type: "Upload!".to_string(),
                value: json!("/tmp/avatar.png"),
            },
        );
        assert!(has_upload(&flat));
        assert!(!has_upload(&FlattenedArgs::new()));
    }
}
