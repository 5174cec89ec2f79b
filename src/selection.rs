//! Selection compiler: turns an annotated include tree into the
//! field-selection body of a request document.
//!
//! Every plain field is always selected; relationship fields are selected
//! only when named in the include tree, each recursively compiled against
//! its resolved target type; file fields always get a fixed sub-selection.
//! Output order is plain fields in schema order, then relationships in
//! selection order, then file fields in schema order.

use crate::error::NolocoError;
use crate::options::{TypedInclude, TypedOptions};
use crate::schema::{resolve_relationship, DataType, FieldType, RelationshipKind, Schema};

/// Leaf selection for file attachments.
const FILE_FIELDS: &str = "id uuid fileType url name";

/// Render the local argument bindings for a selection site.
///
/// Bindings use the local argument name against the flattened variable
/// name, which is what lets `where` recur at every nesting level.
pub(crate) fn render_binding(prefix: &str, typed: &TypedOptions) -> String {
    if typed.args.is_empty() {
        return String::new();
    }
    let bindings: Vec<String> = typed
        .args
        .keys()
        .map(|local| format!("{local}: ${prefix}_{local}"))
        .collect();
    format!("({})", bindings.join(", "))
}

/// Wrap a selection body in the plain object shape.
pub(crate) fn render_object_fragment(name: &str, binding: &str, body: &str) -> String {
    format!("{name}{binding} {{\n{body}\n}}")
}

/// Wrap a selection body in the paginated collection shape.
pub(crate) fn render_collection_fragment(name: &str, binding: &str, body: &str) -> String {
    format!(
        "{name}{binding} {{\n\
         totalCount\n\
         edges {{\n\
         node {{\n\
         {body}\n\
         }}\n\
         }}\n\
         pageInfo {{\n\
         hasPreviousPage\n\
         hasNextPage\n\
         startCursor\n\
         endCursor\n\
         }}\n\
         }}"
    )
}

/// Compile the selection body for `data_type` under the given variable
/// prefix.
pub fn compile_selection(
    data_type: &DataType,
    schema: &Schema,
    typed: &TypedOptions,
    prefix: &str,
) -> Result<String, NolocoError> {
    let mut lines = Vec::new();

    for field in &data_type.fields {
        if field.is_plain() {
            lines.push(field.name.clone());
        }
    }

    let empty = TypedOptions::default();
    for (name, include) in &typed.include {
        let resolved = resolve_relationship(name, data_type, schema)?;
        let nested = match include {
            TypedInclude::All => &empty,
            TypedInclude::Nested(nested) => nested,
        };
        let child_prefix = format!("{prefix}_{name}");
        let binding = render_binding(&child_prefix, nested);
        let body = compile_selection(resolved.data_type, schema, nested, &child_prefix)?;
        let fragment = if resolved.is_collection() {
            render_collection_fragment(name, &binding, &body)
        } else {
            render_object_fragment(name, &binding, &body)
        };
        lines.push(fragment);
    }

    for field in &data_type.fields {
        if field.field_type != FieldType::File {
            continue;
        }
        let single = matches!(
            field.relationship,
            Some(RelationshipKind::OneToOne | RelationshipKind::ManyToOne)
        );
        let fragment = if single {
            format!("{} {{ {FILE_FIELDS} }}", field.name)
        } else {
            format!("{} {{ edges {{ node {{ {FILE_FIELDS} }} }} }}", field.name)
        };
        lines.push(fragment);
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::options::{annotate, CollectionOptions, Include};
    use crate::schema::DataField;

    fn plain(name: &str) -> DataField {
        DataField {
            name: name.to_string(),
            field_type: FieldType::Text,
            required: false,
            unique: false,
            relationship: None,
            reverse_name: None,
        }
    }

    fn related(name: &str, target: &str, kind: RelationshipKind, reverse: Option<&str>) -> DataField {
        DataField {
            name: name.to_string(),
            field_type: FieldType::DataType(target.to_string()),
            required: false,
            unique: false,
            relationship: Some(kind),
            reverse_name: reverse.map(ToString::to_string),
        }
    }

    fn file(name: &str, kind: RelationshipKind) -> DataField {
        DataField {
            name: name.to_string(),
            field_type: FieldType::File,
            required: false,
            unique: false,
            relationship: Some(kind),
            reverse_name: None,
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![
            DataType {
                name: "user".to_string(),
                fields: vec![
                    plain("id"),
                    plain("firstName"),
                    plain("lastName"),
                    related("role", "role", RelationshipKind::ManyToOne, Some("users")),
                    file("profilePicture", RelationshipKind::OneToOne),
                    file("attachments", RelationshipKind::ManyToMany),
                ],
            },
            DataType {
                name: "role".to_string(),
                fields: vec![plain("name")],
            },
            DataType {
                name: "task".to_string(),
                fields: vec![
                    plain("title"),
                    related("assignee", "user", RelationshipKind::ManyToOne, Some("tasks")),
                ],
            },
        ])
    }

    #[test]
    fn empty_selection_yields_plain_fields_in_schema_order() {
        let schema = Schema::new(vec![DataType {
            name: "note".to_string(),
            fields: vec![plain("id"), plain("title"), plain("body")],
        }]);
        let note = schema.data_type("note").expect("note");

        let body = compile_selection(note, &schema, &TypedOptions::default(), "note")
            .expect("compiled");

        assert_eq!(body, "id\ntitle\nbody");
    }

    #[test]
    fn included_single_relationship_uses_object_shape() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_include("role", Include::All);
        let typed = annotate(user, &schema, &options).expect("annotated");

        let body = compile_selection(user, &schema, &typed, "user").expect("compiled");

        assert_eq!(
            body,
            "id\n\
             firstName\n\
             lastName\n\
             role {\n\
             name\n\
             }\n\
             profilePicture { id uuid fileType url name }\n\
             attachments { edges { node { id uuid fileType url name } } }"
        );
    }

    #[test]
    fn reverse_relationship_uses_collection_shape_with_bindings() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_include(
            "tasksCollection",
            Include::Nested(Box::new(
                CollectionOptions::new()
                    .with_first(3)
                    .with_filter(json!({"title": {"equals": "x"}})),
            )),
        );
        let typed = annotate(user, &schema, &options).expect("annotated");

        let body = compile_selection(user, &schema, &typed, "user").expect("compiled");

        assert!(body.contains(
            "tasksCollection(first: $user_tasksCollection_first, where: $user_tasksCollection_where) {"
        ));
        assert!(body.contains("totalCount"));
        assert!(body.contains("pageInfo {"));
        assert!(body.contains("hasPreviousPage"));
        // nested node body selects the task's plain fields
        assert!(body.contains("title"));
    }

    #[test]
    fn file_fields_ignore_the_selection_tree() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");

        let body = compile_selection(user, &schema, &TypedOptions::default(), "user")
            .expect("compiled");

        assert!(body.ends_with(
            "profilePicture { id uuid fileType url name }\n\
             attachments { edges { node { id uuid fileType url name } } }"
        ));
    }

    #[test]
    fn unknown_include_key_fails() {
        let schema = schema();
        let user = schema.data_type("user").expect("user");
        let options = CollectionOptions::new().with_include("nope", Include::All);
        let typed = annotate(user, &schema, &options).expect("annotated");

        let err = compile_selection(user, &schema, &typed, "user").expect_err("unknown");
        assert!(matches!(err, NolocoError::RelationshipNotFound { .. }));
    }
}
