//! Mutation argument deriver: turns a caller's value map into typed
//! create/update arguments.
//!
//! Plain fields map through the field-type mapper, relationship fields
//! become foreign-key arguments with cardinality-dependent typing, file
//! fields become upload arguments carrying the file reference without
//! opening it. Derivation is pure; upload I/O happens at execution time.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::NolocoError;
use crate::options::TypedValue;
use crate::schema::{map_field_type, DataField, DataType, FieldType, RelationshipKind, Schema};

/// Typed mutation arguments keyed by argument name, in value-map order.
pub type MutationArgs = IndexMap<String, TypedValue>;

fn connect_id(connect: &Value) -> Option<Value> {
    connect.as_object()?.get("id").cloned()
}

fn connect_ids(connect: &Value) -> Option<Vec<Value>> {
    connect.as_array()?.iter().map(connect_id).collect()
}

fn single_connection(
    data_type: &DataType,
    field_name: &str,
    required: bool,
    value: &Value,
) -> Result<TypedValue, NolocoError> {
    let id = value
        .as_object()
        .and_then(|object| object.get("connect"))
        .filter(|connect| !connect.is_array())
        .and_then(connect_id)
        .ok_or_else(|| NolocoError::InvalidSingleFieldConnection {
            data_type: data_type.name.clone(),
            field: field_name.to_string(),
        })?;
    let gql_type = if required { "ID!" } else { "ID" };
    Ok(TypedValue::new(gql_type, id))
}

fn multi_connection(
    data_type: &DataType,
    field_name: &str,
    required: bool,
    value: &Value,
) -> Result<TypedValue, NolocoError> {
    let ids = value
        .as_object()
        .and_then(|object| object.get("connect"))
        .and_then(connect_ids)
        .ok_or_else(|| NolocoError::InvalidMultiFieldConnection {
            data_type: data_type.name.clone(),
            field: field_name.to_string(),
        })?;
    let gql_type = if required { "[ID!]!" } else { "[ID!]" };
    Ok(TypedValue::new(gql_type, Value::Array(ids)))
}

/// Find the reverse relationship field addressed by a value-map key, if
/// any. Ambiguous matches are a schema-design violation.
fn reverse_field<'a>(
    name: &str,
    data_type: &DataType,
    schema: &'a Schema,
) -> Result<Option<&'a DataField>, NolocoError> {
    let mut candidates = Vec::new();
    for related in &schema.data_types {
        for field in &related.fields {
            let Some(reverse_name) = &field.reverse_name else {
                continue;
            };
            if field.field_type == FieldType::DataType(data_type.name.clone())
                && format!("{reverse_name}Collection") == name
            {
                candidates.push((related, field));
            }
        }
    }
    match candidates.as_slice() {
        [] => Ok(None),
        [(_, field)] => Ok(Some(field)),
        many => Err(NolocoError::RelationshipAmbiguous {
            data_type: data_type.name.clone(),
            relationship: name.to_string(),
            candidates: many
                .iter()
                .map(|(related, _)| related.name.clone())
                .collect(),
        }),
    }
}

/// Derive typed mutation arguments from a caller value map.
pub fn derive_args(
    data_type: &DataType,
    schema: &Schema,
    value_map: &serde_json::Map<String, Value>,
) -> Result<MutationArgs, NolocoError> {
    let mut args = MutationArgs::new();

    for (name, value) in value_map {
        if let Some(field) = data_type.field_opt(name) {
            if field.field_type == FieldType::File {
                let gql_type = if field.required { "Upload!" } else { "Upload" };
                args.insert(name.clone(), TypedValue::new(gql_type, value.clone()));
            } else if let Some(kind) = field.relationship {
                let arg = match kind {
                    RelationshipKind::OneToOne | RelationshipKind::ManyToOne => {
                        single_connection(data_type, name, field.required, value)?
                    }
                    RelationshipKind::OneToMany | RelationshipKind::ManyToMany => {
                        multi_connection(data_type, name, field.required, value)?
                    }
                };
                args.insert(format!("{name}Id"), arg);
            } else {
                let gql_type = map_field_type(data_type, field, field.required)?;
                args.insert(name.clone(), TypedValue::new(gql_type, value.clone()));
            }
        } else if let Some(field) = reverse_field(name, data_type, schema)? {
            let arg = multi_connection(data_type, name, field.required, value)?;
            args.insert(format!("{name}Id"), arg);
        } else {
            return Err(NolocoError::FieldNotFound {
                data_type: data_type.name.clone(),
                field: name.clone(),
            });
        }
    }

    Ok(args)
}
