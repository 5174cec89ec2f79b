//! Project schema description: data types, fields, relationships.
//!
//! The schema is fetched from the platform per client session and is the
//! single source of truth every document-synthesis step consults. Lookups
//! against it fail with the schema-lookup error class, which the client
//! treats as a staleness signal.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::NolocoError;

/// Semantic type of a field, as declared by the platform schema.
///
/// Relationship fields carry the target data type's name in `DataType`;
/// an unrecognized scalar also lands there and is rejected by the type
/// mapper when used as a plain field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Short text.
    Text,
    /// Date/time value.
    Date,
    /// Whole number.
    Integer,
    /// Floating-point number.
    Decimal,
    /// Time duration.
    Duration,
    /// True/false.
    Boolean,
    /// Formatted text.
    RichText,
    /// One of a fixed set of options, typed per field.
    SingleOption,
    /// File attachment.
    File,
    /// A relationship target (or unknown) type name.
    DataType(String),
}

impl FieldType {
    /// The schema's string representation of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "TEXT",
            Self::Date => "DATE",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::Duration => "DURATION",
            Self::Boolean => "BOOLEAN",
            Self::RichText => "RICH_TEXT",
            Self::SingleOption => "SINGLE_OPTION",
            Self::File => "file",
            Self::DataType(name) => name,
        }
    }
}

impl From<&str> for FieldType {
    fn from(value: &str) -> Self {
        match value {
            "TEXT" => Self::Text,
            "DATE" => Self::Date,
            "INTEGER" => Self::Integer,
            "DECIMAL" => Self::Decimal,
            "DURATION" => Self::Duration,
            "BOOLEAN" => Self::Boolean,
            "RICH_TEXT" => Self::RichText,
            "SINGLE_OPTION" => Self::SingleOption,
            "file" => Self::File,
            other => Self::DataType(other.to_string()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Cardinality of a relationship between two data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// One record on each side.
    OneToOne,
    /// Many records pointing at one.
    ManyToOne,
    /// One record pointing at many.
    OneToMany,
    /// Many records on each side.
    ManyToMany,
}

/// A field on a data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    /// Field name, unique within its data type.
    pub name: String,
    /// Semantic type, or the target type name for relationships.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
    /// Whether values are unique across records.
    #[serde(default)]
    pub unique: bool,
    /// Relationship cardinality, if this is a relationship field.
    #[serde(default)]
    pub relationship: Option<RelationshipKind>,
    /// Name by which the target type refers back, if navigable in reverse.
    #[serde(default, rename = "reverseName")]
    pub reverse_name: Option<String>,
}

impl DataField {
    /// Returns `true` for plain value fields (no relationship, not a file).
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.relationship.is_none() && self.field_type != FieldType::File
    }
}

/// A named record schema on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    /// Data type name, unique within the project.
    pub name: String,
    /// Declared fields, in schema order.
    pub fields: Vec<DataField>,
}

impl DataType {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Result<&DataField, NolocoError> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| NolocoError::FieldNotFound {
                data_type: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Look up a field by name without failing.
    #[must_use]
    pub fn field_opt(&self, name: &str) -> Option<&DataField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// The full project schema description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// All data types in the project.
    pub data_types: Vec<DataType>,
}

impl Schema {
    /// Create a schema from a list of data types.
    #[must_use]
    pub fn new(data_types: Vec<DataType>) -> Self {
        Self { data_types }
    }

    /// Look up a data type by name.
    pub fn data_type(&self, name: &str) -> Result<&DataType, NolocoError> {
        self.data_types
            .iter()
            .find(|data_type| data_type.name == name)
            .ok_or_else(|| NolocoError::DataTypeNotFound {
                name: name.to_string(),
            })
    }
}

/// Uppercase the first letter of each `_`/`-`/space-separated word.
pub(crate) fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            at_word_start = true;
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Map a field to its request type name.
///
/// `SINGLE_OPTION` fields synthesize a per-field enum type name from the
/// owning data type and field names. A trailing `!` marks required
/// arguments. Relationship targets (and unrecognized scalars) are not
/// mappable and fail with `UnsupportedFieldType`.
pub fn map_field_type(
    data_type: &DataType,
    field: &DataField,
    required: bool,
) -> Result<String, NolocoError> {
    let base = match &field.field_type {
        FieldType::Text | FieldType::RichText => "String".to_string(),
        FieldType::Date => "DateTime".to_string(),
        FieldType::Integer => "Int".to_string(),
        FieldType::Decimal => "Float".to_string(),
        FieldType::Duration => "Duration".to_string(),
        FieldType::Boolean => "Boolean".to_string(),
        FieldType::SingleOption => {
            format!("{}{}", pascal_case(&data_type.name), pascal_case(&field.name))
        }
        FieldType::File => "Upload".to_string(),
        FieldType::DataType(found) => {
            return Err(NolocoError::UnsupportedFieldType {
                data_type: data_type.name.clone(),
                field: field.name.clone(),
                found: found.clone(),
            });
        }
    };

    if required {
        Ok(format!("{base}!"))
    } else {
        Ok(base)
    }
}

/// Which side of the schema declared the resolved relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDirection {
    /// Declared as a field on the referencing data type.
    Forward,
    /// Discovered through another type's reverse name.
    Reverse,
}

/// A relationship name resolved against the schema.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRelationship<'a> {
    /// The data type the relationship navigates to.
    pub data_type: &'a DataType,
    /// The field declaring the relationship.
    pub field: &'a DataField,
    /// Forward or reverse resolution.
    pub direction: RelationshipDirection,
}

impl ResolvedRelationship<'_> {
    /// Whether the navigable path yields a collection rather than a single
    /// record. Reverse paths flip the declared cardinality.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            (self.direction, self.field.relationship),
            (
                RelationshipDirection::Forward,
                Some(RelationshipKind::OneToMany | RelationshipKind::ManyToMany),
            ) | (
                RelationshipDirection::Reverse,
                Some(RelationshipKind::ManyToOne | RelationshipKind::ManyToMany),
            )
        )
    }
}

/// Resolve a relationship name referenced from `owner`.
///
/// Forward relationships are fields literally named on the owner; reverse
/// relationships are reconstructed by scanning every data type for a field
/// whose target is the owner and whose `reverseName + "Collection"` matches.
/// More than one reverse candidate is a schema-design violation and fails
/// rather than silently taking the first match.
pub fn resolve_relationship<'a>(
    name: &str,
    owner: &'a DataType,
    schema: &'a Schema,
) -> Result<ResolvedRelationship<'a>, NolocoError> {
    if let Some(field) = owner.field_opt(name) {
        return match &field.field_type {
            FieldType::DataType(target) => Ok(ResolvedRelationship {
                data_type: schema.data_type(target)?,
                field,
                direction: RelationshipDirection::Forward,
            }),
            _ => Err(NolocoError::RelationshipNotFound {
                data_type: owner.name.clone(),
                relationship: name.to_string(),
            }),
        };
    }

    let mut candidates = Vec::new();
    for data_type in &schema.data_types {
        for field in &data_type.fields {
            let Some(reverse_name) = &field.reverse_name else {
                continue;
            };
            if field.field_type == FieldType::DataType(owner.name.clone())
                && format!("{reverse_name}Collection") == name
            {
                candidates.push((data_type, field));
            }
        }
    }

    match candidates.as_slice() {
        [] => Err(NolocoError::RelationshipNotFound {
            data_type: owner.name.clone(),
            relationship: name.to_string(),
        }),
        [(data_type, field)] => Ok(ResolvedRelationship {
            data_type,
            field,
            direction: RelationshipDirection::Reverse,
        }),
        many => Err(NolocoError::RelationshipAmbiguous {
            data_type: owner.name.clone(),
            relationship: name.to_string(),
            candidates: many
                .iter()
                .map(|(data_type, _)| data_type.name.clone())
                .collect(),
        }),
    }
}
