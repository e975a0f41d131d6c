//! Field paths and type resolution over stream JSON schemas.
//!
//! Sources describe their streams with JSON schema documents that are often
//! loose: legacy `["null", "string"]` unions, numbers tagged as integers via
//! `airbyte_type`, or nodes with no `type` at all. This module resolves each
//! node to a [`FieldType`] without ever failing; anything it cannot make
//! sense of becomes [`FieldType::Unknown`] and callers decide how lenient to
//! be.
//!
//! - [`collect_field_nodes`]: every addressable path in a schema, recursively
//! - [`top_level_fields`] / [`regenerate_json_schema`]: the flat field view
//!   used by mappers and destination generation
//! - [`is_safe_widening`]: the type compatibility table used by the differ

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::FieldPath;

const PROPERTIES: &str = "properties";
const ITEMS: &str = "items";
const TYPE: &str = "type";
const FORMAT: &str = "format";
const AIRBYTE_TYPE: &str = "airbyte_type";

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// Resolved type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Integer,
    Number,
    Date,
    TimestampWithTimezone,
    TimestampWithoutTimezone,
    TimeWithTimezone,
    TimeWithoutTimezone,
    Array,
    Object,
    /// `oneOf` / `anyOf` / `allOf`, or a `type` union of several non-null types.
    Multi,
    /// Missing, malformed, or duplicated declaration.
    Unknown,
}

impl FieldType {
    /// Resolves a JSON schema node to a field type.
    ///
    /// Never fails: a node that is not an object, declares an unrecognized
    /// `type`, or declares only `null` resolves to [`FieldType::Unknown`].
    #[must_use]
    pub fn resolve(node: &Value) -> Self {
        let Some(obj) = node.as_object() else {
            return Self::Unknown;
        };

        if ["oneOf", "anyOf", "allOf"].iter().any(|k| obj.contains_key(*k)) {
            return Self::Multi;
        }

        let declared: Vec<&str> = match obj.get(TYPE) {
            Some(Value::String(t)) => vec![t.as_str()],
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .collect(),
            Some(_) => return Self::Unknown,
            // Tolerate object schemas that omit `type`.
            None if obj.contains_key(PROPERTIES) => return Self::Object,
            None => return Self::Unknown,
        };

        match declared.as_slice() {
            [single] => Self::resolve_single(single, obj),
            [] => Self::Unknown,
            _ => Self::Multi,
        }
    }

    fn resolve_single(declared: &str, obj: &Map<String, Value>) -> Self {
        let format = obj.get(FORMAT).and_then(Value::as_str);
        let airbyte_type = obj.get(AIRBYTE_TYPE).and_then(Value::as_str);
        match declared {
            "string" => match (format, airbyte_type) {
                (Some("date"), _) => Self::Date,
                (Some("date-time"), Some("timestamp_without_timezone")) => {
                    Self::TimestampWithoutTimezone
                }
                (Some("date-time"), _) => Self::TimestampWithTimezone,
                (Some("time"), Some("time_with_timezone")) => Self::TimeWithTimezone,
                (Some("time"), _) => Self::TimeWithoutTimezone,
                _ => Self::String,
            },
            "number" if airbyte_type == Some("integer") => Self::Integer,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::Unknown,
        }
    }

    /// Renders a minimal JSON schema node for this type.
    ///
    /// Composite types render an empty shell (`type` only, or an empty
    /// `oneOf`); callers that need the full nested declaration keep the
    /// original node instead.
    #[must_use]
    pub fn to_json_schema(self) -> Value {
        use serde_json::json;
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Date => json!({ "type": "string", "format": "date" }),
            Self::TimestampWithTimezone => json!({
                "type": "string",
                "format": "date-time",
                "airbyte_type": "timestamp_with_timezone"
            }),
            Self::TimestampWithoutTimezone => json!({
                "type": "string",
                "format": "date-time",
                "airbyte_type": "timestamp_without_timezone"
            }),
            Self::TimeWithTimezone => json!({
                "type": "string",
                "format": "time",
                "airbyte_type": "time_with_timezone"
            }),
            Self::TimeWithoutTimezone => json!({
                "type": "string",
                "format": "time",
                "airbyte_type": "time_without_timezone"
            }),
            Self::Array => json!({ "type": "array" }),
            Self::Object => json!({ "type": "object" }),
            Self::Multi => json!({ "oneOf": [] }),
            Self::Unknown => json!({}),
        }
    }

    /// Returns true for scalar types that can act as a cursor or key component.
    #[must_use]
    pub fn is_key_compatible(self) -> bool {
        !matches!(self, Self::Array | Self::Object | Self::Multi | Self::Unknown)
    }

    /// Returns true when the node declaration carries nested fields that a
    /// flat field rendering would lose.
    #[must_use]
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Array | Self::Object | Self::Multi | Self::Unknown)
    }
}

/// Returns true when changing a field from `from` to `to` cannot break a
/// destination that was provisioned for `from`.
///
/// Identity is always safe. Every other pair not listed here counts as a
/// narrowing or incompatible change.
#[must_use]
pub fn is_safe_widening(from: FieldType, to: FieldType) -> bool {
    use FieldType as T;
    from == to
        || matches!(
            (from, to),
            (T::Integer, T::Number)
                | (
                    T::Date,
                    T::TimestampWithTimezone | T::TimestampWithoutTimezone
                )
                | (T::TimestampWithoutTimezone, T::TimestampWithTimezone)
                | (T::TimeWithoutTimezone, T::TimeWithTimezone)
        )
        || (to == T::Multi && from.is_key_compatible())
}

// ---------------------------------------------------------------------------
// Recursive field nodes
// ---------------------------------------------------------------------------

/// One addressable node inside a stream schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    /// The raw schema declaration at this path.
    pub schema: Value,
    /// Resolved type; [`FieldType::Unknown`] when unresolvable or duplicated.
    pub field_type: FieldType,
}

/// Collects every field node of a schema, keyed by path.
///
/// Object properties extend the path with the property name and array
/// element schemas extend it with `items`. When two different declarations
/// land on the same path the node is kept but marked unknown, so the
/// differ treats it as unresolvable instead of guessing.
#[must_use]
pub fn collect_field_nodes(json_schema: &Value) -> BTreeMap<FieldPath, FieldNode> {
    let mut nodes = BTreeMap::new();
    walk(json_schema, &mut Vec::new(), &mut nodes);
    nodes
}

fn walk(node: &Value, prefix: &mut FieldPath, out: &mut BTreeMap<FieldPath, FieldNode>) {
    if let Some(properties) = node.get(PROPERTIES).and_then(Value::as_object) {
        for (name, child) in properties {
            prefix.push(name.clone());
            visit(child, prefix, out);
            prefix.pop();
        }
    }

    if let Some(items) = node.get(ITEMS).filter(|items| items.is_object()) {
        prefix.push(ITEMS.to_string());
        visit(items, prefix, out);
        prefix.pop();
    }
}

fn visit(child: &Value, path: &mut FieldPath, out: &mut BTreeMap<FieldPath, FieldNode>) {
    match out.get_mut(path.as_slice()) {
        Some(existing) if existing.schema != *child => {
            tracing::debug!(path = ?path, "duplicated schema declaration, marking field unknown");
            existing.field_type = FieldType::Unknown;
        }
        Some(_) => {}
        None => {
            out.insert(
                path.clone(),
                FieldNode {
                    schema: child.clone(),
                    field_type: FieldType::resolve(child),
                },
            );
        }
    }
    walk(child, path, out);
}

/// Looks up the schema node at `path`, following `properties` for names and
/// the array element schema for `items` segments.
#[must_use]
pub fn schema_at_path<'a>(json_schema: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut node = json_schema;
    for segment in path {
        let by_property = node.get(PROPERTIES).and_then(|p| p.get(segment));
        node = match by_property {
            Some(child) => child,
            None if segment == ITEMS => node.get(ITEMS)?,
            None => return None,
        };
    }
    Some(node)
}

// ---------------------------------------------------------------------------
// Flat top-level fields
// ---------------------------------------------------------------------------

/// A top-level field of a stream, as seen by mappers and destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Returns the top-level properties of a schema as flat fields, in
/// property-name order.
#[must_use]
pub fn top_level_fields(json_schema: &Value) -> Vec<Field> {
    json_schema
        .get(PROPERTIES)
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, node)| Field::new(name.clone(), FieldType::resolve(node)))
                .collect()
        })
        .unwrap_or_default()
}

/// Rebuilds a stream schema from a (possibly mapped) field list.
///
/// Scalar fields are rendered from their type. Composite fields keep the
/// declaration found under the same name in `original`, so nested
/// structure survives mapping. Every other key of `original` is preserved.
#[must_use]
pub fn regenerate_json_schema(fields: &[Field], original: &Value) -> Value {
    let original_properties = original.get(PROPERTIES).and_then(Value::as_object);

    let properties: Map<String, Value> = fields
        .iter()
        .map(|field| {
            let declared = original_properties.and_then(|p| p.get(&field.name));
            let node = match declared {
                Some(node) if field.field_type.is_composite() => node.clone(),
                _ => field.field_type.to_json_schema(),
            };
            (field.name.clone(), node)
        })
        .collect();

    let mut schema = match original {
        Value::Object(obj) => obj.clone(),
        _ => Map::new(),
    };
    schema
        .entry(TYPE)
        .or_insert_with(|| Value::String("object".to_string()));
    schema.insert(PROPERTIES.to_string(), Value::Object(properties));
    Value::Object(schema)
}

/// Returns a copy of the schema keeping only the named top-level properties.
#[must_use]
pub fn retain_top_level_properties(json_schema: &Value, keep: &[&str]) -> Value {
    let mut schema = json_schema.clone();
    if let Some(properties) = schema.get_mut(PROPERTIES).and_then(Value::as_object_mut) {
        properties.retain(|name, _| keep.contains(&name.as_str()));
    }
    schema
}

/// Returns true when the schema declares a top-level property `name`.
#[must_use]
pub fn has_top_level_property(json_schema: &Value, name: &str) -> bool {
    json_schema
        .get(PROPERTIES)
        .and_then(|p| p.get(name))
        .is_some()
}
