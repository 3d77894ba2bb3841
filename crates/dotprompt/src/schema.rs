//! JSON Schema documents as produced by the Picoschema compiler.
//!
//! A [`Schema`] wraps the raw JSON object, so every keyword survives a round
//! trip and keys keep their authored order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scalar type names accepted in Picoschema. `any` yields an untyped schema.
pub const SCALAR_TYPES: [&str; 6] = ["string", "boolean", "null", "number", "integer", "any"];

/// Keywords of JSON Schema drafts 4 through 2020-12, including annotations.
pub const JSON_SCHEMA_KEYWORDS: [&str; 63] = [
    "$schema",
    "$id",
    "id",
    "$ref",
    "$anchor",
    "$dynamicRef",
    "$dynamicAnchor",
    "$recursiveRef",
    "$recursiveAnchor",
    "$vocabulary",
    "$comment",
    "$defs",
    "definitions",
    "type",
    "enum",
    "const",
    "multipleOf",
    "maximum",
    "exclusiveMaximum",
    "minimum",
    "exclusiveMinimum",
    "maxLength",
    "minLength",
    "pattern",
    "items",
    "prefixItems",
    "additionalItems",
    "unevaluatedItems",
    "contains",
    "maxContains",
    "minContains",
    "maxItems",
    "minItems",
    "uniqueItems",
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
    "propertyNames",
    "maxProperties",
    "minProperties",
    "required",
    "dependentRequired",
    "dependentSchemas",
    "dependencies",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "if",
    "then",
    "else",
    "format",
    "contentEncoding",
    "contentMediaType",
    "contentSchema",
    "title",
    "description",
    "default",
    "deprecated",
    "readOnly",
    "writeOnly",
    "examples",
];

pub fn is_json_schema_keyword(key: &str) -> bool {
    JSON_SCHEMA_KEYWORDS.contains(&key)
}

/// Type names that mark a mapping as already being JSON Schema.
pub(crate) fn is_json_schema_type(name: &str) -> bool {
    SCALAR_TYPES.contains(&name) || name == "object" || name == "array"
}

/// A JSON Schema document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Map<String, Value>);

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A schema with only `type` set.
    pub fn of_type(schema_type: impl Into<String>) -> Self {
        Self::new().with("type", Value::String(schema_type.into()))
    }

    /// `None` unless `value` is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn with_description(self, description: Option<String>) -> Self {
        match description {
            Some(description) => self.with("description", Value::String(description)),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn has_type(&self) -> bool {
        self.0.contains_key("type")
    }

    pub fn description(&self) -> Option<&str> {
        self.get("description").and_then(Value::as_str)
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.get("properties").and_then(Value::as_object)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Schema {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Schema> for Value {
    fn from(schema: Schema) -> Self {
        schema.into_value()
    }
}
