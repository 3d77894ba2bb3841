//! Picoschema compiler
//!
//! Picoschema is a compact shorthand for JSON Schema:
//!
//! ```yaml
//! name: string, the user's name
//! age?: integer
//! tags(array, list of tags): string
//! address(object):
//!   street: string
//! status(enum): [active, inactive]
//! (*): string
//! ```
//!
//! Bare type names other than the scalars are named schema references and are
//! looked up through a [`SchemaResolver`].

use serde_json::{json, Map, Value};

use crate::schema::{is_json_schema_keyword, is_json_schema_type, Schema, SCALAR_TYPES};

/// Key denoting `additionalProperties` in a Picoschema mapping.
pub const WILDCARD_PROPERTY_NAME: &str = "(*)";

/// Errors raised while compiling Picoschema
#[derive(Debug, thiserror::Error)]
pub enum PicoschemaError {
    #[error("Picoschema: unsupported scalar type '{0}'")]
    UnsupportedScalarType(String),

    #[error("Picoschema: could not find schema with name '{0}'")]
    SchemaNotFound(String),

    #[error("Picoschema: failed to resolve schema '{name}': {source}")]
    Resolver {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Picoschema: parenthetical types must be 'object' or 'array', got: {0}")]
    ParentheticalType(String),

    #[error("Picoschema: enum values for '{0}' must be a list")]
    EnumValues(String),

    #[error("Picoschema: only consists of objects and strings. Got: {0}")]
    UnexpectedNode(Value),
}

/// Resolves named schemas referenced from Picoschema.
///
/// `Ok(None)` means the name is unknown.
pub trait SchemaResolver {
    fn lookup(&self, name: &str) -> anyhow::Result<Option<Schema>>;
}

impl<F> SchemaResolver for F
where
    F: Fn(&str) -> anyhow::Result<Option<Schema>>,
{
    fn lookup(&self, name: &str) -> anyhow::Result<Option<Schema>> {
        self(name)
    }
}

/// Compile a Picoschema node into JSON Schema.
///
/// `Value::Null` compiles to `None`. A mapping whose top-level keys are all
/// JSON Schema keywords and that has a recognized `type` is returned
/// unchanged; one with `properties` but no `type` gains `type: object`.
/// Anything else is read as shorthand.
pub fn compile(node: &Value, lookup: Option<&dyn SchemaResolver>) -> Result<Option<Schema>, PicoschemaError> {
    PicoschemaCompiler { lookup }.compile(node)
}

struct PicoschemaCompiler<'a> {
    lookup: Option<&'a dyn SchemaResolver>,
}

impl PicoschemaCompiler<'_> {
    fn compile(&self, node: &Value) -> Result<Option<Schema>, PicoschemaError> {
        match node {
            Value::Null => Ok(None),
            Value::Object(map) => match as_json_schema(map) {
                Some(schema) => Ok(Some(schema)),
                None => self.parse_object(map).map(Some),
            },
            other => self.parse_node(other).map(Some),
        }
    }

    fn parse_node(&self, node: &Value) -> Result<Schema, PicoschemaError> {
        match node {
            Value::String(s) => self.parse_type_name(s),
            Value::Object(map) => self.parse_object(map),
            other => Err(PicoschemaError::UnexpectedNode(other.clone())),
        }
    }

    /// `"string, the user's name"` or a named schema reference.
    fn parse_type_name(&self, source: &str) -> Result<Schema, PicoschemaError> {
        let (type_name, description) = extract_description(source);

        if !SCALAR_TYPES.contains(&type_name) {
            let resolved = self.resolve(type_name)?;
            return Ok(resolved.with_description(description));
        }

        let schema = if type_name == "any" {
            Schema::new()
        } else {
            Schema::of_type(type_name)
        };
        Ok(schema.with_description(description))
    }

    fn parse_object(&self, map: &Map<String, Value>) -> Result<Schema, PicoschemaError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut additional = None;

        for (key, value) in map {
            if key == WILDCARD_PROPERTY_NAME {
                additional = Some(self.parse_node(value)?);
                continue;
            }

            let (name, parenthetical) = match key.split_once('(') {
                Some((name, rest)) => (name, Some(rest.strip_suffix(')').unwrap_or(rest))),
                None => (key.as_str(), None),
            };
            let optional = name.ends_with('?');
            let property_name = name.strip_suffix('?').unwrap_or(name);

            if !optional {
                required.push(property_name.to_string());
            }

            let property = match parenthetical {
                None => {
                    let prop = self.parse_node(value)?;
                    if optional && prop.has_type() {
                        nullable(prop)
                    } else {
                        prop
                    }
                }
                Some(annotation) => self.parse_parenthetical(key, annotation, value, optional)?,
            };

            properties.insert(property_name.to_string(), property.into_value());
        }

        required.sort();
        required.dedup();

        let mut schema = Schema::of_type("object").with("properties", Value::Object(properties));
        if !required.is_empty() {
            schema = schema.with("required", json!(required));
        }
        if let Some(additional) = additional {
            schema = schema.with("additionalProperties", additional.into_value());
        }
        Ok(schema)
    }

    /// `tags(array, list of tags)`, `address(object)`, `status(enum)`.
    fn parse_parenthetical(
        &self,
        key: &str,
        annotation: &str,
        value: &Value,
        optional: bool,
    ) -> Result<Schema, PicoschemaError> {
        let (type_name, description) = extract_description(annotation);

        let schema = match type_name {
            "array" => {
                let items = self.parse_node(value)?.into_value();
                if optional {
                    Schema::new()
                        .with("items", items)
                        .with("anyOf", json!([{"type": "array"}, {"type": "null"}]))
                } else {
                    Schema::of_type("array").with("items", items)
                }
            }
            "object" => {
                let object = self.parse_node(value)?;
                if optional {
                    nullable(object)
                } else {
                    object
                }
            }
            "enum" => {
                let Value::Array(values) = value else {
                    return Err(PicoschemaError::EnumValues(key.to_string()));
                };
                let mut values = values.clone();
                if optional && !values.contains(&Value::Null) {
                    values.push(Value::Null);
                }
                Schema::new().with("enum", Value::Array(values))
            }
            other => return Err(PicoschemaError::ParentheticalType(other.to_string())),
        };

        Ok(schema.with_description(description))
    }

    /// Looks up a named schema. The caller owns the returned copy, so any
    /// description override leaves the registry untouched.
    fn resolve(&self, name: &str) -> Result<Schema, PicoschemaError> {
        let lookup = self
            .lookup
            .ok_or_else(|| PicoschemaError::UnsupportedScalarType(name.to_string()))?;

        match lookup.lookup(name) {
            Ok(Some(schema)) => Ok(schema),
            Ok(None) => Err(PicoschemaError::SchemaNotFound(name.to_string())),
            Err(source) => Err(PicoschemaError::Resolver {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Fast path for mappings that are already JSON Schema. Only the top-level
/// keys are checked; nested schemas are taken as written.
fn as_json_schema(map: &Map<String, Value>) -> Option<Schema> {
    if !map.keys().all(|key| is_json_schema_keyword(key)) {
        return None;
    }

    match map.get("type") {
        Some(schema_type) => is_json_schema_type_value(schema_type).then(|| Schema::from(map.clone())),
        None if map.get("properties").is_some_and(Value::is_object) => {
            Some(Schema::from(map.clone()).with("type", json!("object")))
        }
        None => None,
    }
}

/// `"string"` or a non-empty list such as `["string", "null"]`.
fn is_json_schema_type_value(value: &Value) -> bool {
    match value {
        Value::String(name) => is_json_schema_type(name),
        Value::Array(names) => {
            !names.is_empty() && names.iter().all(|n| n.as_str().is_some_and(is_json_schema_type))
        }
        _ => false,
    }
}

/// Widen a schema to also accept `null`.
fn nullable(schema: Schema) -> Schema {
    let description = schema.description().map(str::to_string);
    Schema::new()
        .with("anyOf", json!([schema.into_value(), {"type": "null"}]))
        .with_description(description)
}

/// Split `"type, description"`. Without a comma the input is the type name.
fn extract_description(input: &str) -> (&str, Option<String>) {
    match input.split_once(',') {
        Some((type_name, description)) => {
            let description = description.trim();
            let description = (!description.is_empty()).then(|| description.to_string());
            (type_name.trim(), description)
        }
        None => (input, None),
    }
}
