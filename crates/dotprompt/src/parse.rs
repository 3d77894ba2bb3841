//! Prompt document parsing
//!
//! A `.prompt` document is an optional YAML front-matter block delimited by
//! `---` lines followed by a template body. Front matter is decoded into a
//! typed [`PromptMetadata`]; dotted keys become namespaced extensions.
//!
//! Parsing never fails. Front matter that does not decode as a mapping is
//! logged and the whole document is treated as template text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::types::{ParsedPrompt, PromptInput, PromptMetadata, PromptOutput, ToolDefinition};

/// Front-matter keys with a typed home in [`PromptMetadata`]. Kept sorted.
pub const RESERVED_METADATA_KEYWORDS: [&str; 13] = [
    "config",
    "description",
    "ext",
    "input",
    "maxTurns",
    "model",
    "name",
    "output",
    "raw",
    "toolDefs",
    "tools",
    "variant",
    "version",
];

static FRONTMATTER_AND_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---\s*(?:\r\n|\r|\n)([\s\S]*?)(?:\r\n|\r|\n)---\s*(?:\r\n|\r|\n)([\s\S]*)$")
        .expect("valid frontmatter regex")
});

static EMPTY_FRONTMATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---\s*(?:\r\n|\r|\n)---\s*(?:\r\n|\r|\n)([\s\S]*)$").expect("valid frontmatter regex")
});

enum Frontmatter<'a> {
    Present { yaml: &'a str, body: &'a str },
    Empty { body: &'a str },
    Absent,
}

fn split_frontmatter(source: &str) -> Frontmatter<'_> {
    if let Some(caps) = FRONTMATTER_AND_BODY.captures(source) {
        let yaml = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        if yaml.is_empty() {
            return Frontmatter::Empty { body };
        }
        return Frontmatter::Present { yaml, body };
    }
    if let Some(caps) = EMPTY_FRONTMATTER.captures(source) {
        return Frontmatter::Empty {
            body: caps.get(1).map_or("", |m| m.as_str()),
        };
    }
    Frontmatter::Absent
}

/// Parse a prompt document into metadata and template body.
pub fn parse_document(source: &str) -> ParsedPrompt {
    match split_frontmatter(source) {
        Frontmatter::Present { yaml, body } => match decode_frontmatter(yaml) {
            Ok(raw) => ParsedPrompt {
                metadata: metadata_from_frontmatter(raw),
                template: body.trim().to_string(),
            },
            Err(reason) => {
                tracing::warn!(%reason, "failed to parse YAML frontmatter, rendering document as plain text");
                ParsedPrompt {
                    metadata: PromptMetadata::default(),
                    template: trim_unicode_spaces_except_newlines(source),
                }
            }
        },
        Frontmatter::Empty { body } => ParsedPrompt {
            metadata: PromptMetadata::default(),
            template: trim_unicode_spaces_except_newlines(body),
        },
        Frontmatter::Absent => ParsedPrompt {
            metadata: PromptMetadata::default(),
            template: trim_unicode_spaces_except_newlines(source),
        },
    }
}

/// Decode front matter into a mapping. A document with only comments decodes
/// to an empty mapping; scalars and sequences are rejected.
fn decode_frontmatter(yaml: &str) -> Result<Map<String, Value>, String> {
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!("frontmatter is not a mapping: {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Route front-matter keys onto typed fields and extensions. Values of the
/// wrong shape are dropped, never reported.
fn metadata_from_frontmatter(raw: Map<String, Value>) -> PromptMetadata {
    let mut metadata = PromptMetadata::default();

    for (key, value) in &raw {
        if RESERVED_METADATA_KEYWORDS.contains(&key.as_str()) {
            match key.as_str() {
                "name" => metadata.name = string_or_none(value),
                "description" => metadata.description = string_or_none(value),
                "variant" => metadata.variant = string_or_none(value),
                "version" => metadata.version = string_or_none(value),
                "model" => metadata.model = string_or_none(value),
                "maxTurns" => {
                    metadata.max_turns = value.as_u64().and_then(|n| u32::try_from(n).ok());
                }
                "config" => {
                    if let Value::Object(config) = value {
                        metadata.config = config.clone();
                    }
                }
                "tools" => {
                    if let Value::Array(tools) = value {
                        metadata.tools = tools
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect();
                    }
                }
                "toolDefs" => {
                    if let Value::Array(defs) = value {
                        metadata.tool_defs = defs.iter().filter_map(tool_definition).collect();
                    }
                }
                "input" => metadata.input = value.as_object().map(prompt_input),
                "output" => metadata.output = value.as_object().map(prompt_output),
                // `raw` and `ext` are computed, never read from the document.
                _ => {}
            }
        } else if let Some((namespace, field)) = key.rsplit_once('.') {
            if RESERVED_METADATA_KEYWORDS.contains(&namespace) {
                tracing::debug!(key = %key, "skipping extension key in a reserved namespace");
                continue;
            }
            metadata
                .ext
                .entry(namespace.to_string())
                .or_default()
                .insert(field.to_string(), value.clone());
        }
    }

    metadata.raw = Some(raw);
    metadata
}

fn string_or_none(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn schema_field(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| v.is_object() || v.is_string()).cloned()
}

fn tool_definition(value: &Value) -> Option<ToolDefinition> {
    let def = value.as_object()?;
    Some(ToolDefinition {
        name: def.get("name").and_then(string_or_none).unwrap_or_default(),
        description: def.get("description").and_then(string_or_none),
        input_schema: def.get("inputSchema").filter(|v| v.is_object()).cloned(),
        output_schema: def.get("outputSchema").filter(|v| v.is_object()).cloned(),
    })
}

fn prompt_input(input: &Map<String, Value>) -> PromptInput {
    PromptInput {
        default: input
            .get("default")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        schema: schema_field(input.get("schema")),
    }
}

fn prompt_output(output: &Map<String, Value>) -> PromptOutput {
    PromptOutput {
        format: output.get("format").and_then(string_or_none),
        schema: schema_field(output.get("schema")),
    }
}

/// Drop Unicode whitespace other than `\n`, `\r` and plain spaces, then trim
/// leading and trailing whitespace that is not a line break.
pub fn trim_unicode_spaces_except_newlines(s: &str) -> String {
    let kept: String = s
        .chars()
        .filter(|&c| !c.is_whitespace() || matches!(c, '\n' | '\r' | ' '))
        .collect();
    kept.trim_matches(|c: char| c.is_whitespace() && c != '\n' && c != '\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_full_frontmatter() {
        let source = "---\nname: greet\nmodel: googleai/gemini-pro\nmaxTurns: 3\nconfig:\n  temperature: 0.5\ntools: [search, 42, lookup]\ninput:\n  default:\n    who: world\n  schema:\n    who: string\noutput:\n  format: json\n  schema: Greeting\nmyext.foo: 123\nmyext.bar: baz\n---\nHello {{ who }}!\n";

        let parsed = parse_document(source);
        let meta = &parsed.metadata;

        assert_eq!(parsed.template, "Hello {{ who }}!");
        assert_eq!(meta.name.as_deref(), Some("greet"));
        assert_eq!(meta.model.as_deref(), Some("googleai/gemini-pro"));
        assert_eq!(meta.max_turns, Some(3));
        assert_eq!(Value::Object(meta.config.clone()), json!({"temperature": 0.5}));
        assert_eq!(meta.tools, vec!["search", "lookup"]);
        assert_eq!(meta.input_schema(), Some(&json!({"who": "string"})));
        assert_eq!(
            meta.input.as_ref().map(|i| Value::Object(i.default.clone())),
            Some(json!({"who": "world"}))
        );
        assert_eq!(meta.output_schema(), Some(&json!("Greeting")));
        assert_eq!(
            meta.output.as_ref().and_then(|o| o.format.as_deref()),
            Some("json")
        );
        assert_eq!(
            Value::Object(meta.ext["myext"].clone()),
            json!({"foo": 123, "bar": "baz"})
        );
        assert_eq!(meta.raw.as_ref().map(|r| r.len()), Some(9));
    }

    #[test]
    fn test_wrong_shapes_are_dropped() {
        let parsed = parse_document("---\nmodel: 42\nconfig: nope\ntools: search\nmaxTurns: -1\n---\nbody");
        let meta = &parsed.metadata;

        assert_eq!(meta.model, None);
        assert!(meta.config.is_empty());
        assert!(meta.tools.is_empty());
        assert_eq!(meta.max_turns, None);
        assert_eq!(meta.raw.as_ref().map(|r| r["model"].clone()), Some(json!(42)));
    }

    #[test]
    fn test_no_frontmatter() {
        let parsed = parse_document("  Just a template\twith a tab.  ");
        assert_eq!(parsed.metadata, PromptMetadata::default());
        assert_eq!(parsed.template, "Just a templatewith a tab.");
    }

    #[test]
    fn test_empty_frontmatter() {
        let parsed = parse_document("---\n---\nHello there\n");
        assert_eq!(parsed.metadata, PromptMetadata::default());
        assert_eq!(parsed.template, "Hello there\n");
    }

    #[test]
    fn test_crlf_frontmatter() {
        let parsed = parse_document("---\r\nname: crlf\r\n---\r\nBody\r\n");
        assert_eq!(parsed.metadata.name.as_deref(), Some("crlf"));
        assert_eq!(parsed.template, "Body");
    }

    #[test]
    fn test_broken_frontmatter_renders_whole_source() {
        let source = "---\nname: [unclosed\n---\nHello";
        let parsed = parse_document(source);
        assert_eq!(parsed.metadata, PromptMetadata::default());
        assert_eq!(parsed.template, source);
    }

    #[test]
    fn test_scalar_frontmatter_degrades() {
        let source = "---\njust some text\n---\nHello";
        let parsed = parse_document(source);
        assert_eq!(parsed.metadata, PromptMetadata::default());
        assert_eq!(parsed.template, source);
    }

    #[test]
    fn test_nested_namespace_splits_on_last_dot() {
        let parsed = parse_document("---\na.b.c: 1\nconfig.temperature: 2\nplain: 3\n---\nx");
        let ext = &parsed.metadata.ext;

        assert_eq!(ext.len(), 1);
        assert_eq!(Value::Object(ext["a.b"].clone()), json!({"c": 1}));
        assert!(parsed.metadata.raw.as_ref().unwrap().contains_key("plain"));
    }

    #[test]
    fn test_tool_defs() {
        let parsed = parse_document(
            "---\ntoolDefs:\n  - name: search\n    description: web search\n    inputSchema:\n      type: object\n  - nope\n---\nx",
        );
        assert_eq!(
            parsed.metadata.tool_defs,
            vec![ToolDefinition {
                name: "search".into(),
                description: Some("web search".into()),
                input_schema: Some(json!({"type": "object"})),
                output_schema: None,
            }]
        );
    }

    #[test]
    fn test_trim_unicode_spaces() {
        assert_eq!(
            trim_unicode_spaces_except_newlines("\u{00A0} \nline\u{2003}one\r\n \u{3000}"),
            "\nlineone\r\n"
        );
    }
}
