//! Core data model shared by the parser, resolver and message assembler.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to messages, parts and prompts.
pub type Metadata = Map<String, Value>;

/// Model configuration. Not every model honors every key.
pub type ModelConfig = Map<String, Value>;

/// Metadata key carrying the purpose of a message or pending part.
pub const PURPOSE_KEY: &str = "purpose";

/// Purpose value tagging messages that were spliced in from history.
pub const HISTORY_PURPOSE: &str = "history";

/// Metadata key carrying the pending flag of a [`Part::Pending`].
pub const PENDING_KEY: &str = "pending";

/// The role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not one of the four known roles.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "model" => Ok(Self::Model),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A media reference inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One piece of message content.
///
/// Serialized without a tag: the variant is identified by its payload key
/// (`text`, `media`, `toolRequest`, `toolResponse`, `data`). A part that only
/// carries metadata is a pending placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    Media {
        media: Media,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    #[serde(rename_all = "camelCase")]
    ToolRequest {
        tool_request: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResponse {
        tool_response: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    Data {
        data: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    Pending { metadata: Metadata },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn media(url: impl Into<String>, content_type: Option<String>) -> Self {
        Self::Media {
            media: Media {
                url: url.into(),
                content_type,
            },
            metadata: None,
        }
    }

    /// A pending placeholder with the pending flag set.
    pub fn pending() -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(PENDING_KEY.to_string(), Value::Bool(true));
        Self::Pending { metadata }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Text { metadata, .. }
            | Self::Media { metadata, .. }
            | Self::ToolRequest { metadata, .. }
            | Self::ToolResponse { metadata, .. }
            | Self::Data { metadata, .. } => metadata.as_ref(),
            Self::Pending { metadata } => Some(metadata),
        }
    }

    /// Sets a metadata entry, creating the mapping if needed.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        match self {
            Self::Text { metadata, .. }
            | Self::Media { metadata, .. }
            | Self::ToolRequest { metadata, .. }
            | Self::ToolResponse { metadata, .. }
            | Self::Data { metadata, .. } => {
                metadata.get_or_insert_with(Metadata::new).insert(key.into(), value);
            }
            Self::Pending { metadata } => {
                metadata.insert(key.into(), value);
            }
        }
    }

    /// Only pending parts with a boolean `true` flag count as pending.
    pub fn is_pending(&self) -> bool {
        match self {
            Self::Pending { metadata } => {
                matches!(metadata.get(PENDING_KEY), Some(Value::Bool(true)))
            }
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Message {
    pub fn new(role: Role, content: Vec<Part>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// Convenience constructor for a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    /// Whether this message was spliced in from conversation history.
    pub fn is_history(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(PURPOSE_KEY))
            .and_then(Value::as_str)
            == Some(HISTORY_PURPOSE)
    }
}

/// A reference document supplied at render time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Everything a prompt needs at render time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataArgument {
    /// Input variables for the template
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, Value>,

    /// Relevant documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docs: Vec<Document>,

    /// Previous turns of a multi-turn conversation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    /// Exposed to the template under the reserved `context` variable
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl DataArgument {
    pub fn with_input(input: Map<String, Value>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }
}

/// A tool that a prompt may use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True for the zero definition a resolver returns when it knows nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Input variable configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptInput {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub default: Map<String, Value>,

    /// Picoschema, JSON Schema or a schema name; compiled JSON Schema once
    /// resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Desired model output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Structured prompt metadata decoded from front matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model id, e.g. `vertexai/gemini-1.0-pro`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Maximum number of tool-use turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// Names of tools registered elsewhere
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Fully specified tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_defs: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: ModelConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PromptInput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PromptOutput>,

    /// Front matter exactly as decoded, for custom consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,

    /// Dotted front-matter keys grouped by namespace: `myext.foo` lands in
    /// `ext["myext"]["foo"]`. Only the last dot splits.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl PromptMetadata {
    /// Overlays `other` on top of `self`.
    ///
    /// Only non-empty fields of `other` overwrite. Config maps merge key by
    /// key with `other` winning, and `input`/`output` merge field by field;
    /// every other field is replaced wholesale.
    pub fn merge(&mut self, other: &PromptMetadata) {
        fn overlay<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        fn overlay_str(dst: &mut Option<String>, src: &Option<String>) {
            if let Some(s) = src.as_deref().filter(|s| !s.is_empty()) {
                *dst = Some(s.to_string());
            }
        }

        overlay_str(&mut self.name, &other.name);
        overlay_str(&mut self.variant, &other.variant);
        overlay_str(&mut self.version, &other.version);
        overlay_str(&mut self.description, &other.description);
        overlay_str(&mut self.model, &other.model);
        if other.max_turns.is_some_and(|n| n > 0) {
            self.max_turns = other.max_turns;
        }
        if !other.tools.is_empty() {
            self.tools.clone_from(&other.tools);
        }
        if !other.tool_defs.is_empty() {
            self.tool_defs.clone_from(&other.tool_defs);
        }
        for (key, value) in &other.config {
            self.config.insert(key.clone(), value.clone());
        }
        if let Some(input) = other.input.as_ref().filter(|i| **i != PromptInput::default()) {
            let dst = self.input.get_or_insert_with(PromptInput::default);
            if !input.default.is_empty() {
                dst.default.clone_from(&input.default);
            }
            overlay(&mut dst.schema, &input.schema);
        }
        if let Some(output) = other.output.as_ref().filter(|o| **o != PromptOutput::default()) {
            let dst = self.output.get_or_insert_with(PromptOutput::default);
            overlay_str(&mut dst.format, &output.format);
            overlay(&mut dst.schema, &output.schema);
        }
        overlay(&mut self.raw, &other.raw);
        if !other.ext.is_empty() {
            self.ext.clone_from(&other.ext);
        }
        overlay(&mut self.metadata, &other.metadata);
    }

    pub fn input_schema(&self) -> Option<&Value> {
        self.input.as_ref().and_then(|i| i.schema.as_ref())
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.output.as_ref().and_then(|o| o.schema.as_ref())
    }
}

/// A prompt split into metadata and template body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrompt {
    #[serde(flatten)]
    pub metadata: PromptMetadata,

    /// Template source with the front matter removed
    pub template: String,
}

/// The terminal artifact of a render call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    #[serde(flatten)]
    pub metadata: PromptMetadata,

    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Model, Role::System, Role::Tool] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("assistant".parse::<Role>(), Err(UnknownRole("assistant".into())));
    }

    #[test]
    fn test_part_json_shapes() {
        let media = Part::media("https://x/y.png", Some("image/png".into()));
        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            json!({"media": {"url": "https://x/y.png", "contentType": "image/png"}})
        );

        let pending = Part::pending();
        assert_eq!(
            serde_json::to_value(&pending).unwrap(),
            json!({"metadata": {"pending": true}})
        );

        let parsed: Part = serde_json::from_value(json!({"toolRequest": {"name": "x"}})).unwrap();
        assert!(matches!(parsed, Part::ToolRequest { .. }));

        let parsed: Part = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(parsed, Part::text("hi"));
    }

    #[test]
    fn test_pending_flag() {
        let mut part = Part::pending();
        assert!(part.is_pending());
        part.set_metadata(PENDING_KEY, Value::Bool(false));
        assert!(!part.is_pending());
        assert!(!Part::text("x").is_pending());
    }

    #[test]
    fn test_merge_prefers_non_empty_fields() {
        let mut base = PromptMetadata {
            model: Some("base-model".into()),
            name: Some("base".into()),
            config: serde_json::from_value(json!({"temperature": 0.1, "topK": 3})).unwrap(),
            ..Default::default()
        };
        let over = PromptMetadata {
            model: Some("override".into()),
            name: Some(String::new()),
            config: serde_json::from_value(json!({"temperature": 0.9})).unwrap(),
            ..Default::default()
        };

        base.merge(&over);

        assert_eq!(base.model.as_deref(), Some("override"));
        assert_eq!(base.name.as_deref(), Some("base"));
        assert_eq!(
            Value::Object(base.config),
            json!({"temperature": 0.9, "topK": 3})
        );
    }

    #[test]
    fn test_merge_input_and_output_field_by_field() {
        let mut base = PromptMetadata {
            input: Some(PromptInput {
                default: serde_json::from_value(json!({"name": "World"})).unwrap(),
                schema: Some(json!({"name?": "string"})),
            }),
            output: Some(PromptOutput {
                format: Some("json".into()),
                schema: Some(json!({"answer": "string"})),
            }),
            ..Default::default()
        };
        let over = PromptMetadata {
            input: Some(PromptInput::default()),
            output: Some(PromptOutput {
                format: Some("text".into()),
                schema: None,
            }),
            ..Default::default()
        };

        base.merge(&over);

        let input = base.input.as_ref().unwrap();
        assert_eq!(input.default.get("name"), Some(&json!("World")));
        assert_eq!(input.schema, Some(json!({"name?": "string"})));
        assert_eq!(
            base.output,
            Some(PromptOutput {
                format: Some("text".into()),
                schema: Some(json!({"answer": "string"})),
            })
        );

        let mut empty = PromptMetadata::default();
        empty.merge(&over);
        assert!(empty.input.is_none());
        assert_eq!(empty.output.and_then(|o| o.format).as_deref(), Some("text"));
    }

    #[test]
    fn test_history_detection() {
        let mut msg = Message::text(Role::User, "hi");
        assert!(!msg.is_history());
        msg.metadata = Some(
            serde_json::from_value(json!({"purpose": "history"})).unwrap(),
        );
        assert!(msg.is_history());
    }
}
