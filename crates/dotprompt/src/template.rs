//! Template engine seam
//!
//! The compiler never interprets template syntax itself. It registers helpers
//! and partials on a [`TemplateEngine`], compiles the body once and renders it
//! per call. [`MiniJinjaEngine`] is the default implementation.

use std::sync::{Arc, LazyLock};

use minijinja::value::{Kwargs, Rest};
use minijinja::{AutoEscape, Environment, ErrorKind};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::markers;

/// Variable under which render-time context is exposed to templates.
pub const CONTEXT_VARIABLE: &str = "context";

/// Name the prompt body is registered under inside the engine.
const PROMPT_TEMPLATE_NAME: &str = "__dotprompt__";

/// A user-defined helper. Receives positional arguments as JSON values and
/// returns the text to insert.
pub type Helper = Arc<dyn Fn(&[Value]) -> anyhow::Result<String> + Send + Sync>;

/// Errors raised by a template engine
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to compile template '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("failed to render template: {0}")]
    Render(String),
}

/// Helpers every engine provides. Each one emits a marker or serialized data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHelper {
    /// `role(name)`
    Role,
    /// `history()`
    History,
    /// `section(name)`
    Section,
    /// `media(url=…, contentType=…)`
    Media,
    /// `json(value, indent=N)`
    Json,
}

impl BuiltinHelper {
    pub const ALL: [BuiltinHelper; 5] = [
        BuiltinHelper::Role,
        BuiltinHelper::History,
        BuiltinHelper::Section,
        BuiltinHelper::Media,
        BuiltinHelper::Json,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::History => "history",
            Self::Section => "section",
            Self::Media => "media",
            Self::Json => "json",
        }
    }
}

/// A swappable template engine.
pub trait TemplateEngine {
    fn register_builtin(&mut self, builtin: BuiltinHelper);

    fn register_helper(&mut self, name: &str, helper: Helper);

    fn register_partial(&mut self, name: &str, source: &str) -> Result<(), TemplateError>;

    /// Names of partials referenced from `source`, in order of appearance.
    fn partial_references(&self, source: &str) -> Vec<String>;

    /// Compile the prompt body. Must be called before [`render`](Self::render).
    fn compile(&mut self, source: &str) -> Result<(), TemplateError>;

    /// Render the compiled body. `context` is exposed under
    /// [`CONTEXT_VARIABLE`].
    fn render(&self, input: &Map<String, Value>, context: &Map<String, Value>) -> Result<String, TemplateError>;
}

static INCLUDE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']"#).expect("valid include regex")
});

/// [`TemplateEngine`] backed by minijinja. Output is never auto-escaped.
///
/// Partials are ordinary templates pulled in with `{% include "name" %}`.
pub struct MiniJinjaEngine {
    env: Environment<'static>,
}

impl MiniJinjaEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env }
    }
}

impl Default for MiniJinjaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MiniJinjaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniJinjaEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine for MiniJinjaEngine {
    fn register_builtin(&mut self, builtin: BuiltinHelper) {
        let name = builtin.name();
        match builtin {
            BuiltinHelper::Role => {
                self.env
                    .add_function(name, |role: String| -> Result<String, minijinja::Error> {
                        Ok(markers::role_marker(&role))
                    });
            }
            BuiltinHelper::History => {
                self.env
                    .add_function(name, || -> Result<String, minijinja::Error> { Ok(markers::history_marker()) });
            }
            BuiltinHelper::Section => {
                self.env
                    .add_function(name, |section: String| -> Result<String, minijinja::Error> {
                        Ok(markers::section_marker(&section))
                    });
            }
            BuiltinHelper::Media => {
                self.env.add_function(name, media_helper);
            }
            BuiltinHelper::Json => {
                self.env.add_function(name, json_helper);
            }
        }
    }

    fn register_helper(&mut self, name: &str, helper: Helper) {
        self.env.add_function(
            name.to_string(),
            move |args: Rest<minijinja::Value>| -> Result<String, minijinja::Error> {
                let args = args
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| invalid_operation(e.to_string()))?;
                helper(&args).map_err(|e| invalid_operation(format!("{e:#}")))
            },
        );
    }

    fn register_partial(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(|e| TemplateError::Compile {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn partial_references(&self, source: &str) -> Vec<String> {
        INCLUDE_TAG
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect()
    }

    fn compile(&mut self, source: &str) -> Result<(), TemplateError> {
        self.register_partial(PROMPT_TEMPLATE_NAME, source)
    }

    fn render(&self, input: &Map<String, Value>, context: &Map<String, Value>) -> Result<String, TemplateError> {
        let mut root = input.clone();
        root.insert(CONTEXT_VARIABLE.to_string(), Value::Object(context.clone()));

        self.env
            .get_template(PROMPT_TEMPLATE_NAME)
            .and_then(|tmpl| tmpl.render(Value::Object(root)))
            .map_err(|e| TemplateError::Render(e.to_string()))
    }
}

fn invalid_operation(message: impl Into<String>) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, message.into())
}

fn media_helper(kwargs: Kwargs) -> Result<String, minijinja::Error> {
    let url: String = kwargs.get("url")?;
    let content_type: Option<String> = kwargs.get("contentType")?;
    kwargs.assert_all_used()?;
    Ok(markers::media_marker(&url, content_type.as_deref()))
}

fn json_helper(value: minijinja::Value, kwargs: Kwargs) -> Result<String, minijinja::Error> {
    let indent: Option<usize> = kwargs.get("indent")?;
    kwargs.assert_all_used()?;

    let value = serde_json::to_value(&value).map_err(|e| invalid_operation(e.to_string()))?;
    let Some(indent) = indent else {
        return serde_json::to_string(&value).map_err(|e| invalid_operation(e.to_string()));
    };

    let indent = " ".repeat(indent);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| invalid_operation(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| invalid_operation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine_with_builtins() -> MiniJinjaEngine {
        let mut engine = MiniJinjaEngine::new();
        for builtin in BuiltinHelper::ALL {
            engine.register_builtin(builtin);
        }
        engine
    }

    fn render(engine: &mut MiniJinjaEngine, source: &str, input: Value) -> String {
        engine.compile(source).unwrap();
        let Value::Object(input) = input else { panic!("input must be an object") };
        engine.render(&input, &Map::new()).unwrap()
    }

    #[test]
    fn test_builtin_helpers_emit_markers() {
        let mut engine = engine_with_builtins();
        let out = render(
            &mut engine,
            r#"{{ role("system") }}{{ history() }}{{ section("code") }}{{ media(url=u, contentType="image/png") }}{{ media(url=u) }}"#,
            json!({"u": "https://x/y.png"}),
        );
        assert_eq!(
            out,
            "<<<dotprompt:role:system>>><<<dotprompt:history>>><<<dotprompt:section code>>>\
             <<<dotprompt:media:url https://x/y.png image/png>>><<<dotprompt:media:url https://x/y.png>>>"
        );
    }

    #[test]
    fn test_json_helper() {
        let mut engine = engine_with_builtins();
        let out = render(&mut engine, "{{ json(data) }}", json!({"data": {"a": 1}}));
        assert_eq!(out, r#"{"a":1}"#);

        let mut engine = engine_with_builtins();
        let out = render(&mut engine, "{{ json(data, indent=2) }}", json!({"data": {"a": 1}}));
        assert_eq!(out, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_no_auto_escaping() {
        let mut engine = MiniJinjaEngine::new();
        let out = render(&mut engine, "{{ text }}", json!({"text": "<b>&</b>"}));
        assert_eq!(out, "<b>&</b>");
    }

    #[test]
    fn test_user_helper_receives_json_args() {
        let mut engine = MiniJinjaEngine::new();
        let helper: Helper = Arc::new(|args: &[Value]| Ok(format!("{}!", args.len())));
        engine.register_helper("count", helper);
        let out = render(&mut engine, r#"{{ count(1, "two", [3]) }}"#, json!({}));
        assert_eq!(out, "3!");
    }

    #[test]
    fn test_context_variable() {
        let mut engine = MiniJinjaEngine::new();
        engine.compile("{{ context.state.mood }}").unwrap();
        let context = serde_json::from_value(json!({"state": {"mood": "calm"}})).unwrap();
        assert_eq!(engine.render(&Map::new(), &context).unwrap(), "calm");
    }

    #[test]
    fn test_partials_and_references() {
        let mut engine = MiniJinjaEngine::new();
        engine.register_partial("greeting", "Hello {{ name }}").unwrap();
        let source = r#"{% include "greeting" %} and {%- include 'other' %}"#;
        assert_eq!(engine.partial_references(source), vec!["greeting", "other"]);

        let out = render(&mut engine, r#"{% include "greeting" %}!"#, json!({"name": "Ada"}));
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let mut engine = MiniJinjaEngine::new();
        let err = engine.compile("{{ unclosed").unwrap_err();
        assert!(matches!(err, TemplateError::Compile { .. }));
    }
}
