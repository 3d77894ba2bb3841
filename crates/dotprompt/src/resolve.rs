//! Metadata resolution
//!
//! Merges front matter, caller overrides and model defaults into the final
//! metadata of a render, then resolves tool names and compiles schemas.

use std::collections::HashMap;

use serde_json::Value;

use crate::picoschema::{self, PicoschemaError, SchemaResolver};
use crate::schema::Schema;
use crate::types::{ModelConfig, PromptMetadata, ToolDefinition};

/// Errors raised while resolving metadata
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Dotprompt: Unable to resolve tool '{0}' to a recognized tool definition")]
    UnresolvedTool(String),

    #[error("Dotprompt: failed to resolve tool '{name}': {source}")]
    ToolResolver {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Dotprompt: invalid {field} schema: {source}")]
    Schema {
        field: &'static str,
        #[source]
        source: PicoschemaError,
    },
}

/// Resolves tool names that are not in the local registry.
///
/// `Ok(None)` and an empty definition both mean the tool is unknown.
pub trait ToolResolver {
    fn resolve(&self, name: &str) -> anyhow::Result<Option<ToolDefinition>>;
}

impl<F> ToolResolver for F
where
    F: Fn(&str) -> anyhow::Result<Option<ToolDefinition>>,
{
    fn resolve(&self, name: &str) -> anyhow::Result<Option<ToolDefinition>> {
        self(name)
    }
}

/// Borrowed view of the registries a compiler instance owns.
pub struct MetadataResolver<'a> {
    pub default_model: Option<&'a str>,
    pub model_configs: &'a HashMap<String, ModelConfig>,
    pub tools: &'a HashMap<String, ToolDefinition>,
    pub tool_resolver: Option<&'a dyn ToolResolver>,
    pub schemas: &'a HashMap<String, Schema>,
    pub schema_resolver: Option<&'a dyn SchemaResolver>,
}

impl MetadataResolver<'_> {
    /// Override model, then front-matter model, then the instance default.
    pub fn effective_model(&self, parsed: &PromptMetadata, overrides: Option<&PromptMetadata>) -> Option<String> {
        let non_empty = |m: &PromptMetadata| m.model.clone().filter(|s| !s.is_empty());
        overrides
            .and_then(non_empty)
            .or_else(|| non_empty(parsed))
            .or_else(|| self.default_model.map(str::to_string))
    }

    /// Merge `default config ← parsed ← overrides`, then resolve tools and
    /// compile input/output schemas.
    pub fn resolve(
        &self,
        parsed: &PromptMetadata,
        overrides: Option<&PromptMetadata>,
    ) -> Result<PromptMetadata, ResolveError> {
        let model = self.effective_model(parsed, overrides);
        let config = model
            .as_deref()
            .and_then(|m| self.model_configs.get(m))
            .cloned()
            .unwrap_or_default();

        let mut out = PromptMetadata {
            model,
            config,
            ..PromptMetadata::default()
        };
        out.merge(parsed);
        if let Some(overrides) = overrides {
            out.merge(overrides);
        }

        self.resolve_tools(&mut out)?;
        self.compile_schemas(&mut out)?;
        Ok(out)
    }

    /// Move every tool name that resolves to a definition into `tool_defs`.
    /// Names nobody knows stay in `tools` for the generation backend.
    fn resolve_tools(&self, meta: &mut PromptMetadata) -> Result<(), ResolveError> {
        let mut unresolved = Vec::new();

        for name in std::mem::take(&mut meta.tools) {
            if let Some(tool) = self.tools.get(&name) {
                tracing::debug!(tool = %name, "resolved tool from registry");
                meta.tool_defs.push(tool.clone());
                continue;
            }

            let Some(resolver) = self.tool_resolver else {
                tracing::debug!(tool = %name, "leaving tool unresolved");
                unresolved.push(name);
                continue;
            };

            match resolver.resolve(&name) {
                Ok(Some(tool)) if !tool.is_empty() => {
                    tracing::debug!(tool = %name, "resolved tool via resolver");
                    meta.tool_defs.push(tool);
                }
                Ok(_) => return Err(ResolveError::UnresolvedTool(name)),
                Err(source) => return Err(ResolveError::ToolResolver { name, source }),
            }
        }

        meta.tools = unresolved;
        Ok(())
    }

    fn compile_schemas(&self, meta: &mut PromptMetadata) -> Result<(), ResolveError> {
        if let Some(input) = meta.input.as_mut() {
            input.schema = self.compile_schema("input", input.schema.take())?;
        }
        if let Some(output) = meta.output.as_mut() {
            output.schema = self.compile_schema("output", output.schema.take())?;
        }
        Ok(())
    }

    fn compile_schema(&self, field: &'static str, schema: Option<Value>) -> Result<Option<Value>, ResolveError> {
        let Some(schema) = schema else {
            return Ok(None);
        };
        let compiled = picoschema::compile(&schema, Some(self))
            .map_err(|source| ResolveError::Schema { field, source })?;
        Ok(compiled.map(Schema::into_value))
    }
}

/// Local registry first, then the external resolver.
impl SchemaResolver for MetadataResolver<'_> {
    fn lookup(&self, name: &str) -> anyhow::Result<Option<Schema>> {
        if let Some(schema) = self.schemas.get(name) {
            return Ok(Some(schema.clone()));
        }
        match self.schema_resolver {
            Some(resolver) => resolver.lookup(name),
            None => Ok(None),
        }
    }
}
