//! The compiler façade
//!
//! [`Dotprompt`] owns the helper, partial, tool and schema registries and ties
//! the pipeline together: parse the source, register helpers and partials on a
//! fresh template engine, compile the body, and on each render resolve the
//! metadata, render the body and assemble messages.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{DotpromptError, Result};
use crate::messages::to_messages;
use crate::parse::parse_document;
use crate::picoschema::{self, SchemaResolver};
use crate::resolve::{MetadataResolver, ToolResolver};
use crate::schema::Schema;
use crate::store::{LoadOptions, PromptStore};
use crate::template::{BuiltinHelper, Helper, MiniJinjaEngine, TemplateEngine};
use crate::types::{DataArgument, ModelConfig, ParsedPrompt, PromptMetadata, RenderedPrompt, ToolDefinition};

/// Constructor options for [`Dotprompt`]. Every field is optional.
///
/// ```yaml
/// defaultModel: googleai/gemini-1.5-pro
/// modelConfigs:
///   googleai/gemini-1.5-pro:
///     temperature: 0.2
/// partials:
///   footer: "Thanks!"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DotpromptOptions {
    /// Model used when neither the prompt nor the caller names one
    pub default_model: Option<String>,

    /// Per-model default configuration
    pub model_configs: HashMap<String, ModelConfig>,

    /// Partial templates by name
    pub partials: HashMap<String, String>,

    /// Tool definitions by name
    pub tools: HashMap<String, ToolDefinition>,

    /// JSON Schemas referenced by name from Picoschema
    pub schemas: HashMap<String, Schema>,
}

impl DotpromptOptions {
    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }
}

/// Loads the source of a partial the registry does not know.
pub trait PartialResolver {
    fn resolve_partial(&self, name: &str) -> anyhow::Result<Option<String>>;
}

impl<F> PartialResolver for F
where
    F: Fn(&str) -> anyhow::Result<Option<String>>,
{
    fn resolve_partial(&self, name: &str) -> anyhow::Result<Option<String>> {
        self(name)
    }
}

/// Serves partials from a [`PromptStore`].
struct StorePartials<S>(S);

impl<S: PromptStore> PartialResolver for StorePartials<S> {
    fn resolve_partial(&self, name: &str) -> anyhow::Result<Option<String>> {
        let partial = self.0.load_partial(name, &LoadOptions::default())?;
        Ok(partial.map(|p| p.source))
    }
}

type EngineFactory = Box<dyn Fn() -> Box<dyn TemplateEngine>>;

/// Prompt compiler and renderer.
pub struct Dotprompt {
    default_model: Option<String>,
    model_configs: HashMap<String, ModelConfig>,
    helpers: BTreeMap<String, Helper>,
    partials: BTreeMap<String, String>,
    tools: HashMap<String, ToolDefinition>,
    schemas: HashMap<String, Schema>,
    tool_resolver: Option<Box<dyn ToolResolver>>,
    schema_resolver: Option<Box<dyn SchemaResolver>>,
    partial_resolver: Option<Box<dyn PartialResolver>>,
    engine: EngineFactory,
}

impl Default for Dotprompt {
    fn default() -> Self {
        Self::new(DotpromptOptions::default())
    }
}

impl std::fmt::Debug for Dotprompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dotprompt")
            .field("default_model", &self.default_model)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Dotprompt {
    pub fn new(options: DotpromptOptions) -> Self {
        Self {
            default_model: options.default_model,
            model_configs: options.model_configs,
            helpers: BTreeMap::new(),
            partials: options.partials.into_iter().collect(),
            tools: options.tools,
            schemas: options.schemas,
            tool_resolver: None,
            schema_resolver: None,
            partial_resolver: None,
            engine: Box::new(|| Box::new(MiniJinjaEngine::new()) as Box<dyn TemplateEngine>),
        }
    }

    /// Register a helper. A helper named like a builtin replaces it.
    pub fn define_helper<F>(&mut self, name: impl Into<String>, helper: F) -> &mut Self
    where
        F: Fn(&[Value]) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    pub fn define_partial(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.partials.insert(name.into(), source.into());
        self
    }

    pub fn define_tool(&mut self, tool: ToolDefinition) -> &mut Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    pub fn define_schema(&mut self, name: impl Into<String>, schema: Schema) -> &mut Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    pub fn lookup_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn with_tool_resolver(mut self, resolver: impl ToolResolver + 'static) -> Self {
        self.tool_resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_schema_resolver(mut self, resolver: impl SchemaResolver + 'static) -> Self {
        self.schema_resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_partial_resolver(mut self, resolver: impl PartialResolver + 'static) -> Self {
        self.partial_resolver = Some(Box::new(resolver));
        self
    }

    /// Resolve unknown partials from `store`.
    pub fn with_partial_store(self, store: impl PromptStore + 'static) -> Self {
        self.with_partial_resolver(StorePartials(store))
    }

    /// Swap the template engine. `factory` is called once per compile.
    pub fn with_engine<E, F>(mut self, factory: F) -> Self
    where
        E: TemplateEngine + 'static,
        F: Fn() -> E + 'static,
    {
        self.engine = Box::new(move || Box::new(factory()) as Box<dyn TemplateEngine>);
        self
    }

    pub fn parse(&self, source: &str) -> ParsedPrompt {
        parse_document(source)
    }

    /// Compile a Picoschema (or JSON Schema) node against the schema registry
    /// and resolver.
    pub fn compile_schema(&self, node: &Value) -> Result<Option<Schema>> {
        let resolver = self.metadata_resolver();
        Ok(picoschema::compile(node, Some(&resolver))?)
    }

    /// Final metadata for `parsed` with `overrides` applied, tools resolved
    /// and schemas compiled.
    pub fn render_metadata(&self, parsed: &PromptMetadata, overrides: Option<&PromptMetadata>) -> Result<PromptMetadata> {
        Ok(self.metadata_resolver().resolve(parsed, overrides)?)
    }

    /// Parse and compile `source` into a reusable [`PromptFunction`].
    ///
    /// `metadata` contributes a model and config at compile time; both can
    /// still be overridden per render.
    pub fn compile(&self, source: &str, metadata: Option<&PromptMetadata>) -> Result<PromptFunction<'_>> {
        let mut parsed = self.parse(source);
        if let Some(metadata) = metadata {
            let compile_time = PromptMetadata {
                model: metadata.model.clone(),
                config: metadata.config.clone(),
                ..PromptMetadata::default()
            };
            parsed.metadata.merge(&compile_time);
        }

        let mut engine = (self.engine)();
        let mut registrations = Registrations::default();

        for (name, helper) in &self.helpers {
            registrations.define_helper(engine.as_mut(), name, helper.clone())?;
        }
        for builtin in BuiltinHelper::ALL {
            if !registrations.has_helper(builtin.name()) {
                registrations.define_builtin(engine.as_mut(), builtin)?;
            }
        }
        for (name, source) in &self.partials {
            registrations.define_partial(engine.as_mut(), name, source)?;
        }
        self.resolve_partials(engine.as_mut(), &mut registrations, &parsed.template)?;

        engine.compile(&parsed.template)?;
        tracing::debug!(
            name = parsed.metadata.name.as_deref().unwrap_or_default(),
            helpers = registrations.helpers.len(),
            partials = registrations.partials.len(),
            "compiled prompt"
        );

        Ok(PromptFunction {
            dotprompt: self,
            parsed,
            engine,
        })
    }

    /// Compile and render in one step.
    pub fn render(
        &self,
        source: &str,
        data: &DataArgument,
        options: Option<&PromptMetadata>,
    ) -> Result<RenderedPrompt> {
        self.compile(source, None)?.render(data, options)
    }

    /// Load a prompt from `store` and compile it.
    pub fn compile_from_store(
        &self,
        store: &dyn PromptStore,
        name: &str,
        options: &LoadOptions,
    ) -> Result<PromptFunction<'_>> {
        let prompt = store
            .load(name, options)
            .map_err(|source| DotpromptError::Store {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| DotpromptError::PromptNotFound(name.to_string()))?;
        self.compile(&prompt.source, None)
    }

    fn metadata_resolver(&self) -> MetadataResolver<'_> {
        MetadataResolver {
            default_model: self.default_model.as_deref(),
            model_configs: &self.model_configs,
            tools: &self.tools,
            tool_resolver: self.tool_resolver.as_deref(),
            schemas: &self.schemas,
            schema_resolver: self.schema_resolver.as_deref(),
        }
    }

    /// Register every partial `template` references that is not yet known,
    /// then recurse into the partial sources.
    fn resolve_partials(
        &self,
        engine: &mut dyn TemplateEngine,
        registrations: &mut Registrations,
        template: &str,
    ) -> Result<()> {
        let Some(resolver) = self.partial_resolver.as_deref() else {
            return Ok(());
        };

        for name in engine.partial_references(template) {
            if registrations.has_partial(&name) {
                continue;
            }
            let source = resolver
                .resolve_partial(&name)
                .map_err(|source| DotpromptError::PartialResolver {
                    name: name.clone(),
                    source,
                })?;
            let Some(source) = source.filter(|s| !s.is_empty()) else {
                tracing::debug!(partial = %name, "partial not found by resolver");
                continue;
            };

            registrations.define_partial(engine, &name, &source)?;
            self.resolve_partials(engine, registrations, &source)?;
        }
        Ok(())
    }
}

/// Names registered on one engine during one compile.
#[derive(Debug, Default)]
struct Registrations {
    helpers: HashSet<String>,
    partials: HashSet<String>,
}

impl Registrations {
    fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains(name)
    }

    fn has_partial(&self, name: &str) -> bool {
        self.partials.contains(name)
    }

    fn define_helper(&mut self, engine: &mut dyn TemplateEngine, name: &str, helper: Helper) -> Result<()> {
        if !self.helpers.insert(name.to_string()) {
            return Err(DotpromptError::DuplicateHelper(name.to_string()));
        }
        engine.register_helper(name, helper);
        Ok(())
    }

    fn define_builtin(&mut self, engine: &mut dyn TemplateEngine, builtin: BuiltinHelper) -> Result<()> {
        if !self.helpers.insert(builtin.name().to_string()) {
            return Err(DotpromptError::DuplicateHelper(builtin.name().to_string()));
        }
        engine.register_builtin(builtin);
        Ok(())
    }

    fn define_partial(&mut self, engine: &mut dyn TemplateEngine, name: &str, source: &str) -> Result<()> {
        if !self.partials.insert(name.to_string()) {
            return Err(DotpromptError::DuplicatePartial(name.to_string()));
        }
        engine.register_partial(name, source)?;
        Ok(())
    }
}

/// A compiled prompt, bound to the [`Dotprompt`] that compiled it.
pub struct PromptFunction<'a> {
    dotprompt: &'a Dotprompt,
    parsed: ParsedPrompt,
    engine: Box<dyn TemplateEngine>,
}

impl std::fmt::Debug for PromptFunction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptFunction").field("parsed", &self.parsed).finish_non_exhaustive()
    }
}

impl PromptFunction<'_> {
    pub fn parsed(&self) -> &ParsedPrompt {
        &self.parsed
    }

    pub fn render(&self, data: &DataArgument, options: Option<&PromptMetadata>) -> Result<RenderedPrompt> {
        let metadata = self.dotprompt.render_metadata(&self.parsed.metadata, options)?;

        let mut input = metadata
            .input
            .as_ref()
            .map(|i| i.default.clone())
            .unwrap_or_default();
        input.extend(data.input.clone());

        let mut context = Map::new();
        context.insert(
            "metadata".to_string(),
            json!({
                "prompt": serde_json::to_value(&metadata)?,
                "docs": serde_json::to_value(&data.docs)?,
                "messages": serde_json::to_value(&data.messages)?,
            }),
        );
        context.extend(data.context.clone());

        let rendered = self.engine.render(&input, &context)?;
        let messages = to_messages(&rendered, Some(data))?;
        tracing::debug!(messages = messages.len(), "rendered prompt");

        Ok(RenderedPrompt { metadata, messages })
    }
}
