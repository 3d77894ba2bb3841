//! # dotprompt
//!
//! Compiles `.prompt` files into structured, role-tagged messages for
//! generative model APIs.
//!
//! A prompt file is a template with optional YAML front matter:
//! - The front matter carries the model, config, tools and input/output
//!   schemas. Schemas may be written in compact Picoschema notation.
//! - The template body is rendered by a swappable template engine. Builtin
//!   helpers emit `<<<dotprompt:…>>>` markers that are then split into
//!   messages and media/pending parts.
//!
//! ```no_run
//! use dotprompt::{DataArgument, Dotprompt};
//!
//! let dotprompt = Dotprompt::default();
//! let rendered = dotprompt
//!     .render("{{ role(\"system\") }}Be brief.{{ role(\"user\") }}Hi", &DataArgument::default(), None)
//!     .unwrap();
//! assert_eq!(rendered.messages.len(), 2);
//! ```

#![forbid(unsafe_code)]

pub mod dotprompt;
pub mod error;
pub mod markers;
pub mod messages;
pub mod parse;
pub mod picoschema;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod template;
pub mod types;

pub use dotprompt::{Dotprompt, DotpromptOptions, PartialResolver, PromptFunction};
pub use error::{DotpromptError, Result};
pub use messages::{insert_history, to_messages, MessageError};
pub use parse::parse_document;
pub use picoschema::{PicoschemaError, SchemaResolver};
pub use resolve::{MetadataResolver, ResolveError, ToolResolver};
pub use schema::Schema;
pub use store::{LoadOptions, MemoryStore, PromptData, PromptRef, PromptStore};
pub use template::{BuiltinHelper, Helper, MiniJinjaEngine, TemplateEngine, TemplateError};
pub use types::{
    DataArgument, Document, Media, Message, Metadata, ModelConfig, ParsedPrompt, Part, PromptInput, PromptMetadata,
    PromptOutput, RenderedPrompt, Role, ToolDefinition,
};
