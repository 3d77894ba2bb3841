use crate::messages::MessageError;
use crate::picoschema::PicoschemaError;
use crate::resolve::ResolveError;
use crate::template::TemplateError;

/// Errors surfaced by compile and render calls
#[derive(Debug, thiserror::Error)]
pub enum DotpromptError {
    #[error(transparent)]
    Picoschema(#[from] PicoschemaError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("the helper is already registered: {0}")]
    DuplicateHelper(String),

    #[error("the partial is already registered: {0}")]
    DuplicatePartial(String),

    #[error("failed to resolve partial '{name}': {source}")]
    PartialResolver {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load prompt '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("failed to serialize template data: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DotpromptError> = std::result::Result<T, E>;
