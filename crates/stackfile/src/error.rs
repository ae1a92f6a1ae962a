//! Error types for stack declaration parsing.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stack document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("resource '{name}' is declared more than once")]
    DuplicateResource { name: String },

    #[error("malformed reference '{text}' in '{context}': {reason}")]
    MalformedReference {
        text: String,
        context: String,
        reason: String,
    },

    #[error("unknown replace policy '{value}' on resource '{resource}' (expected 'create-before-destroy' or 'destroy-before-create')")]
    UnknownReplacePolicy { resource: String, value: String },

    #[error("unsupported value for '{context}': {reason}")]
    UnsupportedValue { context: String, reason: String },
}
