use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while reading, validating or syncing GitRepo declarations.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Declarations directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Invalid API version '{version}' in '{path}', expected '{expected}'")]
    InvalidApiVersion {
        path: PathBuf,
        version: String,
        expected: String,
    },

    #[error("Unsupported resource kind '{kind}' in '{path}'")]
    UnknownKind { path: PathBuf, kind: String },

    #[error("Duplicate GitRepo name '{name}' in '{path}'")]
    DuplicateName { path: PathBuf, name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Failed to sync declarations: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
