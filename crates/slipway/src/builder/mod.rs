//! Turning an operation path into a set of documents.

pub mod kustomize;

use async_trait::async_trait;
use thiserror::Error;

use crate::document::{DocumentError, DocumentSet};

pub use kustomize::KustomizeBuilder;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Path not found or invalid: {path}: {message}")]
    PathNotFound { path: String, message: String },

    #[error("Failed to run manifest builder: {0}")]
    Spawn(String),

    #[error("Manifest build of '{path}' timed out after {secs}s")]
    Timeout { path: String, secs: u64 },

    #[error("Manifest build of '{path}' failed: {message}")]
    Failed { path: String, message: String },

    #[error("Manifest build of '{path}' produced invalid output: {source}")]
    InvalidOutput {
        path: String,
        #[source]
        source: DocumentError,
    },
}

/// Renders the manifests found at `path`.
#[async_trait]
pub trait ManifestBuilder: Send + Sync {
    async fn build(&self, path: &str) -> Result<DocumentSet, BuildError>;
}
