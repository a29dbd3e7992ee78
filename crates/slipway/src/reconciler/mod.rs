//! The two reconciliation levels: repositories into build units, and build
//! units into produced objects.

pub mod gitrepo;

use thiserror::Error;

use crate::builder::BuildError;
use crate::document::DocumentError;
use crate::lister::ListError;
use crate::pipeline::transform::TransformError;
use crate::store::StoreError;

pub use gitrepo::{GitRepoReconciler, GitRepoReport};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Owner GitRepo '{repo}' of hash '{hash}' not found")]
    OwnerNotFound { hash: String, repo: String },

    #[error("No reference matcher plugin '{gitpath}' for repo '{repo}'")]
    NoSuchMatcherPlugin { repo: String, gitpath: String },

    #[error("No artifact sink plugin '{kind}' for hash '{hash}'")]
    NoSuchSinkPlugin { hash: String, kind: String },

    #[error("Failed to list references of '{repo}': {source}")]
    List {
        repo: String,
        #[source]
        source: ListError,
    },

    #[error("Build failed for operation '{operation}': {source}")]
    Build {
        operation: String,
        #[source]
        source: BuildError,
    },

    #[error("Transform failed for operation '{operation}': {source}")]
    Transform {
        operation: String,
        #[source]
        source: TransformError,
    },

    #[error("Invalid document from operation '{operation}': {source}")]
    Document {
        operation: String,
        #[source]
        source: DocumentError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the pass should be retried with backoff. Input errors wait
    /// for the next change notification instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::List { source, .. } => source.is_retryable(),
            ReconcileError::Build { source, .. } => matches!(
                source,
                BuildError::Timeout { .. } | BuildError::Failed { .. } | BuildError::Spawn(_)
            ),
            ReconcileError::Store(e) => matches!(e, StoreError::Backend(_)),
            ReconcileError::OwnerNotFound { .. }
            | ReconcileError::NoSuchMatcherPlugin { .. }
            | ReconcileError::NoSuchSinkPlugin { .. }
            | ReconcileError::Transform { .. }
            | ReconcileError::Document { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
