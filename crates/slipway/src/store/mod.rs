//! Contract with the store that holds declarations, build units and the
//! objects they produce.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::document::Document;
use crate::resource::{GitRepo, Hash, ObjectReference, OwnerReference};

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Conflict on {kind}/{name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What a create-or-update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Created,
    Updated,
    Unchanged,
}

impl ApplyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyResult::Created => "created",
            ApplyResult::Updated => "updated",
            ApplyResult::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The type of change carried by a [`WatchEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    /// Spec or content changed.
    Modified,
    /// Only the status changed.
    StatusModified,
    Deleted,
}

/// Change notification emitted after every effective write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub owner: Option<OwnerReference>,
    pub change: ChangeType,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_repo(&self, name: &str) -> Result<Option<GitRepo>>;

    async fn list_repos(&self) -> Result<Vec<GitRepo>>;

    /// Creates the repo or replaces its spec and labels, keeping status.
    async fn apply_repo(&self, repo: &GitRepo) -> Result<ApplyResult>;

    /// Deletes the repo and everything it transitively owns.
    async fn delete_repo(&self, name: &str) -> Result<()>;

    async fn update_repo_status(&self, repo: &GitRepo) -> Result<()>;

    async fn get_hash(&self, name: &str) -> Result<Option<Hash>>;

    /// Build units whose controlling owner is the named repo.
    async fn list_hashes_by_owner(&self, owner: &str) -> Result<Vec<Hash>>;

    /// Fails with [`StoreError::AlreadyExists`] if the name is taken.
    async fn create_hash(&self, hash: &Hash) -> Result<Hash>;

    async fn update_hash(&self, hash: &Hash) -> Result<ApplyResult>;

    async fn update_hash_status(&self, hash: &Hash) -> Result<()>;

    /// Deletes the build unit and everything it transitively owns.
    async fn delete_hash(&self, name: &str) -> Result<()>;

    async fn apply_object(&self, doc: &Document) -> Result<ApplyResult>;

    async fn get_object(&self, reference: &ObjectReference) -> Result<Option<Document>>;

    /// Deletes the object and everything it transitively owns.
    async fn delete_object(&self, reference: &ObjectReference) -> Result<()>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
