//! Listing live references of a remote repository.

pub mod git;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use git::GitCliLister;

#[derive(Error, Debug)]
pub enum ListError {
    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    Auth(String),

    #[error("Listing references timed out after {0}s")]
    Timeout(u64),

    #[error("Listing references failed: {0}")]
    Failed(String),

    #[error("Malformed reference line: {0}")]
    Malformed(String),
}

impl ListError {
    /// Returns true if the error is likely transient and the listing can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ListError::Network(_) | ListError::Timeout(_))
    }
}

/// Classifies git stderr into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> ListError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return ListError::Network(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
    {
        return ListError::Auth(stderr.trim().to_string());
    }

    ListError::Failed(stderr.trim().to_string())
}

/// One advertised reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub name: String,
    pub hash: String,
}

impl GitRef {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

/// Authentication material handed to the lister.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssh_key_path: Option<PathBuf>,
}

/// Lists `(name, commit)` pairs for a remote, in the remote's order.
#[async_trait]
pub trait ReferenceLister: Send + Sync {
    async fn list(&self, uri: &str, credentials: &Credentials) -> Result<Vec<GitRef>, ListError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network_error() {
        let err = classify_git_error("fatal: unable to access 'https://x/': Could not resolve host: x");
        assert!(matches!(err, ListError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth_error() {
        let err = classify_git_error("git@github.com: Permission denied (publickey).");
        assert!(matches!(err, ListError::Auth(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_other_error() {
        let err = classify_git_error("fatal: 'nowhere' does not appear to be a git repository\n");
        assert!(matches!(err, ListError::Failed(ref m) if !m.ends_with('\n')));
    }
}
