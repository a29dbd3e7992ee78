//! Reference matchers: decide whether a git reference satisfies an operation.
//!
//! Each git host names pull requests differently, so matching is delegated to
//! a [`ReferenceMatcher`] selected by the declaration's `gitpath`.

pub mod convention;

use thiserror::Error;

use crate::resource::OpType;

pub use convention::Convention;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("Operation type '{op_type}' is not supported by the '{matcher}' matcher")]
    UnsupportedOperationType { matcher: String, op_type: OpType },

    #[error("Invalid reference pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MatcherError>;

/// Outcome of matching one operation against one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMatch {
    matched: bool,
    title: String,
}

impl ReferenceMatch {
    pub fn new(matched: bool, title: impl Into<String>) -> Self {
        Self {
            matched,
            title: title.into(),
        }
    }

    pub fn matches(&self) -> bool {
        self.matched
    }

    /// Human-readable title derived from the reference, e.g. `master`.
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Capability implemented by every reference-naming convention.
pub trait ReferenceMatcher: Send + Sync {
    /// Registry name of the convention.
    fn name(&self) -> &str;

    /// Matches `reference` for an operation of `op_type` with `pattern`.
    fn construct(&self, op_type: OpType, pattern: &str, reference: &str) -> Result<ReferenceMatch>;
}
