//! Desired-state resolution: which build units should exist for a repository.
//!
//! Every declared operation is matched against every listed reference. The
//! result maps a commit hash to the operations that apply to it. A
//! `highesttag` operation contributes at most once, for the reference with
//! the greatest semantic version.

use std::collections::BTreeMap;

use semver::Version;

use crate::lister::GitRef;
use crate::matcher::ReferenceMatcher;
use crate::resource::{GitRepo, HashSpec, OpType, Operation};

/// Reference that is never matched against operations.
pub const HEAD_REF: &str = "HEAD";

/// Why an operation contributed nothing in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A matching tag could not be parsed as a version.
    InvalidVersion { title: String, message: String },
    /// The matcher rejected the operation (unsupported type or bad pattern).
    Matcher(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InvalidVersion { title, message } => {
                write!(f, "tag '{}' is not a semantic version: {}", title, message)
            }
            SkipReason::Matcher(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    pub operation: String,
    pub reason: SkipReason,
}

/// Output of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    /// Commit hash to the build unit spec that should exist for it.
    pub hashes: BTreeMap<String, HashSpec>,
    pub skipped: Vec<SkippedOperation>,
}

impl DesiredState {
    fn append(&mut self, repo: &GitRepo, hash: &str, operation: Operation) {
        self.hashes
            .entry(hash.to_string())
            .or_insert_with(|| HashSpec {
                gitrepo: repo.metadata.name.clone(),
                store: repo.spec.store.clone(),
                operations: Vec::new(),
            })
            .operations
            .push(operation);
    }

    fn skip(&mut self, operation: &Operation, reason: SkipReason) {
        log::warn!("Skipping operation '{}': {}", operation.name, reason);
        self.skipped.push(SkippedOperation {
            operation: operation.name.clone(),
            reason,
        });
    }
}

/// Parses a tag title leniently: a leading `v` is dropped and a missing
/// minor or patch component is read as zero.
pub fn parse_version(title: &str) -> Result<Version, semver::Error> {
    let trimmed = title
        .strip_prefix(|c: char| c == 'v' || c == 'V')
        .unwrap_or(title);
    let core_end = trimmed
        .find(|c: char| c == '-' || c == '+')
        .unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(core_end);
    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded)
}

/// Best match so far for a `highesttag` operation.
struct HighestTag {
    version: Version,
    title: String,
    hash: String,
}

/// Resolves `repo`'s operations against `refs`.
pub fn resolve(repo: &GitRepo, refs: &[GitRef], matcher: &dyn ReferenceMatcher) -> DesiredState {
    let mut desired = DesiredState::default();

    'operations: for operation in &repo.spec.operations {
        let mut highest: Option<HighestTag> = None;

        for git_ref in refs.iter().filter(|r| r.name != HEAD_REF) {
            let matched =
                match matcher.construct(operation.op_type, &operation.reference, &git_ref.name) {
                    Ok(m) => m,
                    Err(e) => {
                        desired.skip(operation, SkipReason::Matcher(e.to_string()));
                        continue 'operations;
                    }
                };
            if !matched.matches() {
                continue;
            }

            if operation.op_type != OpType::HighestTag {
                desired.append(repo, &git_ref.hash, operation.resolved(matched.title()));
                continue;
            }

            let version = match parse_version(matched.title()) {
                Ok(v) => v,
                Err(e) => {
                    desired.skip(
                        operation,
                        SkipReason::InvalidVersion {
                            title: matched.title().to_string(),
                            message: e.to_string(),
                        },
                    );
                    continue 'operations;
                }
            };

            // Strictly greater wins; equal versions keep the first seen.
            if highest.as_ref().map_or(true, |h| version > h.version) {
                highest = Some(HighestTag {
                    version,
                    title: matched.title().to_string(),
                    hash: git_ref.hash.clone(),
                });
            }
        }

        if let Some(winner) = highest {
            log::debug!(
                "Operation '{}' resolved highest tag {} at {}",
                operation.name,
                winner.title,
                winner.hash
            );
            desired.append(repo, &winner.hash, operation.resolved(winner.title));
        }
    }

    desired
}
