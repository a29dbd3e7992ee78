//! Built-in reference-naming conventions.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use regex::Regex;

use super::{MatcherError, ReferenceMatch, ReferenceMatcher, Result};
use crate::resource::OpType;

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

/// Git hosting conventions known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convention {
    /// `refs/pull/<n>/merge`
    Github,
    /// `refs/merge-requests/<n>/head`
    Gitlab,
    /// Branches and tags only.
    Plain,
}

impl Convention {
    pub fn all() -> &'static [Convention] {
        &[Convention::Github, Convention::Gitlab, Convention::Plain]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Convention::Github => "github",
            Convention::Gitlab => "gitlab",
            Convention::Plain => "plain",
        }
    }

    fn pull_pattern(&self) -> Option<&'static str> {
        match self {
            Convention::Github => Some(r"^refs/pull/[0-9]+/merge$"),
            Convention::Gitlab => Some(r"^refs/merge-requests/[0-9]+/head$"),
            Convention::Plain => None,
        }
    }

    fn prefix(op_type: OpType) -> &'static str {
        match op_type {
            OpType::Branch => BRANCH_PREFIX,
            _ => TAG_PREFIX,
        }
    }
}

impl std::fmt::Display for Convention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Convention {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Convention::Github),
            "gitlab" => Ok(Convention::Gitlab),
            "plain" => Ok(Convention::Plain),
            _ => Err(format!("Unknown matcher convention: {}", s)),
        }
    }
}

/// Anchored patterns compiled so far, keyed by source. Invalid patterns are
/// not kept.
static COMPILED: LazyLock<RwLock<HashMap<String, Regex>>> = LazyLock::new(Default::default);

fn compile(pattern: &str) -> Result<Regex> {
    if let Some(regex) = COMPILED
        .read()
        .ok()
        .and_then(|compiled| compiled.get(pattern).cloned())
    {
        return Ok(regex);
    }

    let regex = Regex::new(pattern).map_err(|e| MatcherError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    if let Ok(mut compiled) = COMPILED.write() {
        compiled.insert(pattern.to_string(), regex.clone());
    }
    Ok(regex)
}

/// `refs/pull/12/merge` becomes `pull-12`.
fn pull_title(reference: &str) -> String {
    reference
        .split('/')
        .skip(1)
        .take(2)
        .collect::<Vec<_>>()
        .join("-")
}

impl ReferenceMatcher for Convention {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn construct(&self, op_type: OpType, pattern: &str, reference: &str) -> Result<ReferenceMatch> {
        if op_type == OpType::Pull {
            let pull = self
                .pull_pattern()
                .ok_or_else(|| MatcherError::UnsupportedOperationType {
                    matcher: self.as_str().to_string(),
                    op_type,
                })?;
            let regex = compile(pull)?;
            return Ok(ReferenceMatch::new(
                regex.is_match(reference),
                pull_title(reference),
            ));
        }

        let prefix = Self::prefix(op_type);
        let regex = compile(&format!("^{}{}$", prefix, pattern))?;
        let title = reference.strip_prefix(prefix).unwrap_or(reference);
        Ok(ReferenceMatch::new(regex.is_match(reference), title))
    }
}
