//! Static checks run on declarations before they reach the store.

use std::collections::HashSet;

use regex::Regex;

use super::error::{LoaderError, Result};
use super::loader::LoadedDeclarations;
use crate::resource::{GitRepo, OpType, Operation};

/// Validator for GitRepo declarations.
pub struct DeclarationValidator {
    /// Collected validation errors.
    errors: Vec<String>,
}

impl Default for DeclarationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclarationValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Validates every loaded declaration, reporting all problems at once.
    pub fn validate(&mut self, loaded: &LoadedDeclarations) -> Result<()> {
        self.errors.clear();

        for entry in &loaded.repos {
            self.validate_repo(&entry.resource);
        }

        self.finish()
    }

    /// Validates a single declaration.
    pub fn validate_one(&mut self, repo: &GitRepo) -> Result<()> {
        self.errors.clear();
        self.validate_repo(repo);
        self.finish()
    }

    /// Returns the errors of the last run.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn finish(&self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(LoaderError::Validation(self.errors.join("; ")))
        }
    }

    fn validate_repo(&mut self, repo: &GitRepo) {
        let name = &repo.metadata.name;

        if name.is_empty() {
            self.errors.push("GitRepo: metadata.name is required".to_string());
        }

        if repo.spec.uri.trim().is_empty() {
            self.errors.push(format!("GitRepo '{}': uri is required", name));
        }

        if let Some(store) = &repo.spec.store {
            if store.kind.is_empty() {
                self.errors
                    .push(format!("GitRepo '{}': store.type is required", name));
            }
        }

        let mut operation_names = HashSet::new();
        for op in &repo.spec.operations {
            if op.name.is_empty() {
                self.errors
                    .push(format!("GitRepo '{}': operation name is required", name));
            } else if !operation_names.insert(op.name.as_str()) {
                self.errors.push(format!(
                    "GitRepo '{}': duplicate operation name '{}'",
                    name, op.name
                ));
            }

            self.validate_operation(name, op);
        }
    }

    fn validate_operation(&mut self, repo: &str, op: &Operation) {
        if op.op_type != OpType::Pull {
            if let Err(e) = Regex::new(&format!("^{}$", op.reference)) {
                self.errors.push(format!(
                    "GitRepo '{}' operation '{}': invalid reference pattern '{}': {}",
                    repo, op.name, op.reference, e
                ));
            }
        }

        for transformer in &op.transformers {
            if transformer.kind.requires_key() && transformer.key.is_empty() {
                self.errors.push(format!(
                    "GitRepo '{}' operation '{}': {} transformer requires a key",
                    repo, op.name, transformer.kind
                ));
            }
            if transformer.value.is_empty() {
                self.errors.push(format!(
                    "GitRepo '{}' operation '{}': {} transformer requires a value",
                    repo, op.name, transformer.kind
                ));
            }
        }
    }
}
