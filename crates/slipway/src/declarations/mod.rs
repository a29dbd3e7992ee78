//! GitRepo declarations kept as YAML files on disk.

pub mod error;
pub mod loader;
pub mod validation;
pub mod watcher;

use std::path::Path;

pub use error::{LoaderError, Result};
pub use loader::{
    parse_declaration, sync_declarations, DeclarationLoader, LoadedDeclarations, SyncSummary,
};
pub use validation::DeclarationValidator;
pub use watcher::{BackgroundWatcher, DeclarationChange, DeclarationWatcher, FileChange};

use crate::store::ObjectStore;

/// Loads, validates and syncs the declarations under `dir`.
///
/// Nothing is written when loading or validation fails.
pub async fn reload(store: &dyn ObjectStore, dir: &Path) -> Result<SyncSummary> {
    let loaded = DeclarationLoader::new(dir).load()?;
    DeclarationValidator::new().validate(&loaded)?;
    sync_declarations(store, &loaded).await
}
