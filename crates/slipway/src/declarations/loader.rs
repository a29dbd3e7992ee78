//! Reads GitRepo declarations from a directory of YAML files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::{LoaderError, Result};
use crate::resource::{GitRepo, ResourceHeader, ResourceKind, ResourceWithPath, API_VERSION};
use crate::store::{ApplyResult, ObjectStore};

/// Declarations found in the directory, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct LoadedDeclarations {
    pub repos: Vec<ResourceWithPath<GitRepo>>,
}

impl LoadedDeclarations {
    pub fn names(&self) -> Vec<&str> {
        self.repos
            .iter()
            .map(|r| r.resource.metadata.name.as_str())
            .collect()
    }
}

pub struct DeclarationLoader {
    dir: PathBuf,
}

impl DeclarationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads every declaration below the directory.
    ///
    /// Hidden files and directories are skipped, as is anything that is not
    /// `.yaml`/`.yml`. The first bad file fails the whole load.
    pub fn load(&self) -> Result<LoadedDeclarations> {
        if !self.dir.is_dir() {
            return Err(LoaderError::DirectoryNotFound(self.dir.clone()));
        }

        let mut repos: Vec<ResourceWithPath<GitRepo>> = Vec::new();
        let mut seen = HashSet::new();

        for entry in WalkDir::new(&self.dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_declaration_file(&self.dir, path) {
                continue;
            }

            let repo = self.load_file(path).inspect_err(|e| {
                log::warn!("Failed to load {}: {}", path.display(), e);
            })?;
            let relative = path.strip_prefix(&self.dir).unwrap_or(path).to_path_buf();

            if !seen.insert(repo.metadata.name.clone()) {
                return Err(LoaderError::DuplicateName {
                    path: relative,
                    name: repo.metadata.name,
                });
            }
            repos.push(ResourceWithPath::new(repo, relative));
        }

        repos.sort_by(|a, b| a.resource.metadata.name.cmp(&b.resource.metadata.name));
        log::debug!("Loaded {} declarations from {}", repos.len(), self.dir.display());

        Ok(LoadedDeclarations { repos })
    }

    pub fn load_file(&self, path: &Path) -> Result<GitRepo> {
        let content = fs::read_to_string(path).map_err(|e| LoaderError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        parse_declaration(&content, path)
    }
}

/// Parses one declaration, dispatching on its `apiVersion`/`kind` header.
pub fn parse_declaration(content: &str, path: &Path) -> Result<GitRepo> {
    let header: ResourceHeader =
        serde_yaml::from_str(content).map_err(|e| LoaderError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if header.api_version != API_VERSION {
        return Err(LoaderError::InvalidApiVersion {
            path: path.to_path_buf(),
            version: header.api_version,
            expected: API_VERSION.to_string(),
        });
    }

    // Hash records are produced by the controller and never declared.
    match header.kind.parse::<ResourceKind>() {
        Ok(ResourceKind::GitRepo) => {
            serde_yaml::from_str(content).map_err(|e| LoaderError::ParseYaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
        Ok(ResourceKind::Hash) | Err(_) => Err(LoaderError::UnknownKind {
            path: path.to_path_buf(),
            kind: header.kind,
        }),
    }
}

fn is_declaration_file(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let hidden = relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    });
    if hidden {
        return false;
    }

    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// What a sync changed in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
}

/// Makes the store's GitRepos match the declarations.
///
/// Declared repos are upserted; repos no longer declared are deleted along
/// with everything they own.
pub async fn sync_declarations(
    store: &dyn ObjectStore,
    loaded: &LoadedDeclarations,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let declared: HashSet<&str> = loaded.names().into_iter().collect();

    for entry in &loaded.repos {
        let repo = &entry.resource;
        match store.apply_repo(repo).await? {
            ApplyResult::Unchanged => summary.unchanged.push(repo.metadata.name.clone()),
            result => {
                log::info!(
                    "GitRepo '{}' {} from {}",
                    repo.metadata.name,
                    result,
                    entry.path.display()
                );
                summary.applied.push(repo.metadata.name.clone());
            }
        }
    }

    for existing in store.list_repos().await? {
        let name = existing.metadata.name;
        if declared.contains(name.as_str()) {
            continue;
        }
        match store.delete_repo(&name).await {
            Ok(()) => {
                log::info!("GitRepo '{}' no longer declared, deleted", name);
                summary.deleted.push(name);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(summary)
}
