//! Registry of reference matchers and artifact sinks.
//!
//! Providers are compiled in. A plugin directory only decides which
//! providers are exposed and under what name:
//!
//! ```text
//! <plugin-path>/
//! ├── gitpaths/
//! │   └── enterprise.yaml      # provider: gitlab
//! └── objectstores/
//!     └── s3.yaml              # provider: filesystem, root: /var/lib/slipway
//! ```
//!
//! The file stem is the registry key. A manifest placed in the wrong
//! directory fails the load with [`PluginError::InvalidPluginInterface`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::PluginError;
use crate::matcher::{Convention, ReferenceMatcher};
use crate::resource::DEFAULT_GITPATH;
use crate::sink::{FileSinkProvider, MemorySinkProvider, SinkProvider};

pub const GITPATHS_DIR: &str = "gitpaths";
pub const OBJECTSTORES_DIR: &str = "objectstores";

/// Contents of one plugin manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub provider: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
}

enum Provider {
    Matcher(Convention),
    FileSink,
    MemorySink,
}

impl Provider {
    fn parse(name: &str) -> Option<Self> {
        if let Ok(convention) = name.parse::<Convention>() {
            return Some(Provider::Matcher(convention));
        }
        match name.to_lowercase().as_str() {
            "filesystem" => Some(Provider::FileSink),
            "memory" => Some(Provider::MemorySink),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    matchers: BTreeMap<String, Arc<dyn ReferenceMatcher>>,
    sinks: BTreeMap<String, Arc<dyn SinkProvider>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in matcher conventions under their own names, no sinks.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for convention in Convention::all() {
            registry.register_matcher(convention.as_str(), Arc::new(*convention));
        }
        registry
    }

    /// Builtins plus every manifest found under `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PluginError> {
        let dir = dir.as_ref();
        std::fs::read_dir(dir).map_err(|e| PluginError::ReadDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut registry = Self::builtin();

        for (name, path, manifest) in read_manifests(&dir.join(GITPATHS_DIR))? {
            match Provider::parse(&manifest.provider) {
                Some(Provider::Matcher(convention)) => {
                    log::info!("Loaded gitpath plugin '{}' ({})", name, convention);
                    registry.register_matcher(&name, Arc::new(convention));
                }
                Some(_) => {
                    return Err(PluginError::InvalidPluginInterface {
                        path,
                        expected: "ReferenceMatcher",
                    });
                }
                None => {
                    return Err(PluginError::UnknownProvider {
                        path,
                        provider: manifest.provider,
                    });
                }
            }
        }

        for (name, path, manifest) in read_manifests(&dir.join(OBJECTSTORES_DIR))? {
            let sink: Arc<dyn SinkProvider> = match Provider::parse(&manifest.provider) {
                Some(Provider::FileSink) => {
                    let root = manifest.root.ok_or_else(|| PluginError::MissingOption {
                        path: path.clone(),
                        option: "root",
                    })?;
                    Arc::new(FileSinkProvider::new(&name, root))
                }
                Some(Provider::MemorySink) => Arc::new(MemorySinkProvider::new(&name)),
                Some(Provider::Matcher(_)) => {
                    return Err(PluginError::InvalidPluginInterface {
                        path,
                        expected: "ArtifactSink",
                    });
                }
                None => {
                    return Err(PluginError::UnknownProvider {
                        path,
                        provider: manifest.provider,
                    });
                }
            };
            log::info!("Loaded objectstore plugin '{}' ({})", name, manifest.provider);
            registry.register_sink(&name, sink);
        }

        Ok(registry)
    }

    pub fn register_matcher(&mut self, name: &str, matcher: Arc<dyn ReferenceMatcher>) {
        self.matchers.insert(name.to_string(), matcher);
    }

    pub fn register_sink(&mut self, name: &str, sink: Arc<dyn SinkProvider>) {
        self.sinks.insert(name.to_string(), sink);
    }

    /// Looks up a matcher; an empty selector means the default convention.
    pub fn matcher(&self, name: &str) -> Option<Arc<dyn ReferenceMatcher>> {
        let key = if name.is_empty() { DEFAULT_GITPATH } else { name };
        self.matchers.get(key).cloned()
    }

    pub fn sink(&self, name: &str) -> Option<Arc<dyn SinkProvider>> {
        self.sinks.get(name).cloned()
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.keys().map(String::as_str).collect()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }
}

/// Reads `*.yaml`/`*.yml` manifests from `dir`, sorted by file name.
/// A missing directory yields no manifests.
fn read_manifests(dir: &Path) -> Result<Vec<(String, PathBuf, PluginManifest)>, PluginError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| PluginError::ReadDirectory {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true);
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            !hidden && (ext == "yaml" || ext == "yml")
        })
        .collect();
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let content = std::fs::read_to_string(&path).map_err(|e| PluginError::ReadManifest {
            path: path.clone(),
            source: e,
        })?;
        let manifest: PluginManifest =
            serde_yaml::from_str(&content).map_err(|e| PluginError::ParseManifest {
                path: path.clone(),
                message: e.to_string(),
            })?;
        manifests.push((name, path, manifest));
    }
    Ok(manifests)
}
