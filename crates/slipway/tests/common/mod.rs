//! Shared fakes for the reconciliation integration tests.
//!
//! `FakeLister` serves reference lists per URI and `FakeBuilder` serves
//! canned manifests per path, so both reconciliation levels run without git
//! or kustomize. `FaultyStore` wraps the memory store so chosen store calls
//! can be made to fail.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use slipway::builder::{BuildError, ManifestBuilder};
use slipway::document::Document;
use slipway::events::MemoryEventRecorder;
use slipway::lister::{Credentials, GitRef, ListError, ReferenceLister};
use slipway::resource::{GitRepoSpec, Hash, ObjectReference, ResourceKind, StoreConfig};
use slipway::sink::MemorySinkProvider;
use slipway::store::{self, ApplyResult, ObjectStore, StoreError, WatchEvent};
use slipway::{
    ArchiveQueue, DocumentSet, GitRepo, GitRepoReconciler, MemoryStore, Operation, Pipeline,
    PluginRegistry,
};

pub const URI: &str = "https://github.com/example/podinfo";

#[derive(Default)]
pub struct FakeLister {
    refs: Mutex<HashMap<String, Vec<GitRef>>>,
}

impl FakeLister {
    pub fn set(&self, uri: &str, refs: &[(&str, &str)]) {
        let refs = refs.iter().map(|(name, hash)| GitRef::new(*name, *hash)).collect();
        self.refs.lock().unwrap().insert(uri.to_string(), refs);
    }
}

#[async_trait]
impl ReferenceLister for FakeLister {
    async fn list(&self, uri: &str, _credentials: &Credentials) -> Result<Vec<GitRef>, ListError> {
        self.refs
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| ListError::Network(format!("unknown remote {}", uri)))
    }
}

/// Serves YAML per build path, ignoring any `?ref=` suffix.
#[derive(Default)]
pub struct FakeBuilder {
    outputs: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBuilder {
    pub fn set(&self, path: &str, yaml: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(path.to_string(), yaml.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestBuilder for FakeBuilder {
    async fn build(&self, path: &str) -> Result<DocumentSet, BuildError> {
        self.calls.lock().unwrap().push(path.to_string());
        let base = path.split('?').next().unwrap_or(path);
        let yaml = self.outputs.lock().unwrap().get(base).cloned().ok_or_else(|| {
            BuildError::PathNotFound {
                path: path.to_string(),
                message: "no such path".to_string(),
            }
        })?;
        DocumentSet::from_yaml(&yaml).map_err(|source| BuildError::InvalidOutput {
            path: path.to_string(),
            source,
        })
    }
}

/// Store calls that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    UpdateRepoStatus,
    CreateHash,
    UpdateHash,
    UpdateHashStatus,
    DeleteHash,
    ApplyObject,
    DeleteObject,
}

/// Delegates to a [`MemoryStore`], failing the selected calls with a
/// backend error. Reads always pass through.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<StoreCall>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, call: StoreCall) {
        self.failing.lock().unwrap().insert(call);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, call: StoreCall) -> store::Result<()> {
        if self.failing.lock().unwrap().contains(&call) {
            return Err(StoreError::Backend(format!("{:?} unavailable", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn get_repo(&self, name: &str) -> store::Result<Option<GitRepo>> {
        self.inner.get_repo(name).await
    }

    async fn list_repos(&self) -> store::Result<Vec<GitRepo>> {
        self.inner.list_repos().await
    }

    async fn apply_repo(&self, repo: &GitRepo) -> store::Result<ApplyResult> {
        self.inner.apply_repo(repo).await
    }

    async fn delete_repo(&self, name: &str) -> store::Result<()> {
        self.inner.delete_repo(name).await
    }

    async fn update_repo_status(&self, repo: &GitRepo) -> store::Result<()> {
        self.check(StoreCall::UpdateRepoStatus)?;
        self.inner.update_repo_status(repo).await
    }

    async fn get_hash(&self, name: &str) -> store::Result<Option<Hash>> {
        self.inner.get_hash(name).await
    }

    async fn list_hashes_by_owner(&self, owner: &str) -> store::Result<Vec<Hash>> {
        self.inner.list_hashes_by_owner(owner).await
    }

    async fn create_hash(&self, hash: &Hash) -> store::Result<Hash> {
        self.check(StoreCall::CreateHash)?;
        self.inner.create_hash(hash).await
    }

    async fn update_hash(&self, hash: &Hash) -> store::Result<ApplyResult> {
        self.check(StoreCall::UpdateHash)?;
        self.inner.update_hash(hash).await
    }

    async fn update_hash_status(&self, hash: &Hash) -> store::Result<()> {
        self.check(StoreCall::UpdateHashStatus)?;
        self.inner.update_hash_status(hash).await
    }

    async fn delete_hash(&self, name: &str) -> store::Result<()> {
        self.check(StoreCall::DeleteHash)?;
        self.inner.delete_hash(name).await
    }

    async fn apply_object(&self, doc: &Document) -> store::Result<ApplyResult> {
        self.check(StoreCall::ApplyObject)?;
        self.inner.apply_object(doc).await
    }

    async fn get_object(&self, reference: &ObjectReference) -> store::Result<Option<Document>> {
        self.inner.get_object(reference).await
    }

    async fn delete_object(&self, reference: &ObjectReference) -> store::Result<()> {
        self.check(StoreCall::DeleteObject)?;
        self.inner.delete_object(reference).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.watch()
    }
}

/// A complete two-level setup over in-memory backends.
///
/// Both reconcilers write through `faults`; `store` is the same data without
/// fault injection, for seeding and assertions.
pub struct Env {
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub lister: Arc<FakeLister>,
    pub builder: Arc<FakeBuilder>,
    pub recorder: Arc<MemoryEventRecorder>,
    pub sinks: Arc<MemorySinkProvider>,
    pub archive: Arc<ArchiveQueue>,
    pub repos: Arc<GitRepoReconciler>,
    pub pipeline: Arc<Pipeline>,
}

impl Env {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let lister = Arc::new(FakeLister::default());
        let builder = Arc::new(FakeBuilder::default());
        let recorder = Arc::new(MemoryEventRecorder::new());
        let sinks = Arc::new(MemorySinkProvider::new("memory"));
        let archive = Arc::new(ArchiveQueue::new(2, 16).unwrap());

        let mut plugins = PluginRegistry::builtin();
        plugins.register_sink("memory", sinks.clone());
        let plugins = Arc::new(plugins);

        let repos = Arc::new(GitRepoReconciler::new(
            faults.clone(),
            lister.clone(),
            plugins.clone(),
            recorder.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            faults.clone(),
            builder.clone(),
            plugins,
            recorder.clone(),
            archive.clone(),
        ));

        Self {
            store,
            faults,
            lister,
            builder,
            recorder,
            sinks,
            archive,
            repos,
            pipeline,
        }
    }
}

pub fn repo(name: &str, operations: Vec<Operation>) -> GitRepo {
    GitRepo::new(
        ResourceKind::GitRepo,
        name,
        GitRepoSpec {
            uri: URI.to_string(),
            gitpath: String::new(),
            store: Some(StoreConfig {
                kind: "memory".to_string(),
                bucket: "builds".to_string(),
            }),
            operations,
        },
    )
}

pub fn config_map(name: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\ndata:\n  key: value\n",
        name
    )
}

pub fn deployment(name: &str, image: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
spec:
  template:
    metadata:
      labels:
        app: {name}
    spec:
      containers:
        - name: {name}
          image: {image}
"#
    )
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
