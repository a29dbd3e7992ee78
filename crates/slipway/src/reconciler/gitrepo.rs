//! Repository pass: list references, resolve the desired build units and
//! converge the stored ones onto them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use super::{ReconcileError, Result};
use crate::events::{Event, EventRecorder};
use crate::lister::{Credentials, ReferenceLister};
use crate::plugins::PluginRegistry;
use crate::resolver::{self, SkippedOperation};
use crate::resource::{GitRepo, Hash, HashSpec, ObjectReference, Resource, ResourceKind};
use crate::store::{ApplyResult, ObjectStore, StoreError};

/// What one repository pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitRepoReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    /// Build units that should have been deleted but could not be.
    pub delete_failed: Vec<String>,
    pub skipped: Vec<SkippedOperation>,
}

pub struct GitRepoReconciler {
    store: Arc<dyn ObjectStore>,
    lister: Arc<dyn ReferenceLister>,
    plugins: Arc<PluginRegistry>,
    recorder: Arc<dyn EventRecorder>,
    credentials: Credentials,
}

impl GitRepoReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        lister: Arc<dyn ReferenceLister>,
        plugins: Arc<PluginRegistry>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            store,
            lister,
            plugins,
            recorder,
            credentials: Credentials::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Runs one pass for the named repository. A repository that no longer
    /// exists is a no-op.
    pub async fn reconcile(&self, name: &str) -> Result<GitRepoReport> {
        let span = tracing::info_span!("gitrepo", repo = %name);
        self.reconcile_inner(name).instrument(span).await
    }

    async fn reconcile_inner(&self, name: &str) -> Result<GitRepoReport> {
        let Some(mut repo) = self.store.get_repo(name).await? else {
            log::debug!("GitRepo '{}' is gone, nothing to reconcile", name);
            return Ok(GitRepoReport::default());
        };

        let gitpath = repo.spec.gitpath().to_string();
        let matcher =
            self.plugins
                .matcher(&gitpath)
                .ok_or_else(|| ReconcileError::NoSuchMatcherPlugin {
                    repo: name.to_string(),
                    gitpath: gitpath.clone(),
                })?;

        let refs = self
            .lister
            .list(&repo.spec.uri, &self.credentials)
            .await
            .map_err(|source| ReconcileError::List {
                repo: name.to_string(),
                source,
            })?;
        log::debug!("GitRepo '{}' advertises {} references", name, refs.len());

        let desired = resolver::resolve(&repo, &refs, matcher.as_ref());
        let mut report = GitRepoReport {
            skipped: desired.skipped,
            ..Default::default()
        };

        let hashes = self
            .converge(&repo, desired.hashes, &mut report)
            .await?;

        repo.status.last_sync = Some(Utc::now());
        repo.status.hashes = hashes;
        self.store.update_repo_status(&repo).await?;

        log::info!(
            "GitRepo '{}' reconciled: {} created, {} updated, {} deleted",
            name,
            report.created.len(),
            report.updated.len(),
            report.deleted.len()
        );
        Ok(report)
    }

    /// Diffs `desired` against the stored build units of `repo`. Returns the
    /// references that belong in the repository status.
    async fn converge(
        &self,
        repo: &GitRepo,
        mut desired: BTreeMap<String, HashSpec>,
        report: &mut GitRepoReport,
    ) -> Result<Vec<ObjectReference>> {
        let mut status = Vec::new();

        for mut existing in self.store.list_hashes_by_owner(repo.name()).await? {
            let hash_name = existing.metadata.name.clone();
            match desired.remove(&hash_name) {
                Some(spec) => {
                    existing.spec = spec;
                    match self.store.update_hash(&existing).await? {
                        ApplyResult::Unchanged => report.unchanged.push(hash_name),
                        _ => {
                            self.record(repo, "updated", &hash_name);
                            report.updated.push(hash_name);
                        }
                    }
                    status.push(existing.object_reference());
                }
                None => match self.store.delete_hash(&hash_name).await {
                    Ok(()) => {
                        self.record(repo, "deleted", &hash_name);
                        report.deleted.push(hash_name);
                    }
                    Err(e) if e.is_not_found() => {
                        log::debug!("Hash '{}' already deleted", hash_name);
                    }
                    Err(e) => {
                        log::error!("Unable to delete hash '{}': {}", hash_name, e);
                        report.delete_failed.push(hash_name);
                    }
                },
            }
        }

        for (hash_name, spec) in desired {
            let stored = self.create(repo, &hash_name, spec, report).await?;
            status.push(stored.object_reference());
        }

        Ok(status)
    }

    async fn create(
        &self,
        repo: &GitRepo,
        hash_name: &str,
        spec: HashSpec,
        report: &mut GitRepoReport,
    ) -> Result<Hash> {
        let mut hash: Hash = Resource::new(ResourceKind::Hash, hash_name, spec);
        hash.metadata.owner_references = vec![repo.owner_reference()];

        match self.store.create_hash(&hash).await {
            Ok(created) => {
                self.record(repo, "created", hash_name);
                report.created.push(hash_name.to_string());
                Ok(created)
            }
            Err(e) if e.is_already_exists() => {
                // Not listed as ours, yet present: take it over only if it
                // already names this repository.
                let current = self
                    .store
                    .get_hash(hash_name)
                    .await?
                    .ok_or_else(|| StoreError::not_found("Hash", hash_name))?;
                if current.spec.gitrepo != repo.name() {
                    return Err(StoreError::Conflict {
                        kind: "Hash".to_string(),
                        name: hash_name.to_string(),
                        message: format!("owned by GitRepo '{}'", current.spec.gitrepo),
                    }
                    .into());
                }
                hash.metadata.uid = current.metadata.uid.clone();
                if self.store.update_hash(&hash).await? == ApplyResult::Updated {
                    self.record(repo, "updated", hash_name);
                    report.updated.push(hash_name.to_string());
                }
                Ok(hash)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, repo: &GitRepo, reason: &str, hash_name: &str) {
        self.recorder.record(Event::normal(
            repo.object_reference(),
            reason,
            format!("Repo {} hash {}", repo.name(), hash_name),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventRecorder;
    use crate::lister::{GitRef, ListError};
    use crate::resource::{GitRepoSpec, OpType, Operation};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticLister {
        refs: Mutex<std::result::Result<Vec<GitRef>, String>>,
    }

    impl StaticLister {
        fn new(refs: &[(&str, &str)]) -> Self {
            Self {
                refs: Mutex::new(Ok(refs.iter().map(|(n, h)| GitRef::new(*n, *h)).collect())),
            }
        }

        fn set(&self, refs: &[(&str, &str)]) {
            *self.refs.lock().unwrap() = Ok(refs.iter().map(|(n, h)| GitRef::new(*n, *h)).collect());
        }

        fn fail(&self, message: &str) {
            *self.refs.lock().unwrap() = Err(message.to_string());
        }
    }

    #[async_trait]
    impl ReferenceLister for StaticLister {
        async fn list(
            &self,
            _uri: &str,
            _credentials: &Credentials,
        ) -> std::result::Result<Vec<GitRef>, ListError> {
            self.refs
                .lock()
                .unwrap()
                .clone()
                .map_err(ListError::Network)
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        lister: Arc<StaticLister>,
        recorder: Arc<MemoryEventRecorder>,
        reconciler: GitRepoReconciler,
    }

    fn fixture(refs: &[(&str, &str)]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let lister = Arc::new(StaticLister::new(refs));
        let recorder = Arc::new(MemoryEventRecorder::new());
        let reconciler = GitRepoReconciler::new(
            store.clone(),
            lister.clone(),
            Arc::new(PluginRegistry::builtin()),
            recorder.clone(),
        );
        Fixture {
            store,
            lister,
            recorder,
            reconciler,
        }
    }

    fn podinfo(gitpath: &str) -> GitRepo {
        Resource::new(
            ResourceKind::GitRepo,
            "podinfo",
            GitRepoSpec {
                uri: "https://github.com/example/podinfo.git".to_string(),
                gitpath: gitpath.to_string(),
                store: None,
                operations: vec![Operation::new("dev", OpType::Branch, ".*", "./deploy")],
            },
        )
    }

    fn status_names(repo: &GitRepo) -> Vec<String> {
        let mut names: Vec<String> = repo.status.hashes.iter().map(|h| h.name.clone()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_repo_is_noop() {
        let f = fixture(&[]);
        let report = f.reconciler.reconcile("absent").await.unwrap();
        assert_eq!(report, GitRepoReport::default());
    }

    #[tokio::test]
    async fn test_creates_build_units_and_status() {
        let f = fixture(&[("HEAD", "aaa"), ("refs/heads/main", "aaa"), ("refs/heads/dev", "bbb")]);
        f.store.apply_repo(&podinfo("")).await.unwrap();

        let report = f.reconciler.reconcile("podinfo").await.unwrap();
        assert_eq!(report.created, vec!["aaa", "bbb"]);

        let repo = f.store.get_repo("podinfo").await.unwrap().unwrap();
        assert_eq!(status_names(&repo), vec!["aaa", "bbb"]);
        assert!(repo.status.last_sync.is_some());

        let hash = f.store.get_hash("aaa").await.unwrap().unwrap();
        assert_eq!(hash.spec.gitrepo, "podinfo");
        assert_eq!(hash.metadata.controller().unwrap().name, "podinfo");
        assert_eq!(hash.spec.operations[0].reference_title, "main");

        let created = f.recorder.with_reason("created");
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].message, "Repo podinfo hash aaa");
    }

    #[tokio::test]
    async fn test_diff_deletes_updates_and_creates() {
        let f = fixture(&[("refs/heads/a", "A"), ("refs/heads/b", "B")]);
        f.store.apply_repo(&podinfo("")).await.unwrap();
        f.reconciler.reconcile("podinfo").await.unwrap();

        f.lister.set(&[("refs/heads/b", "B"), ("refs/heads/c", "C"), ("refs/heads/b2", "B")]);
        let report = f.reconciler.reconcile("podinfo").await.unwrap();

        assert_eq!(report.deleted, vec!["A"]);
        assert_eq!(report.updated, vec!["B"]);
        assert_eq!(report.created, vec!["C"]);
        assert!(f.store.get_hash("A").await.unwrap().is_none());

        let repo = f.store.get_repo("podinfo").await.unwrap().unwrap();
        assert_eq!(status_names(&repo), vec!["B", "C"]);

        let b = f.store.get_hash("B").await.unwrap().unwrap();
        let titles: Vec<&str> = b
            .spec
            .operations
            .iter()
            .map(|o| o.reference_title.as_str())
            .collect();
        assert_eq!(titles, vec!["b", "b2"]);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let f = fixture(&[("refs/heads/main", "aaa")]);
        f.store.apply_repo(&podinfo("")).await.unwrap();
        f.reconciler.reconcile("podinfo").await.unwrap();
        let events_before = f.recorder.events().len();

        let report = f.reconciler.reconcile("podinfo").await.unwrap();
        assert!(report.created.is_empty());
        assert!(report.updated.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(report.unchanged, vec!["aaa"]);
        assert_eq!(f.recorder.events().len(), events_before);
    }

    #[tokio::test]
    async fn test_unknown_matcher_leaves_status_untouched() {
        let f = fixture(&[("refs/heads/main", "aaa")]);
        f.store.apply_repo(&podinfo("bitbucket")).await.unwrap();

        let err = f.reconciler.reconcile("podinfo").await.unwrap_err();
        assert!(matches!(err, ReconcileError::NoSuchMatcherPlugin { .. }));
        assert!(!err.is_retryable());

        let repo = f.store.get_repo("podinfo").await.unwrap().unwrap();
        assert!(repo.status.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_list_failure_aborts_without_mutation() {
        let f = fixture(&[("refs/heads/main", "aaa")]);
        f.store.apply_repo(&podinfo("")).await.unwrap();
        f.reconciler.reconcile("podinfo").await.unwrap();

        f.lister.fail("connection refused");
        let err = f.reconciler.reconcile("podinfo").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.store.get_hash("aaa").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hash_owned_by_other_repo_conflicts() {
        let f = fixture(&[("refs/heads/main", "aaa")]);
        f.store.apply_repo(&podinfo("")).await.unwrap();
        let mut other = podinfo("");
        other.metadata.name = "other".to_string();
        f.store.apply_repo(&other).await.unwrap();

        f.reconciler.reconcile("other").await.unwrap();
        let err = f.reconciler.reconcile("podinfo").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Conflict { .. })));
    }
}
