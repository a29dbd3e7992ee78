//! In-process store with owner-based cascade deletion and change events.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ApplyResult, ChangeType, ObjectStore, Result, StoreError, WatchEvent};
use crate::document::Document;
use crate::resource::{GitRepo, Hash, ObjectReference, OwnerReference, ResourceKind};

/// `(kind, namespace, name)`
type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    repos: BTreeMap<String, GitRepo>,
    hashes: BTreeMap<String, Hash>,
    objects: BTreeMap<ObjectKey, Document>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn object_key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

/// Whether `owner` points at the record `(kind, name, uid)`.
fn owned_by(owner: &OwnerReference, kind: &str, name: &str, uid: &str) -> bool {
    owner.controller
        && owner.kind == kind
        && owner.name == name
        && (owner.uid.is_empty() || uid.is_empty() || owner.uid == uid)
}

fn event(
    kind: impl Into<String>,
    name: impl Into<String>,
    namespace: impl Into<String>,
    owner: Option<OwnerReference>,
    change: ChangeType,
) -> WatchEvent {
    WatchEvent {
        kind: kind.into(),
        name: name.into(),
        namespace: namespace.into(),
        owner,
        change,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Number of produced objects currently held.
    pub fn object_count(&self) -> usize {
        self.lock().map(|s| s.objects.len()).unwrap_or(0)
    }

    /// References to every produced object, in key order.
    pub fn object_references(&self) -> Vec<ObjectReference> {
        self.lock()
            .map(|s| s.objects.values().map(Document::object_reference).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    fn publish(&self, events: Vec<WatchEvent>) {
        for ev in events {
            // No receivers is fine.
            let _ = self.events.send(ev);
        }
    }

    fn remove_hash(state: &mut State, name: &str, events: &mut Vec<WatchEvent>) {
        let Some(hash) = state.hashes.remove(name) else {
            return;
        };
        events.push(event(
            ResourceKind::Hash.to_string(),
            name,
            "",
            hash.metadata.controller().cloned(),
            ChangeType::Deleted,
        ));
        Self::remove_owned_objects(state, "Hash", name, &hash.metadata.uid, events);
    }

    fn remove_owned_objects(
        state: &mut State,
        kind: &str,
        name: &str,
        uid: &str,
        events: &mut Vec<WatchEvent>,
    ) {
        let owned: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|(_, doc)| {
                doc.owner_references()
                    .iter()
                    .any(|o| owned_by(o, kind, name, uid))
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in owned {
            Self::remove_object(state, &key, events);
        }
    }

    fn remove_object(state: &mut State, key: &ObjectKey, events: &mut Vec<WatchEvent>) -> bool {
        let Some(doc) = state.objects.remove(key) else {
            return false;
        };
        events.push(event(
            doc.kind(),
            doc.name(),
            doc.namespace(),
            doc.controller(),
            ChangeType::Deleted,
        ));
        let (kind, name, uid) = (
            doc.kind().to_string(),
            doc.name().to_string(),
            doc.uid().to_string(),
        );
        Self::remove_owned_objects(state, &kind, &name, &uid, events);
        true
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_repo(&self, name: &str) -> Result<Option<GitRepo>> {
        Ok(self.lock()?.repos.get(name).cloned())
    }

    async fn list_repos(&self) -> Result<Vec<GitRepo>> {
        Ok(self.lock()?.repos.values().cloned().collect())
    }

    async fn apply_repo(&self, repo: &GitRepo) -> Result<ApplyResult> {
        let name = repo.metadata.name.clone();
        let result = {
            let mut state = self.lock()?;
            match state.repos.get_mut(&name) {
                Some(existing) => {
                    if existing.spec == repo.spec
                        && existing.metadata.labels == repo.metadata.labels
                        && existing.metadata.annotations == repo.metadata.annotations
                    {
                        ApplyResult::Unchanged
                    } else {
                        existing.spec = repo.spec.clone();
                        existing.metadata.labels = repo.metadata.labels.clone();
                        existing.metadata.annotations = repo.metadata.annotations.clone();
                        existing.metadata.generation += 1;
                        ApplyResult::Updated
                    }
                }
                None => {
                    let mut created = repo.clone();
                    if created.metadata.uid.is_empty() {
                        created.metadata.uid = new_uid();
                    }
                    created.metadata.generation = 1;
                    state.repos.insert(name.clone(), created);
                    ApplyResult::Created
                }
            }
        };

        let change = match result {
            ApplyResult::Created => Some(ChangeType::Created),
            ApplyResult::Updated => Some(ChangeType::Modified),
            ApplyResult::Unchanged => None,
        };
        if let Some(change) = change {
            self.publish(vec![event(
                ResourceKind::GitRepo.to_string(),
                name,
                "",
                None,
                change,
            )]);
        }
        Ok(result)
    }

    async fn delete_repo(&self, name: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock()?;
            let repo = state
                .repos
                .remove(name)
                .ok_or_else(|| StoreError::not_found("GitRepo", name))?;
            events.push(event("GitRepo", name, "", None, ChangeType::Deleted));

            let owned: Vec<String> = state
                .hashes
                .values()
                .filter(|h| {
                    h.metadata
                        .owner_references
                        .iter()
                        .any(|o| owned_by(o, "GitRepo", name, &repo.metadata.uid))
                })
                .map(|h| h.metadata.name.clone())
                .collect();
            for hash in owned {
                Self::remove_hash(&mut state, &hash, &mut events);
            }
        }
        self.publish(events);
        Ok(())
    }

    async fn update_repo_status(&self, repo: &GitRepo) -> Result<()> {
        let name = repo.metadata.name.clone();
        let changed = {
            let mut state = self.lock()?;
            let existing = state
                .repos
                .get_mut(&name)
                .ok_or_else(|| StoreError::not_found("GitRepo", &name))?;
            let changed = existing.status != repo.status;
            existing.status = repo.status.clone();
            changed
        };
        if changed {
            self.publish(vec![event(
                "GitRepo",
                name,
                "",
                None,
                ChangeType::StatusModified,
            )]);
        }
        Ok(())
    }

    async fn get_hash(&self, name: &str) -> Result<Option<Hash>> {
        Ok(self.lock()?.hashes.get(name).cloned())
    }

    async fn list_hashes_by_owner(&self, owner: &str) -> Result<Vec<Hash>> {
        let state = self.lock()?;
        let uid = state
            .repos
            .get(owner)
            .map(|r| r.metadata.uid.clone())
            .unwrap_or_default();
        Ok(state
            .hashes
            .values()
            .filter(|h| {
                h.metadata
                    .owner_references
                    .iter()
                    .any(|o| owned_by(o, "GitRepo", owner, &uid))
            })
            .cloned()
            .collect())
    }

    async fn create_hash(&self, hash: &Hash) -> Result<Hash> {
        let name = hash.metadata.name.clone();
        let created = {
            let mut state = self.lock()?;
            if state.hashes.contains_key(&name) {
                return Err(StoreError::AlreadyExists {
                    kind: "Hash".to_string(),
                    name,
                });
            }
            let mut created = hash.clone();
            if created.metadata.uid.is_empty() {
                created.metadata.uid = new_uid();
            }
            created.metadata.generation = 1;
            state.hashes.insert(name.clone(), created.clone());
            created
        };
        self.publish(vec![event(
            "Hash",
            name,
            "",
            created.metadata.controller().cloned(),
            ChangeType::Created,
        )]);
        Ok(created)
    }

    async fn update_hash(&self, hash: &Hash) -> Result<ApplyResult> {
        let name = hash.metadata.name.clone();
        let (result, owner) = {
            let mut state = self.lock()?;
            let existing = state
                .hashes
                .get_mut(&name)
                .ok_or_else(|| StoreError::not_found("Hash", &name))?;
            let result = if existing.spec == hash.spec
                && existing.metadata.labels == hash.metadata.labels
                && existing.metadata.owner_references == hash.metadata.owner_references
            {
                ApplyResult::Unchanged
            } else {
                existing.spec = hash.spec.clone();
                existing.metadata.labels = hash.metadata.labels.clone();
                existing.metadata.owner_references = hash.metadata.owner_references.clone();
                existing.metadata.generation += 1;
                ApplyResult::Updated
            };
            (result, existing.metadata.controller().cloned())
        };
        if result == ApplyResult::Updated {
            self.publish(vec![event("Hash", name, "", owner, ChangeType::Modified)]);
        }
        Ok(result)
    }

    async fn update_hash_status(&self, hash: &Hash) -> Result<()> {
        let name = hash.metadata.name.clone();
        let (changed, owner) = {
            let mut state = self.lock()?;
            let existing = state
                .hashes
                .get_mut(&name)
                .ok_or_else(|| StoreError::not_found("Hash", &name))?;
            let changed = existing.status != hash.status;
            existing.status = hash.status.clone();
            (changed, existing.metadata.controller().cloned())
        };
        if changed {
            self.publish(vec![event(
                "Hash",
                name,
                "",
                owner,
                ChangeType::StatusModified,
            )]);
        }
        Ok(())
    }

    async fn delete_hash(&self, name: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock()?;
            if !state.hashes.contains_key(name) {
                return Err(StoreError::not_found("Hash", name));
            }
            Self::remove_hash(&mut state, name, &mut events);
        }
        self.publish(events);
        Ok(())
    }

    async fn apply_object(&self, doc: &Document) -> Result<ApplyResult> {
        let key = object_key(doc.kind(), doc.namespace(), doc.name());
        let mut incoming = doc.clone();
        let result = {
            let mut state = self.lock()?;
            match state.objects.get_mut(&key) {
                Some(existing) => {
                    incoming.set_uid(existing.uid());
                    if *existing == incoming {
                        ApplyResult::Unchanged
                    } else {
                        *existing = incoming.clone();
                        ApplyResult::Updated
                    }
                }
                None => {
                    if incoming.uid().is_empty() {
                        incoming.set_uid(new_uid());
                    }
                    state.objects.insert(key, incoming.clone());
                    ApplyResult::Created
                }
            }
        };

        let change = match result {
            ApplyResult::Created => Some(ChangeType::Created),
            ApplyResult::Updated => Some(ChangeType::Modified),
            ApplyResult::Unchanged => None,
        };
        if let Some(change) = change {
            self.publish(vec![event(
                incoming.kind(),
                incoming.name(),
                incoming.namespace(),
                incoming.controller(),
                change,
            )]);
        }
        Ok(result)
    }

    async fn get_object(&self, reference: &ObjectReference) -> Result<Option<Document>> {
        let key = object_key(&reference.kind, &reference.namespace, &reference.name);
        Ok(self.lock()?.objects.get(&key).cloned())
    }

    async fn delete_object(&self, reference: &ObjectReference) -> Result<()> {
        let key = object_key(&reference.kind, &reference.namespace, &reference.name);
        let mut events = Vec::new();
        {
            let mut state = self.lock()?;
            if !Self::remove_object(&mut state, &key, &mut events) {
                return Err(StoreError::not_found(&reference.kind, reference.to_string()));
            }
        }
        self.publish(events);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
