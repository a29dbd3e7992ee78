//! Work queue driving both reconcilers.
//!
//! Store change notifications are routed to reconcile keys. Keys are
//! coalesced while pending and passes for the same key never overlap.
//! Repositories are also re-listed on a fixed interval; failed passes are
//! retried with exponential backoff when the error is transient.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::pipeline::Pipeline;
use crate::reconciler::{GitRepoReconciler, ReconcileError};
use crate::resource::ResourceKind;
use crate::store::{ChangeType, ObjectStore, WatchEvent};

/// Base delay for exponential backoff (in seconds).
const RETRY_BASE_DELAY_SECS: u64 = 2;
/// Upper bound for the backoff delay (in seconds).
const RETRY_MAX_DELAY_SECS: u64 = 300;
/// Fallback re-listing interval for repositories (in seconds).
const RESYNC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReconcileKey {
    GitRepo(String),
    Hash(String),
}

impl std::fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileKey::GitRepo(name) => write!(f, "{}/{}", ResourceKind::GitRepo, name),
            ReconcileKey::Hash(name) => write!(f, "{}/{}", ResourceKind::Hash, name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(RESYNC_INTERVAL_SECS),
            backoff_base: Duration::from_secs(RETRY_BASE_DELAY_SECS),
            backoff_max: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

impl ControllerSettings {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, … capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Controller {
    store: Arc<dyn ObjectStore>,
    repos: Arc<GitRepoReconciler>,
    pipeline: Arc<Pipeline>,
    settings: ControllerSettings,
    sender: mpsc::UnboundedSender<ReconcileKey>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ReconcileKey>>>,
    pending: Arc<Mutex<HashSet<ReconcileKey>>>,
    locks: Mutex<HashMap<ReconcileKey, Arc<tokio::sync::Mutex<()>>>>,
    timers: Mutex<HashMap<ReconcileKey, JoinHandle<()>>>,
    failures: Mutex<HashMap<ReconcileKey, u32>>,
    stopped: AtomicBool,
    passes: AtomicUsize,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repos: Arc<GitRepoReconciler>,
        pipeline: Arc<Pipeline>,
        settings: ControllerSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            repos,
            pipeline,
            settings,
            sender,
            receiver: Mutex::new(Some(receiver)),
            pending: Arc::new(Mutex::new(HashSet::new())),
            locks: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            passes: AtomicUsize::new(0),
        }
    }

    /// Queues `key` unless it is already waiting.
    pub fn enqueue(&self, key: ReconcileKey) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if guard(&self.pending).insert(key.clone()) {
            if self.sender.send(key).is_err() {
                log::debug!("Reconcile queue closed");
            }
        }
    }

    /// Keys waiting to be processed, sorted.
    pub fn pending_keys(&self) -> Vec<ReconcileKey> {
        let mut keys: Vec<ReconcileKey> = guard(&self.pending).iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of finished passes, successful or not.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Queues every repository and every build unit in the store.
    pub async fn enqueue_all(&self) {
        let repos = match self.store.list_repos().await {
            Ok(repos) => repos,
            Err(e) => {
                log::error!("Unable to list repositories: {}", e);
                return;
            }
        };
        for repo in repos {
            let name = repo.metadata.name.clone();
            match self.store.list_hashes_by_owner(&name).await {
                Ok(hashes) => {
                    for hash in hashes {
                        self.enqueue(ReconcileKey::Hash(hash.metadata.name));
                    }
                }
                Err(e) => log::error!("Unable to list hashes of '{}': {}", name, e),
            }
            self.enqueue(ReconcileKey::GitRepo(name));
        }
    }

    /// Processes the queue until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut queue) = guard(&self.receiver).take() else {
            log::error!("Controller is already running");
            return;
        };

        let router = tokio::spawn(Arc::clone(&self).route_events(self.store.watch(), shutdown.clone()));
        self.enqueue_all().await;
        log::info!("Controller started");

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                key = queue.recv() => {
                    let Some(key) = key else { break };
                    guard(&self.pending).remove(&key);
                    in_flight.retain(|handle| !handle.is_finished());
                    let controller = Arc::clone(&self);
                    in_flight.push(tokio::spawn(async move { controller.process(key).await }));
                }
            }
        }

        log::info!("Shutting down controller...");
        self.stopped.store(true, Ordering::Release);
        for (_, timer) in guard(&self.timers).drain() {
            timer.abort();
        }
        router.abort();

        for result in futures_util::future::join_all(in_flight).await {
            if let Err(e) = result {
                log::error!("Reconcile task failed: {}", e);
            }
        }
        log::info!("Controller stopped after {} passes", self.passes());
    }

    async fn process(&self, key: ReconcileKey) {
        let lock = self.lock_for(&key);
        let _serial = lock.lock().await;

        let outcome: Result<(), ReconcileError> = match &key {
            ReconcileKey::GitRepo(name) => self.repos.reconcile(name).await.map(|report| {
                if !report.skipped.is_empty() {
                    log::warn!("{}: {} operations skipped", key, report.skipped.len());
                }
            }),
            ReconcileKey::Hash(name) => self.pipeline.reconcile(name).await.map(|report| {
                for warning in &report.warnings {
                    log::warn!("{}: {}", key, warning);
                }
            }),
        };
        self.passes.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                guard(&self.failures).remove(&key);
                if let ReconcileKey::GitRepo(name) = &key {
                    self.schedule_resync(&key, name).await;
                }
            }
            Err(e) if e.is_retryable() => {
                let attempt = {
                    let mut failures = guard(&self.failures);
                    let attempt = failures.entry(key.clone()).or_insert(0);
                    *attempt += 1;
                    *attempt
                };
                let delay = self.settings.backoff(attempt);
                log::warn!(
                    "Reconcile of {} failed (attempt {}), retrying in {:?}: {}",
                    key,
                    attempt,
                    delay,
                    e
                );
                self.schedule(key, delay);
            }
            Err(e) => {
                log::error!("Reconcile of {} failed: {}", key, e);
                if let ReconcileKey::GitRepo(name) = &key {
                    self.schedule_resync(&key, name).await;
                }
            }
        }
    }

    /// Schedules the fallback re-listing of a repository that still exists.
    async fn schedule_resync(&self, key: &ReconcileKey, name: &str) {
        match self.store.get_repo(name).await {
            Ok(Some(_)) => self.schedule(key.clone(), self.settings.resync_interval),
            Ok(None) => self.forget(key),
            Err(e) => {
                log::warn!("Unable to check {}: {}", key, e);
                self.schedule(key.clone(), self.settings.resync_interval);
            }
        }
    }

    /// Requeues `key` after `delay`, replacing any timer already set for it.
    fn schedule(&self, key: ReconcileKey, delay: Duration) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let sender = self.sender.clone();
        let pending = Arc::clone(&self.pending);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if guard(&pending).insert(timer_key.clone()) {
                let _ = sender.send(timer_key);
            }
        });
        if let Some(previous) = guard(&self.timers).insert(key, handle) {
            previous.abort();
        }
    }

    /// Drops all bookkeeping for a deleted resource.
    fn forget(&self, key: &ReconcileKey) {
        if let Some(timer) = guard(&self.timers).remove(key) {
            timer.abort();
        }
        guard(&self.failures).remove(key);
        guard(&self.locks).remove(key);
    }

    fn lock_for(&self, key: &ReconcileKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            guard(&self.locks)
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn route_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Ok(event) => self.route(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {} store events, requeueing everything", missed);
                        self.enqueue_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Maps one store change to the keys that must be reconciled.
    pub fn route(&self, event: &WatchEvent) {
        if event.change == ChangeType::StatusModified {
            return;
        }

        let owner_repo = event
            .owner
            .as_ref()
            .filter(|o| o.kind == ResourceKind::GitRepo.to_string())
            .map(|o| ReconcileKey::GitRepo(o.name.clone()));

        match event.kind.parse::<ResourceKind>() {
            Ok(ResourceKind::GitRepo) => {
                let key = ReconcileKey::GitRepo(event.name.clone());
                if event.change == ChangeType::Deleted {
                    self.forget(&key);
                } else {
                    self.enqueue(key);
                }
            }
            Ok(ResourceKind::Hash) => {
                let key = ReconcileKey::Hash(event.name.clone());
                if event.change == ChangeType::Deleted {
                    self.forget(&key);
                } else {
                    self.enqueue(key);
                }
                if let Some(owner) = owner_repo {
                    self.enqueue(owner);
                }
            }
            Err(_) => {
                if event.change == ChangeType::Created {
                    return;
                }
                if let Some(owner) = event
                    .owner
                    .as_ref()
                    .filter(|o| o.kind == ResourceKind::Hash.to_string())
                {
                    self.enqueue(ReconcileKey::Hash(owner.name.clone()));
                }
            }
        }
    }
}
