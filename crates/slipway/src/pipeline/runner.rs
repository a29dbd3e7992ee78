use std::sync::Arc;

use tracing::{info_span, Instrument};

use crate::builder::ManifestBuilder;
use crate::document::{Document, DocumentError, DocumentSet, DEFAULT_NAMESPACE};
use crate::events::{title_case, Event, EventRecorder};
use crate::plugins::PluginRegistry;
use crate::reconciler::{ReconcileError, Result};
use crate::resource::{ObjectReference, Operation};
use crate::sink::ArtifactSink;
use crate::store::{ApplyResult, ObjectStore};
use crate::worker::{ArchiveJob, ArchiveQueue};

use super::context::BuildContext;
use super::error::PipelineWarning;
use super::transform::apply_transformers;

const NAMESPACE_API_VERSION: &str = "v1";
const NAMESPACE_KIND: &str = "Namespace";

/// Outcome of one build unit run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashReport {
    /// Objects recorded in the build unit status.
    pub applied: Vec<ObjectReference>,
    pub reaped: Vec<ObjectReference>,
    pub warnings: Vec<PipelineWarning>,
}

/// Runs a build unit's operations and converges its produced objects.
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    builder: Arc<dyn ManifestBuilder>,
    plugins: Arc<PluginRegistry>,
    recorder: Arc<dyn EventRecorder>,
    archive: Arc<ArchiveQueue>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        builder: Arc<dyn ManifestBuilder>,
        plugins: Arc<PluginRegistry>,
        recorder: Arc<dyn EventRecorder>,
        archive: Arc<ArchiveQueue>,
    ) -> Self {
        Self {
            store,
            builder,
            plugins,
            recorder,
            archive,
        }
    }

    /// Runs the named build unit. A build unit that no longer exists is a no-op.
    pub async fn reconcile(&self, name: &str) -> Result<HashReport> {
        let Some(hash) = self.store.get_hash(name).await? else {
            log::debug!("Hash '{}' is gone, nothing to build", name);
            return Ok(HashReport::default());
        };

        let span = info_span!("pipeline", hash = %name, repo = %hash.spec.gitrepo);
        self.run(BuildContext::new(hash)).instrument(span).await
    }

    /// Run the full pipeline for a single build unit.
    pub async fn run(&self, mut ctx: BuildContext) -> Result<HashReport> {
        // Step 1: Resolve owner
        self.step_resolve_owner(&ctx)
            .instrument(info_span!("resolve_owner"))
            .await?;

        // Step 2: Open the artifact sink, if any
        self.step_open_sink(&mut ctx)?;

        // Step 3: Order operations by weight
        let operations = sorted_operations(&ctx.hash.spec.operations);

        // Step 4: Run every operation
        for operation in &operations {
            let span = info_span!("operation", operation = %operation.name);
            self.step_run_operation(&mut ctx, operation)
                .instrument(span)
                .await?;
        }

        // Step 5: Reap orphans
        self.step_reap_orphans(&mut ctx)
            .instrument(info_span!("reap_orphans"))
            .await;

        // Step 6: Persist status
        ctx.hash.status.objects = ctx.applied.clone();
        self.store.update_hash_status(&ctx.hash).await?;

        log::info!(
            "Hash '{}' reconciled: {} objects, {} reaped, {} warnings",
            ctx.hash.metadata.name,
            ctx.applied.len(),
            ctx.reaped.len(),
            ctx.warnings.len()
        );

        Ok(HashReport {
            applied: ctx.applied,
            reaped: ctx.reaped,
            warnings: ctx.warnings,
        })
    }

    async fn step_resolve_owner(&self, ctx: &BuildContext) -> Result<()> {
        let owner = &ctx.hash.spec.gitrepo;
        match self.store.get_repo(owner).await? {
            Some(_) => Ok(()),
            None => Err(ReconcileError::OwnerNotFound {
                hash: ctx.hash.metadata.name.clone(),
                repo: owner.clone(),
            }),
        }
    }

    /// Only an unregistered sink kind stops the build; a sink that fails to
    /// open just disables archiving for this run.
    fn step_open_sink(&self, ctx: &mut BuildContext) -> Result<()> {
        let Some(store) = ctx.hash.spec.store.clone().filter(|s| !s.kind.is_empty()) else {
            log::debug!("No artifact store selected for '{}'", ctx.hash.metadata.name);
            return Ok(());
        };

        let provider =
            self.plugins
                .sink(&store.kind)
                .ok_or_else(|| ReconcileError::NoSuchSinkPlugin {
                    hash: ctx.hash.metadata.name.clone(),
                    kind: store.kind.clone(),
                })?;

        match provider.open(&store.bucket) {
            Ok(sink) => ctx.sink = Some(sink),
            Err(e) => {
                log::warn!(
                    "Unable to open '{}' sink for bucket '{}', archiving disabled: {}",
                    store.kind,
                    store.bucket,
                    e
                );
                ctx.warnings.push(PipelineWarning::SinkUnavailable {
                    bucket: store.bucket,
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn step_run_operation(
        &self,
        ctx: &mut BuildContext,
        operation: &Operation,
    ) -> Result<()> {
        if operation.path.trim().is_empty() {
            log::error!("Operation '{}' has no path set, skipping", operation.name);
            ctx.warnings.push(PipelineWarning::EmptyPath {
                operation: operation.name.clone(),
            });
            return Ok(());
        }

        let hash_name = ctx.hash.metadata.name.clone();
        let path = effective_path(operation, &hash_name);

        let mut docs = self
            .builder
            .build(&path)
            .await
            .map_err(|source| ReconcileError::Build {
                operation: operation.name.clone(),
                source,
            })?;
        log::debug!("Built {} documents from {}", docs.len(), path);

        let outcome = apply_transformers(
            &mut docs,
            &operation.transformers,
            &operation.reference_title,
            &hash_name,
        )
        .map_err(|source| ReconcileError::Transform {
            operation: operation.name.clone(),
            source,
        })?;

        for namespace in &outcome.namespaces {
            self.step_ensure_namespace(ctx, namespace).await?;
        }

        // Archive the transformed output as built, before defaulting and ownership.
        let rendered = ctx.sink.clone().map(|sink| (sink, docs.to_yaml()));

        self.step_apply_documents(ctx, &mut docs).await?;

        if let Some((sink, yaml)) = rendered {
            self.step_archive(ctx, sink, operation, yaml);
        }

        Ok(())
    }

    async fn step_ensure_namespace(&self, ctx: &mut BuildContext, namespace: &str) -> Result<()> {
        let mut doc = Document::new(NAMESPACE_API_VERSION, NAMESPACE_KIND, namespace);
        doc.set_controller(&ctx.hash.owner_reference());

        let result = self.store.apply_object(&doc).await?;
        if result != ApplyResult::Unchanged {
            self.recorder.record(Event::normal(
                ctx.hash.object_reference(),
                result.as_str(),
                format!(
                    "{} Kind:{} Named:{}",
                    title_case(result.as_str()),
                    NAMESPACE_KIND,
                    namespace
                ),
            ));
        }

        let reference = self.stored_reference(&doc).await?;
        ctx.record_applied(reference);
        Ok(())
    }

    async fn step_apply_documents(
        &self,
        ctx: &mut BuildContext,
        docs: &mut DocumentSet,
    ) -> Result<()> {
        let owner = ctx.hash.owner_reference();

        for doc in docs.iter_mut() {
            if doc.namespace().is_empty() {
                doc.set_namespace(DEFAULT_NAMESPACE);
            }
            doc.set_controller(&owner);

            let result = self.store.apply_object(doc).await?;
            if result == ApplyResult::Unchanged {
                log::debug!("{} unchanged", doc.object_reference());
            } else {
                self.recorder.record(Event::normal(
                    ctx.hash.object_reference(),
                    result.as_str(),
                    format!(
                        "{} Kind:{} Named:{} in Namespace:{}",
                        title_case(result.as_str()),
                        doc.kind(),
                        doc.name(),
                        doc.namespace()
                    ),
                ));
            }

            let reference = self.stored_reference(doc).await?;
            ctx.record_applied(reference);
        }
        Ok(())
    }

    /// Hands the rendered set to the archive queue without waiting for the write.
    fn step_archive(
        &self,
        ctx: &mut BuildContext,
        sink: Arc<dyn ArtifactSink>,
        operation: &Operation,
        rendered: std::result::Result<String, DocumentError>,
    ) {
        let payload = match rendered {
            Ok(yaml) => yaml.into_bytes(),
            Err(e) => {
                log::error!("Unable to render '{}' for archiving: {}", operation.name, e);
                ctx.warnings.push(PipelineWarning::ArchiveSkipped {
                    operation: operation.name.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let job = ArchiveJob::new(sink, &ctx.hash.metadata.name, &operation.name, payload);
        if let Err(e) = self.archive.submit(job) {
            log::warn!("Unable to queue archive of '{}': {}", operation.name, e);
            ctx.warnings.push(PipelineWarning::ArchiveSkipped {
                operation: operation.name.clone(),
                error: e.to_string(),
            });
        }
    }

    async fn step_reap_orphans(&self, ctx: &mut BuildContext) {
        for orphan in ctx.orphans() {
            match self.store.delete_object(&orphan).await {
                Ok(()) => {
                    self.recorder.record(Event::normal(
                        ctx.hash.object_reference(),
                        "deleted",
                        format!(
                            "Deleted Kind:{} Named:{} in Namespace:{}",
                            orphan.kind, orphan.name, orphan.namespace
                        ),
                    ));
                    ctx.reaped.push(orphan);
                }
                Err(e) if e.is_not_found() => {
                    log::debug!("Orphan {} already deleted", orphan);
                }
                Err(e) => {
                    log::error!("Unable to delete orphaned {}: {}", orphan, e);
                    ctx.warnings.push(PipelineWarning::ReapFailed {
                        object: orphan,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Reference to `doc` as stored, carrying the uid the store assigned.
    async fn stored_reference(&self, doc: &Document) -> Result<ObjectReference> {
        let reference = doc.object_reference();
        Ok(self
            .store
            .get_object(&reference)
            .await?
            .map(|stored| stored.object_reference())
            .unwrap_or(reference))
    }
}

/// Operations ordered by ascending weight; a missing weight counts as zero
/// and equal weights keep declaration order.
pub fn sorted_operations(operations: &[Operation]) -> Vec<Operation> {
    let mut sorted = operations.to_vec();
    sorted.sort_by_key(|op| op.weight.unwrap_or(0));
    sorted
}

/// The build path, with `?ref=<hash>` appended when the operation asks for it.
pub fn effective_path(operation: &Operation, hash: &str) -> String {
    if operation.hash_path {
        format!("{}?ref={}", operation.path, hash)
    } else {
        operation.path.clone()
    }
}
