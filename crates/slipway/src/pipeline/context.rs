use std::sync::Arc;

use crate::resource::{Hash, ObjectReference};
use crate::sink::ArtifactSink;

use super::error::PipelineWarning;

pub struct BuildContext {
    // Input
    pub hash: Hash,

    // None when the build unit has no store configured
    pub sink: Option<Arc<dyn ArtifactSink>>,

    // Objects recorded by the previous run
    pub previous: Vec<ObjectReference>,

    // Objects created or updated by this run, in apply order
    pub applied: Vec<ObjectReference>,

    // Orphans deleted after the operations ran
    pub reaped: Vec<ObjectReference>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl BuildContext {
    pub fn new(hash: Hash) -> Self {
        let previous = hash.status.objects.clone();
        Self {
            hash,
            sink: None,
            previous,
            applied: Vec::new(),
            reaped: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Adds `reference` to the applied list unless the same object is already there.
    pub fn record_applied(&mut self, reference: ObjectReference) {
        if !self.applied.iter().any(|r| r.same_object(&reference)) {
            self.applied.push(reference);
        }
    }

    /// Previous objects this run did not produce again.
    pub fn orphans(&self) -> Vec<ObjectReference> {
        self.previous
            .iter()
            .filter(|old| !self.applied.iter().any(|new| new.same_object(old)))
            .cloned()
            .collect()
    }
}
