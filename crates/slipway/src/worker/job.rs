use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sink::ArtifactSink;

/// Rendered output of one operation, waiting to be saved.
#[derive(Clone)]
pub struct ArchiveJob {
    pub id: String,
    pub sink: Arc<dyn ArtifactSink>,
    pub hash: String,
    pub operation: String,
    pub payload: Vec<u8>,
    pub queued_at: DateTime<Utc>,
}

impl ArchiveJob {
    pub fn new(
        sink: Arc<dyn ArtifactSink>,
        hash: impl Into<String>,
        operation: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sink,
            hash: hash.into(),
            operation: operation.into(),
            payload,
            queued_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for ArchiveJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveJob")
            .field("id", &self.id)
            .field("hash", &self.hash)
            .field("operation", &self.operation)
            .field("bytes", &self.payload.len())
            .field("queued_at", &self.queued_at)
            .finish()
    }
}

/// Counters kept by the archive workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub submitted: usize,
    pub saved: usize,
    pub failed: usize,
    pub rejected: usize,
}
