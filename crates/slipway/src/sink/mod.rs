//! Artifact sinks: durable storage for rendered manifests.
//!
//! A [`SinkProvider`] is registered under a name in the plugin registry and
//! opens an [`ArtifactSink`] for the bucket named by a build unit's store
//! configuration.

pub mod filesystem;
pub mod memory;

use std::sync::Arc;

use crate::error::SinkError;

pub use filesystem::{FileSink, FileSinkProvider};
pub use memory::{MemorySink, MemorySinkProvider, SavedArtifact};

/// Stores one rendered payload per build unit and operation.
pub trait ArtifactSink: Send + Sync {
    fn save(&self, hash: &str, operation: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Opens sinks for a named bucket.
pub trait SinkProvider: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, bucket: &str) -> Result<Arc<dyn ArtifactSink>, SinkError>;
}

/// Rejects key segments that could escape their directory.
pub(crate) fn validate_segment(segment: &str) -> Result<(), SinkError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(SinkError::InvalidKey(segment.to_string()));
    }
    Ok(())
}
