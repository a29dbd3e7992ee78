use std::sync::{Arc, Mutex};

use super::{validate_segment, ArtifactSink, SinkProvider};
use crate::error::SinkError;

/// A payload captured by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub bucket: String,
    pub hash: String,
    pub operation: String,
    pub payload: Vec<u8>,
}

/// Keeps every artifact in process. All sinks opened from one provider share
/// the same list.
#[derive(Clone, Default)]
pub struct MemorySinkProvider {
    name: String,
    saved: Arc<Mutex<Vec<SavedArtifact>>>,
}

impl MemorySinkProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            saved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn saved(&self) -> Vec<SavedArtifact> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SinkProvider for MemorySinkProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, bucket: &str) -> Result<Arc<dyn ArtifactSink>, SinkError> {
        Ok(Arc::new(MemorySink {
            bucket: bucket.to_string(),
            saved: Arc::clone(&self.saved),
        }))
    }
}

pub struct MemorySink {
    bucket: String,
    saved: Arc<Mutex<Vec<SavedArtifact>>>,
}

impl ArtifactSink for MemorySink {
    fn save(&self, hash: &str, operation: &str, payload: &[u8]) -> Result<(), SinkError> {
        validate_segment(hash)?;
        validate_segment(operation)?;
        if let Ok(mut saved) = self.saved.lock() {
            saved.push(SavedArtifact {
                bucket: self.bucket.clone(),
                hash: hash.to_string(),
                operation: operation.to_string(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}
