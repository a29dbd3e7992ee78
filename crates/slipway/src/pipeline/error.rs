use crate::resource::ObjectReference;

/// Non-fatal problems recorded while a build unit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// The operation has no path and was skipped.
    EmptyPath { operation: String },
    /// The artifact sink could not be opened; nothing is archived this run.
    SinkUnavailable { bucket: String, error: String },
    /// The rendered output could not be handed to the archive queue.
    ArchiveSkipped { operation: String, error: String },
    /// A previously produced object could not be deleted.
    ReapFailed {
        object: ObjectReference,
        error: String,
    },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::EmptyPath { operation } => {
                write!(f, "operation '{}' has no path", operation)
            }
            PipelineWarning::SinkUnavailable { bucket, error } => {
                write!(f, "artifact sink for bucket '{}' unavailable: {}", bucket, error)
            }
            PipelineWarning::ArchiveSkipped { operation, error } => {
                write!(f, "archive of operation '{}' skipped: {}", operation, error)
            }
            PipelineWarning::ReapFailed { object, error } => {
                write!(f, "unable to delete orphaned {}: {}", object, error)
            }
        }
    }
}
