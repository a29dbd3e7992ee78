//! Build unit pipeline: build, transform, apply, archive, reap.

pub mod context;
pub mod error;
pub mod runner;
pub mod transform;

pub use context::BuildContext;
pub use error::PipelineWarning;
pub use runner::{HashReport, Pipeline};
pub use transform::{TransformError, TransformOutcome};
