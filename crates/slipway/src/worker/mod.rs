pub mod job;
pub mod pool;

pub use job::{ArchiveJob, ArchiveStats};
pub use pool::ArchiveQueue;
