use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use super::{validate_segment, ArtifactSink, SinkProvider};
use crate::error::SinkError;

/// Opens [`FileSink`]s rooted at `<root>/<bucket>`.
pub struct FileSinkProvider {
    name: String,
    root: PathBuf,
}

impl FileSinkProvider {
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SinkProvider for FileSinkProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, bucket: &str) -> Result<Arc<dyn ArtifactSink>, SinkError> {
        let directory = if bucket.is_empty() {
            self.root.clone()
        } else {
            validate_segment(bucket).map_err(|_| SinkError::InvalidBucket(bucket.to_string()))?;
            self.root.join(bucket)
        };
        Ok(Arc::new(FileSink::new(directory)))
    }
}

/// Writes each payload to `<dir>/<hash>/<operation>/<unix-seconds>.yaml`.
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stores `content` and returns the path it landed at.
    pub fn store(&self, hash: &str, operation: &str, content: &[u8]) -> Result<PathBuf, SinkError> {
        validate_segment(hash)?;
        validate_segment(operation)?;

        let dir_path = self.directory.join(hash).join(operation);
        ensure_directory(&dir_path)?;

        let stem = Utc::now().timestamp().to_string();
        store_with_atomic_creation(&dir_path, &stem, "yaml", content)
    }
}

impl ArtifactSink for FileSink {
    fn save(&self, hash: &str, operation: &str, payload: &[u8]) -> Result<(), SinkError> {
        let path = self.store(hash, operation, payload)?;
        log::debug!("Archived {}/{} to {}", hash, operation, path.display());
        Ok(())
    }
}

fn ensure_directory(path: &Path) -> Result<(), SinkError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| SinkError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates `<stem>.<ext>` exclusively, falling back to `<stem>_2.<ext>` and
/// so on when two archives land in the same second.
fn store_with_atomic_creation(
    dir_path: &Path,
    stem: &str,
    extension: &str,
    content: &[u8],
) -> Result<PathBuf, SinkError> {
    use std::io::Write;

    for counter in 1..=1000 {
        let filename = if counter == 1 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, counter, extension)
        };
        let try_path = dir_path.join(&filename);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&try_path)
        {
            Ok(mut file) => {
                file.write_all(content)
                    .map_err(|e| SinkError::WriteFile {
                        path: try_path.clone(),
                        source: e,
                    })?;
                return Ok(try_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(SinkError::WriteFile {
                    path: try_path,
                    source: e,
                });
            }
        }
    }

    Err(SinkError::FileExists(
        dir_path.join(format!("{}.{}", stem, extension)),
    ))
}
