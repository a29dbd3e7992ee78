use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::{BuildError, ManifestBuilder};
use crate::document::DocumentSet;

/// Runs `kustomize build <path>` and parses its YAML stream.
pub struct KustomizeBuilder {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for KustomizeBuilder {
    fn default() -> Self {
        Self::new("kustomize", Duration::from_secs(120))
    }
}

impl KustomizeBuilder {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ManifestBuilder for KustomizeBuilder {
    async fn build(&self, path: &str) -> Result<DocumentSet, BuildError> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(["build", path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| BuildError::Spawn(e.to_string()))?,
            Err(_) => {
                return Err(BuildError::Timeout {
                    path: path.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(classify_build_error(
                path,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        DocumentSet::from_yaml(&stdout).map_err(|e| BuildError::InvalidOutput {
            path: path.to_string(),
            source: e,
        })
    }
}

/// Maps kustomize stderr to a build error.
pub fn classify_build_error(path: &str, stderr: &str) -> BuildError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("no such file or directory")
        || lower.contains("does not exist")
        || lower.contains("must build at directory")
        || lower.contains("unable to find one of")
        || lower.contains("not a valid directory")
    {
        return BuildError::PathNotFound {
            path: path.to_string(),
            message,
        };
    }

    BuildError::Failed {
        path: path.to_string(),
        message,
    }
}
