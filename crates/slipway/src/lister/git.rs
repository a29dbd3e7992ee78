//! Reference listing through `git ls-remote`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::{classify_git_error, Credentials, GitRef, ListError, ReferenceLister};

const PEELED_SUFFIX: &str = "^{}";

pub struct GitCliLister {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for GitCliLister {
    fn default() -> Self {
        Self::new("git", Duration::from_secs(60))
    }
}

impl GitCliLister {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReferenceLister for GitCliLister {
    async fn list(&self, uri: &str, credentials: &Credentials) -> Result<Vec<GitRef>, ListError> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(["ls-remote", "--", uri])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in auth_env(credentials)? {
            cmd.env(key, value);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ListError::Spawn(e.to_string()))?,
            Err(_) => return Err(ListError::Timeout(self.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim().is_empty() {
                return Err(ListError::Failed(format!(
                    "git ls-remote exited with code {}",
                    output.status.code().unwrap_or(-1)
                )));
            }
            return Err(classify_git_error(&stderr));
        }

        let refs = parse_ls_remote(&String::from_utf8_lossy(&output.stdout))?;
        log::debug!("Listed {} references from {}", refs.len(), uri);
        Ok(refs)
    }
}

/// Environment for a non-interactive git invocation.
fn auth_env(credentials: &Credentials) -> Result<Vec<(String, String)>, ListError> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    if let Some(key_path) = &credentials.ssh_key_path {
        if !key_path.exists() {
            return Err(ListError::Auth(format!(
                "SSH key file not found: {}",
                key_path.display()
            )));
        }
        env.push((
            "GIT_SSH_COMMAND".to_string(),
            format!(
                "ssh -i {} -o StrictHostKeyChecking=accept-new -o BatchMode=yes",
                quote_path(key_path)
            ),
        ));
    }

    Ok(env)
}

/// Single-quotes a path for the shell git uses to run `GIT_SSH_COMMAND`.
fn quote_path(path: &Path) -> String {
    let escaped = path.display().to_string().replace('\'', "'\\''");
    if escaped.starts_with('-') {
        format!("'./{}'", escaped)
    } else {
        format!("'{}'", escaped)
    }
}

/// Parses `<sha>\t<ref>` lines. A peeled annotated tag (`<ref>^{}`) replaces
/// the tag object id with the commit it points to.
pub fn parse_ls_remote(output: &str) -> Result<Vec<GitRef>, ListError> {
    let mut refs: Vec<GitRef> = Vec::new();

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let (hash, name) = line
            .split_once('\t')
            .ok_or_else(|| ListError::Malformed(line.to_string()))?;
        let hash = hash.trim();
        let name = name.trim();
        if hash.is_empty() || name.is_empty() {
            return Err(ListError::Malformed(line.to_string()));
        }

        if let Some(tag) = name.strip_suffix(PEELED_SUFFIX) {
            match refs.iter_mut().find(|r| r.name == tag) {
                Some(existing) => existing.hash = hash.to_string(),
                None => refs.push(GitRef::new(tag, hash)),
            }
            continue;
        }

        refs.push(GitRef::new(name, hash));
    }

    Ok(refs)
}
