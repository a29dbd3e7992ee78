use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Root of the `gitpaths/` and `objectstores/` plugin manifests.
    #[serde(default = "default_plugin_path")]
    pub plugin_path: PathBuf,
    #[serde(default = "default_declarations_dir")]
    pub declarations_dir: PathBuf,
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_archive_workers")]
    pub archive_workers: usize,
    /// Defaults to twice the worker count.
    #[serde(default)]
    pub archive_queue_capacity: Option<usize>,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub kustomize: KustomizeConfig,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_plugin_path() -> PathBuf {
    PathBuf::from("/etc/slipway/")
}

fn default_declarations_dir() -> PathBuf {
    PathBuf::from("./repos")
}

fn default_resync_interval() -> u64 {
    60
}

fn default_archive_workers() -> usize {
    num_cpus::get()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            plugin_path: default_plugin_path(),
            declarations_dir: default_declarations_dir(),
            resync_interval_secs: default_resync_interval(),
            archive_workers: default_archive_workers(),
            archive_queue_capacity: None,
            git: GitConfig::default(),
            kustomize: KustomizeConfig::default(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn queue_capacity(&self) -> usize {
        self.archive_queue_capacity
            .unwrap_or(self.archive_workers.saturating_mul(2))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

fn default_git_timeout() -> u64 {
    60
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout(),
            ssh_key_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeConfig {
    #[serde(default = "default_kustomize_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_kustomize_timeout")]
    pub timeout_secs: u64,
}

fn default_kustomize_binary() -> PathBuf {
    PathBuf::from("kustomize")
}

fn default_kustomize_timeout() -> u64 {
    120
}

impl Default for KustomizeConfig {
    fn default() -> Self {
        Self {
            binary: default_kustomize_binary(),
            timeout_secs: default_kustomize_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
