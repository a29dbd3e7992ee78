use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlipwayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Artifact sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] crate::reconciler::ReconcileError),

    #[error("Declaration error: {0}")]
    Declarations(#[from] crate::declarations::LoaderError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to read plugin directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read plugin manifest '{path}': {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plugin manifest '{path}': {message}")]
    ParseManifest { path: PathBuf, message: String },

    #[error("Plugin '{path}' does not implement {expected}")]
    InvalidPluginInterface {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("Unknown plugin provider '{provider}' in '{path}'")]
    UnknownProvider { path: PathBuf, provider: String },

    #[error("Plugin '{path}' is missing required option '{option}'")]
    MissingOption {
        path: PathBuf,
        option: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Invalid bucket name '{0}'")]
    InvalidBucket(String),

    #[error("Invalid artifact key segment '{0}'")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to spawn archive worker: {0}")]
    SpawnFailed(String),

    #[error("Archive queue is full")]
    QueueFull,

    #[error("Archive channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SlipwayError>;
