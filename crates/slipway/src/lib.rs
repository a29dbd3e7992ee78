pub mod builder;
pub mod config;
pub mod controller;
pub mod declarations;
pub mod document;
pub mod error;
pub mod events;
pub mod lister;
pub mod logging;
pub mod matcher;
pub mod pipeline;
pub mod plugins;
pub mod reconciler;
pub mod resolver;
pub mod resource;
pub mod sink;
pub mod store;
pub mod worker;

pub use config::{load_config, ControllerConfig};
pub use controller::{Controller, ControllerSettings, ReconcileKey};
pub use declarations::{DeclarationLoader, DeclarationValidator, LoaderError};
pub use document::{Document, DocumentSet};
pub use error::{ArchiveError, ConfigError, PluginError, Result, SinkError, SlipwayError};
pub use pipeline::{HashReport, Pipeline};
pub use plugins::PluginRegistry;
pub use reconciler::{GitRepoReconciler, GitRepoReport, ReconcileError};
pub use resolver::{resolve, DesiredState};
pub use resource::{GitRepo, Hash, Operation, Transformer};
pub use store::{MemoryStore, ObjectStore, StoreError};
pub use worker::ArchiveQueue;
