pub mod loader;
pub mod schema;

pub use loader::{config_path, load_config, load_config_from_str, load_or_default, CONFIG_ENV};
pub use schema::{ControllerConfig, GitConfig, KustomizeConfig, LogFormat};
