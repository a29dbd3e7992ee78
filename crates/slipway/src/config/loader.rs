use std::path::{Path, PathBuf};

use crate::config::schema::ControllerConfig;
use crate::error::ConfigError;

/// Environment variable naming the config file when no argument is given.
pub const CONFIG_ENV: &str = "SLIPWAY_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ControllerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content).map_err(|e| match e {
        ConfigError::ParseYaml { message, .. } => ConfigError::ParseYaml {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

pub fn load_config_from_str(content: &str) -> Result<ControllerConfig, ConfigError> {
    // An empty file is a config with every default.
    let config: ControllerConfig = if content.trim().is_empty() {
        ControllerConfig::default()
    } else {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: PathBuf::new(),
            message: e.to_string(),
        })?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Picks the config file from the first argument, then [`CONFIG_ENV`].
pub fn config_path(args: &[String]) -> Option<PathBuf> {
    args.get(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Loads the config at `path`, or the defaults when there is none.
pub fn load_or_default(path: Option<&Path>) -> Result<ControllerConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(ControllerConfig::default()),
    }
}

fn validate_config(config: &ControllerConfig) -> Result<(), ConfigError> {
    if config.resync_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "resyncIntervalSecs must be greater than zero".to_string(),
        });
    }

    if config.archive_workers == 0 {
        return Err(ConfigError::Validation {
            message: "archiveWorkers must be greater than zero".to_string(),
        });
    }

    if config.archive_queue_capacity == Some(0) {
        return Err(ConfigError::Validation {
            message: "archiveQueueCapacity must be greater than zero".to_string(),
        });
    }

    if config.git.timeout_secs == 0 || config.kustomize.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "Tool timeouts must be greater than zero".to_string(),
        });
    }

    Ok(())
}
