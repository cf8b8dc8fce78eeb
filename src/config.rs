// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use cascade_if::CascadeConfig;
use thiserror::Error;

/// Names a yaml file to read the driver configuration from.
pub const CONFIG_ENV: &str = "CASCADE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

pub fn from_file(path: &Path) -> Result<CascadeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the configuration from `path`, falling back to `$CASCADE_CONFIG` and then to the
/// built in defaults.
pub fn load(path: Option<&Path>) -> Result<CascadeConfig, ConfigError> {
    if let Some(path) = path {
        return from_file(path);
    }

    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            tracing::debug!("Loading config from ${CONFIG_ENV}: {path:?}");
            from_file(Path::new(&path))
        }
        None => Ok(CascadeConfig::default()),
    }
}
