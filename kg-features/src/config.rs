//! Dataset configuration and directory discovery

use crate::error::{FeatureError, Result};
use crate::split::Split;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the dataset directory
pub const DATA_PATH_ENV: &str = "KG_FEATURES_DATA";

/// Maximum number of rows returned by `get_examples` in debug mode
pub const DEBUG_EXAMPLE_LIMIT: usize = 1000;

/// Dataset loading options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory containing the split, filter and id-map files
    pub data_path: PathBuf,
    /// Truncate examples to `DEBUG_EXAMPLE_LIMIT` rows
    pub debug: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            debug: false,
        }
    }
}

impl DatasetConfig {
    pub fn new(data_path: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            data_path: data_path.into(),
            debug,
        }
    }
}

fn looks_like_dataset(path: &Path) -> bool {
    path.join(Split::Train.file_name()).exists()
}

/// Find the dataset directory with priority:
/// 1. Explicit path (command line)
/// 2. KG_FEATURES_DATA environment variable
/// 3. `data/` under the current directory
pub fn find_data_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if looks_like_dataset(path) {
            return Ok(path.to_path_buf());
        }
        return Err(FeatureError::data_load(format!(
            "No {} in {}",
            Split::Train.file_name(),
            path.display()
        )));
    }

    if let Ok(env_path) = std::env::var(DATA_PATH_ENV) {
        let path = PathBuf::from(&env_path);
        if looks_like_dataset(&path) {
            log::info!("Using {}: {}", DATA_PATH_ENV, path.display());
            return Ok(path);
        }
        log::warn!("{} set but no dataset found: {}", DATA_PATH_ENV, env_path);
    }

    if let Ok(cwd) = std::env::current_dir() {
        let local = cwd.join("data");
        if looks_like_dataset(&local) {
            log::info!("Using local dataset: {}", local.display());
            return Ok(local);
        }
    }

    Err(FeatureError::data_load(format!(
        "Dataset not found. Checked:\n\
         - --data argument\n\
         - {} environment variable\n\
         - ./data",
        DATA_PATH_ENV
    )))
}
