use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the store directory.
pub const DATA_DIR_ENV: &str = "BMNEVAL_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The BMNEVAL_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/bmneval/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("bmneval")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The usage bucket store.
    pub fn usages_db(&self) -> PathBuf {
        self.root.join("usages.redb")
    }

    pub fn models_db(&self) -> PathBuf {
        self.root.join("models.redb")
    }
}
