use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "DOCSIFT_DATA_DIR";

/// On-disk home of every store.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSIFT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docsift/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docsift")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_db(&self) -> PathBuf {
        self.root.join("metadata.redb")
    }

    /// Vector file for `model_id`. One file per model, so switching models
    /// never mixes dimensions.
    pub fn vectors_db(&self, model_id: &str) -> Result<PathBuf> {
        let dir = self.root.join("vectors");
        ensure_dir(&dir)?;
        Ok(dir.join(format!("{}.redb", file_stem(model_id))))
    }

    pub fn lexical_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("lexical");
        ensure_dir(&path)?;
        Ok(path)
    }

    /// Move a damaged store out of the way, keeping it for inspection.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        let target = path.with_file_name(format!(
            "{name}.corrupt-{}",
            crate::document::unix_now()
        ));
        std::fs::rename(path, &target)?;
        Ok(target)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|_| Error::DataDir(path.to_path_buf()))
}

fn file_stem(model_id: &str) -> String {
    model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
