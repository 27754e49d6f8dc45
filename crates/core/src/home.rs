//! On-disk layout of the detest home directory.
//!
//! | Path                          | Contents                          |
//! |-------------------------------|-----------------------------------|
//! | `$DETEST_HOME` or `~/.detest` | root                              |
//! | `<root>/projects/<name>`      | clone of the project under test   |
//! | `<root>/images`               | reserved for cached images        |

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Environment variable overriding the home directory.
pub const HOME_ENV_VAR: &str = "DETEST_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetestHome {
    root: PathBuf,
}

impl DetestHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `DETEST_HOME`, falling back to `$HOME/.detest`.
    pub fn from_env() -> Result<Self, CoreError> {
        if let Ok(root) = std::env::var(HOME_ENV_VAR) {
            if !root.trim().is_empty() {
                return Ok(Self::new(root));
            }
        }
        let home = std::env::var("HOME").map_err(|_| {
            CoreError::NotFound(format!("neither {HOME_ENV_VAR} nor HOME is set"))
        })?;
        Ok(Self::new(Path::new(&home).join(".detest")))
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Directory the named project is cloned into.
    pub fn project_dir(&self, project_name: &str) -> PathBuf {
        self.projects_dir().join(project_name)
    }

    /// Create the root, `projects/` and `images/` if missing.
    pub fn ensure(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(self.projects_dir())?;
        std::fs::create_dir_all(self.images_dir())?;
        Ok(())
    }
}
