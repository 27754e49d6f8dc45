//! Project configuration (`config.json`) model and validation.
//!
//! A [`ProjectConfig`] is loaded once per invocation and never mutated.
//! Every command validates it up front so that a bad file is rejected
//! before any container or process is touched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Maximum length of a project name (it doubles as a directory name).
pub const MAX_PROJECT_NAME_LENGTH: usize = 128;

/// Upper bound on `parallel_execution`; each slot is a database plus a
/// concurrently running unit.
pub const MAX_PARALLEL_EXECUTION: u32 = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Shell commands used to prepare and launch the service under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    pub build: String,
    pub run: String,
    pub migrate: String,
}

impl CommandSet {
    /// Join the stages as `migrate && build && run`, skipping empty ones.
    ///
    /// Returns `None` when every stage is empty.
    pub fn pipeline(&self) -> Option<String> {
        let stages: Vec<&str> = [&self.migrate, &self.build, &self.run]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if stages.is_empty() {
            None
        } else {
            Some(stages.join(" && "))
        }
    }
}

/// Description of the project under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Where the project is cloned from (git URL or local path).
    pub path_to_project: String,
    pub project_name: String,
    /// Base URL the service listens on once running.
    #[serde(default)]
    pub project_url: String,
    /// Number of concurrent test slots (and provisioned databases).
    pub parallel_execution: u32,
    /// Variables exported to the service; values may contain `$DB_URL`.
    pub environment_variables: BTreeMap<String, String>,
    pub commands: CommandSet,
}

impl ProjectConfig {
    /// Default configuration written by `detest create`.
    pub fn scaffold(project_name: &str, path_to_project: &str) -> Self {
        Self {
            path_to_project: path_to_project.to_string(),
            project_name: project_name.to_string(),
            project_url: String::new(),
            parallel_execution: 1,
            environment_variables: BTreeMap::new(),
            commands: CommandSet::default(),
        }
    }

    /// Parse a configuration from JSON text without validating it.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::Validation(format!("{e}")))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CoreError::NotFound(format!("{} not found", path.display()))
            }
            _ => CoreError::Io(e),
        })?;
        Self::from_json(&text)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> Result<(), CoreError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Structural checks shared by every command.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_project_name(&self.project_name)?;

        if self.parallel_execution == 0 {
            return Err(CoreError::Validation(
                "parallel_execution must be at least 1".to_string(),
            ));
        }
        if self.parallel_execution > MAX_PARALLEL_EXECUTION {
            return Err(CoreError::Validation(format!(
                "parallel_execution exceeds maximum of {MAX_PARALLEL_EXECUTION}"
            )));
        }

        for key in self.environment_variables.keys() {
            if !is_env_var_name(key) {
                return Err(CoreError::Validation(format!(
                    "Invalid environment variable name: '{key}'"
                )));
            }
        }

        Ok(())
    }

    /// Checks required before `detest init` provisions anything.
    pub fn validate_for_init(&self) -> Result<(), CoreError> {
        self.validate()?;
        require_non_empty("path_to_project", &self.path_to_project)?;
        require_non_empty("commands.migrate", &self.commands.migrate)?;
        Ok(())
    }

    /// Checks required before `detest test` provisions anything.
    pub fn validate_for_test(&self) -> Result<(), CoreError> {
        self.validate()?;
        require_non_empty("project_url", &self.project_url)?;
        if !(self.project_url.starts_with("http://") || self.project_url.starts_with("https://"))
        {
            return Err(CoreError::Validation(format!(
                "project_url must be an http(s) URL, got '{}'",
                self.project_url
            )));
        }
        require_non_empty("commands.run", &self.commands.run)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate a project name: non-empty, bounded, and safe to use as a
/// single path component.
pub fn validate_project_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "project_name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_PROJECT_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "project_name exceeds maximum length of {MAX_PROJECT_NAME_LENGTH} characters"
        )));
    }
    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(format!(
            "project_name '{name}' may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
