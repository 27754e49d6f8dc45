//! Test unit discovery over a directory of declarative modules.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use detest_core::report::ModuleFailure;

use crate::case::TestUnitDescriptor;
use crate::declarative::{DeclarativeCase, ModuleFile};

/// File extension of test modules.
pub const MODULE_EXTENSION: &str = "json";

/// A module that failed to load. Non-fatal under [`DiscoveryPolicy::BestEffort`].
pub type ModuleLoadFailure = ModuleFailure;

/// What to do when a module fails to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryPolicy {
    /// Record the failure and keep scanning.
    #[default]
    BestEffort,
    /// Abort discovery on the first failure.
    FailFast,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Cannot read test directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load test module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },
}

/// Units found, in module order then declaration order.
#[derive(Debug, Default)]
pub struct Discovery {
    pub units: Vec<TestUnitDescriptor>,
    pub failures: Vec<ModuleLoadFailure>,
}

/// Scan `directory` for test modules.
pub fn discover(directory: &Path, policy: DiscoveryPolicy) -> Result<Discovery, DiscoveryError> {
    discover_with(directory, policy, Vec::new())
}

/// Like [`discover`], but start from already-known units (e.g. a
/// [`Registry`](crate::registry::Registry)'s) so name clashes with them are
/// caught too.
pub fn discover_with(
    directory: &Path,
    policy: DiscoveryPolicy,
    seed: Vec<TestUnitDescriptor>,
) -> Result<Discovery, DiscoveryError> {
    let mut discovery = Discovery {
        units: seed,
        failures: Vec::new(),
    };

    for path in module_paths(directory)? {
        let module = module_name(&path);
        let loaded = {
            let known: HashSet<&str> = discovery.units.iter().map(|u| u.name.as_str()).collect();
            load_module(&path, &module, &known)
        };

        match loaded {
            Ok(units) => {
                tracing::debug!(module = %module, units = units.len(), "Loaded test module");
                discovery.units.extend(units);
            }
            Err(reason) => {
                if policy == DiscoveryPolicy::FailFast {
                    return Err(DiscoveryError::ModuleLoad { module, reason });
                }
                tracing::warn!(module = %module, reason = %reason, "Skipping test module");
                discovery.failures.push(ModuleLoadFailure { module, reason });
            }
        }
    }

    tracing::info!(
        units = discovery.units.len(),
        failures = discovery.failures.len(),
        dir = %directory.display(),
        "Test discovery complete",
    );
    Ok(discovery)
}

/// `*.json` files directly inside `directory`, sorted by file name,
/// skipping those whose stem starts with `_`.
fn module_paths(directory: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let read_err = |source| DiscoveryError::ReadDir {
        path: directory.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
            continue;
        }
        if module_name(&path).starts_with('_') {
            tracing::debug!(path = %path.display(), "Skipping initializer module");
            continue;
        }
        paths.push(path);
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Load every conforming case of one module.
///
/// Non-conforming cases are skipped; unreadable files, invalid JSON and
/// unit names already taken fail the whole module.
fn load_module(
    path: &Path,
    module: &str,
    known: &HashSet<&str>,
) -> Result<Vec<TestUnitDescriptor>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let file: ModuleFile = serde_json::from_str(&text).map_err(|e| format!("invalid module: {e}"))?;

    let mut names = HashSet::new();
    let mut units = Vec::new();
    for (index, raw) in file.cases.iter().enumerate() {
        let case = match DeclarativeCase::parse(raw) {
            Ok(case) => case,
            Err(reason) => {
                tracing::warn!(module, case = index + 1, reason = %reason, "Skipping non-conforming case");
                continue;
            }
        };
        if known.contains(case.name.as_str()) || !names.insert(case.name.clone()) {
            return Err(format!("duplicate unit name '{}'", case.name));
        }
        units.push(case.into_descriptor(module));
    }
    Ok(units)
}
