use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use detest_core::config::{validate_project_name, ProjectConfig, CONFIG_FILE_NAME};
use detest_runner::controller::DEFAULT_TESTS_DIR;

/// Create `<parent>/<name>/config.json` and an empty `tests/` directory.
pub fn run(name: &str, path_to_project: &str, parent: &Path) -> anyhow::Result<PathBuf> {
    let name = name.trim();
    validate_project_name(name)?;

    let project = parent.join(name);
    if project.exists() {
        bail!("Project {name} already exists at {}", project.display());
    }

    std::fs::create_dir(&project)
        .with_context(|| format!("Failed to create {}", project.display()))?;
    std::fs::create_dir(project.join(DEFAULT_TESTS_DIR))
        .with_context(|| format!("Failed to create {}/{DEFAULT_TESTS_DIR}", project.display()))?;

    ProjectConfig::scaffold(name, path_to_project.trim()).write_to(&project.join(CONFIG_FILE_NAME))?;

    tracing::info!(project = %name, dir = %project.display(), "Project created");
    println!("Project {name} created successfully!");
    println!("Structure:");
    println!("{name}/");
    println!("├── {CONFIG_FILE_NAME}");
    println!("└── {DEFAULT_TESTS_DIR}/");
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffolds_config_and_tests_dir() {
        let dir = tempfile::tempdir().unwrap();
        let project = run("demo", "https://example.com/demo.git", dir.path()).unwrap();

        assert!(project.join("tests").is_dir());
        let config = ProjectConfig::load(&project.join("config.json")).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.path_to_project, "https://example.com/demo.git");
        assert_eq!(config.parallel_execution, 1);
        assert!(config.environment_variables.is_empty());
    }

    #[test]
    fn existing_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("demo")).unwrap();

        let err = run("demo", "x", dir.path()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn empty_or_unsafe_name_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run("  ", "x", dir.path()).is_err());
        assert!(run("../escape", "x", dir.path()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
