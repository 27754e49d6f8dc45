use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use detest_container::settings::PostgresSettings;
use detest_container::{Provisioner, ResourceProvisioner};
use detest_core::config::ProjectConfig;
use detest_core::home::DetestHome;
use detest_core::shell::{self, CommandInput, DEFAULT_COMMAND_TIMEOUT};
use detest_core::template::{to_assignments, TemplateContext};
use detest_core::types::DatabaseEndpoint;
use tokio_util::sync::CancellationToken;

/// `git clone` can be slow for large repositories.
const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Provision one database, migrate it with the project's own command and
/// write the extracted schema to `schema_out`. The container is always
/// removed afterwards.
pub async fn run(config_path: &Path, schema_tool: &str, schema_out: &Path) -> anyhow::Result<()> {
    let config = ProjectConfig::load(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    config.validate_for_init()?;
    tracing::info!(project = %config.project_name, "Loaded project configuration");

    let home = DetestHome::from_env()?;
    home.ensure()?;

    let cancel = CancellationToken::new();
    super::cancel_on_signal(cancel.clone());

    let provisioner = Provisioner::postgres(PostgresSettings::from_env(), cancel);
    let endpoints = provisioner.provision(1).await?;
    let Some(endpoint) = endpoints.first() else {
        bail!("Provisioner returned no databases");
    };
    println!("Database container created successfully: {}", endpoint.url);

    let outcome = prepare(&config, &home, endpoint, schema_tool, schema_out).await;

    let teardown = provisioner.teardown().await;
    if let Err(e) = &teardown {
        tracing::error!(error = %e, "Failed to drop database container");
    }

    outcome?;
    teardown?;
    println!("Schema extracted successfully to {}", schema_out.display());
    Ok(())
}

async fn prepare(
    config: &ProjectConfig,
    home: &DetestHome,
    endpoint: &DatabaseEndpoint,
    schema_tool: &str,
    schema_out: &Path,
) -> anyhow::Result<()> {
    let pool = detest_db::create_pool(&endpoint.url).await?;
    detest_db::health_check(&pool).await?;
    pool.close().await;

    let project_dir = home.project_dir(&config.project_name);
    clone_project(&config.path_to_project, &project_dir).await?;

    let env = TemplateContext::for_database(&endpoint.url).resolve_env(&config.environment_variables);
    tracing::info!(env = %to_assignments(&env), "Running migrations");
    let input = CommandInput {
        env_vars: env,
        working_directory: Some(project_dir),
        timeout: DEFAULT_COMMAND_TIMEOUT,
    };
    shell::run_shell(&config.commands.migrate, &input)
        .await?
        .into_success()
        .context("Migration command failed")?;
    println!("Database migrated successfully. Proceeding to extract schema");

    let schema = shell::run_program(schema_tool, &[endpoint.url.as_str()], &CommandInput::default())
        .await
        .with_context(|| format!("Failed to run {schema_tool}"))?
        .into_success()
        .with_context(|| format!("{schema_tool} failed"))?;

    std::fs::write(schema_out, schema.stdout)
        .with_context(|| format!("Failed to write {}", schema_out.display()))?;
    Ok(())
}

/// Clone the project unless a previous `init` already did.
async fn clone_project(source: &str, target: &Path) -> anyhow::Result<()> {
    if target.exists() {
        tracing::info!(dir = %target.display(), "Project already cloned, skipping clone");
        return Ok(());
    }

    let target_str = target.to_string_lossy();
    let target_str: &str = target_str.as_ref();
    let input = CommandInput {
        timeout: CLONE_TIMEOUT,
        ..Default::default()
    };
    shell::run_program("git", &["clone", source, target_str], &input)
        .await?
        .into_success()
        .with_context(|| format!("git clone {source} failed"))?;
    tracing::info!(source, dir = %target.display(), "Project cloned");
    Ok(())
}
