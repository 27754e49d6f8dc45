use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;

use cli::{Cli, Commands};

const DEFAULT_FILTER: &str =
    "detest=info,detest_core=info,detest_db=info,detest_container=info,detest_runner=info";

const VERBOSE_FILTER: &str =
    "detest=debug,detest_core=debug,detest_db=debug,detest_container=debug,detest_runner=debug";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Create { name, path } => {
            commands::create::run(&name, &path, Path::new(".")).map(|_| commands::EXIT_OK)
        }
        Commands::Init {
            config,
            schema_tool,
            schema_out,
        } => commands::init::run(&config, &schema_tool, &schema_out)
            .await
            .map(|()| commands::EXIT_OK),
        Commands::Test {
            config,
            tests,
            strict_discovery,
        } => commands::test::run(&config, &tests, strict_discovery).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(commands::EXIT_ERROR)
        }
    }
}
