use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Integration-test orchestrator", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scaffold a new test project directory
    Create {
        /// Project name; also the directory created
        name: String,

        /// Git URL or local path the project is cloned from
        #[arg(short, long)]
        path: String,
    },

    /// Clone the project, migrate a scratch database and extract its schema
    Init {
        /// Project configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Schema extraction tool, invoked with the database URL
        #[arg(long, default_value = "sqlacodegen")]
        schema_tool: String,

        /// File the extracted schema is written to
        #[arg(long, default_value = "schema.py")]
        schema_out: PathBuf,
    },

    /// Run the test suite against a freshly provisioned environment
    Test {
        /// Project configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Directory of test modules
        #[arg(short, long, default_value = "tests")]
        tests: PathBuf,

        /// Abort on the first test module that fails to load
        #[arg(long)]
        strict_discovery: bool,
    },
}
