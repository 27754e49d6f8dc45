//! The test-unit capability and the descriptor discovery produces.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use detest_db::DbPool;

use crate::client::{ClientError, ServiceClient};

/// Hook names a check may not use.
pub const RESERVED_CHECK_NAMES: &[&str] = &["setup", "run"];

/// Why a `setup` or `check` call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckFailure {
    /// An expectation about the service or database did not hold.
    #[error("{0}")]
    Assertion(String),

    /// Anything else: connection loss, bad SQL, malformed response.
    #[error("{0}")]
    Error(String),
}

impl CheckFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

impl From<sqlx::Error> for CheckFailure {
    fn from(err: sqlx::Error) -> Self {
        Self::Error(format!("database: {err}"))
    }
}

impl From<ClientError> for CheckFailure {
    fn from(err: ClientError) -> Self {
        Self::Error(err.to_string())
    }
}

/// What a unit gets to work with: its own database and the service.
#[derive(Clone)]
pub struct TestContext {
    /// Pool bound to the endpoint leased to this unit only.
    pub db: DbPool,
    pub http: ServiceClient,
}

/// A runnable test unit.
///
/// The driver calls [`setup`](TestCase::setup) once, then
/// [`check`](TestCase::check) for each name in the descriptor's sequence.
#[async_trait]
pub trait TestCase: Send {
    async fn setup(&mut self) -> Result<(), CheckFailure>;

    async fn check(&mut self, name: &str) -> Result<(), CheckFailure>;
}

/// Builds a fresh [`TestCase`] for one run.
pub trait UnitFactory: Send + Sync {
    fn instantiate(&self, ctx: TestContext) -> Box<dyn TestCase>;
}

impl<F> UnitFactory for F
where
    F: Fn(TestContext) -> Box<dyn TestCase> + Send + Sync,
{
    fn instantiate(&self, ctx: TestContext) -> Box<dyn TestCase> {
        self(ctx)
    }
}

/// A discovered unit that has not been instantiated yet.
#[derive(Clone)]
pub struct TestUnitDescriptor {
    pub name: String,
    /// Module (file stem or registry group) the unit came from.
    pub module: String,
    /// Check names in the order they run.
    pub checks: Vec<String>,
    pub factory: Arc<dyn UnitFactory>,
}

impl TestUnitDescriptor {
    /// `module::name`, as printed in reports.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }
}

impl fmt::Debug for TestUnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnitDescriptor")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

/// Reject empty, reserved and repeated check names.
pub fn validate_check_names<S: AsRef<str>>(checks: &[S]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for check in checks {
        let check = check.as_ref();
        if check.trim().is_empty() {
            return Err("check name must not be empty".to_string());
        }
        if RESERVED_CHECK_NAMES.contains(&check) {
            return Err(format!("'{check}' is reserved and cannot be a check name"));
        }
        if !seen.insert(check) {
            return Err(format!("check '{check}' is declared twice"));
        }
    }
    Ok(())
}
