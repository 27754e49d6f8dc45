//! Per-unit results and the aggregate run report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Outcome of one test unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Passed,
    /// An assertion failed in `check` (or in `setup`).
    Failed { check: String, reason: String },
    /// Something other than an assertion went wrong.
    Errored { cause: String },
}

impl UnitStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed { .. } => "FAILED",
            Self::Errored { .. } => "ERROR",
        }
    }
}

/// Result recorded for a single test unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub unit: String,
    /// Module the unit was discovered in.
    pub module: String,
    pub status: UnitStatus,
    pub started_at: Timestamp,
    pub duration_ms: u64,
    /// Number of checks that were invoked (including the failing one).
    pub checks_run: usize,
}

/// A test module that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: String,
    pub reason: String,
}

/// A cleanup step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownFailure {
    /// `"service"` or `"container"`.
    pub resource: String,
    pub message: String,
}

/// Everything an orchestration run produced, in discovery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<RunResult>,
    pub discovery_failures: Vec<ModuleFailure>,
    pub teardown_failures: Vec<TeardownFailure>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Failed { .. }))
    }

    pub fn errored(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Errored { .. }))
    }

    /// True when every unit passed, every module loaded, and the run was
    /// not cancelled. Teardown failures do not affect the outcome.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.discovery_failures.is_empty()
            && self.results.iter().all(|r| r.status.is_passed())
    }

    fn count(&self, pred: impl Fn(&UnitStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            write!(
                f,
                "{:<7} {}::{} ({}ms)",
                result.status.label(),
                result.module,
                result.unit,
                result.duration_ms
            )?;
            match &result.status {
                UnitStatus::Passed => writeln!(f)?,
                UnitStatus::Failed { check, reason } => writeln!(f, " at {check}: {reason}")?,
                UnitStatus::Errored { cause } => writeln!(f, ": {cause}")?,
            }
        }
        for failure in &self.discovery_failures {
            writeln!(f, "LOAD    {}: {}", failure.module, failure.reason)?;
        }
        for failure in &self.teardown_failures {
            writeln!(f, "CLEANUP {}: {}", failure.resource, failure.message)?;
        }
        if self.cancelled {
            writeln!(f, "run cancelled")?;
        }
        write!(
            f,
            "{} passed, {} failed, {} errored",
            self.passed(),
            self.failed(),
            self.errored()
        )
    }
}
