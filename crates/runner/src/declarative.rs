//! Declarative test modules (`tests/<module>.json`).
//!
//! A module lists `cases`. Each case has a `name`, a `setup` array of SQL
//! statements or HTTP requests, and `checks` that run in declaration order.
//!
//! ```json
//! { "cases": [ {
//!     "name": "user_signup",
//!     "setup": [ { "sql": "INSERT INTO plans (name) VALUES ('free')" } ],
//!     "checks": [
//!       { "name": "creates_user",
//!         "request": { "method": "POST", "path": "/users", "json": { "email": "a@b.c" } },
//!         "expect": { "status": 201, "json": { "email": "a@b.c" } } },
//!       { "name": "row_written",
//!         "sql": "SELECT COUNT(*) FROM users",
//!         "expect": { "value": "1" } }
//!     ] } ] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::case::{
    validate_check_names, CheckFailure, TestCase, TestContext, TestUnitDescriptor, UnitFactory,
};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// Top level of a module file. Cases stay raw so one bad case does not
/// sink the module.
#[derive(Debug, Deserialize)]
pub struct ModuleFile {
    pub cases: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub json: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    /// Exact HTTP status. When absent, any 2xx passes.
    pub status: Option<u16>,
    /// Subset the JSON response body must contain.
    pub json: Option<Value>,
    pub body_contains: Option<String>,
    /// First column of the first row, in PostgreSQL's text form.
    pub value: Option<String>,
    /// Number of rows returned.
    pub rows: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    sql: Option<String>,
    request: Option<RequestSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCheck {
    name: String,
    sql: Option<String>,
    request: Option<RequestSpec>,
    #[serde(default)]
    expect: Expectation,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    name: String,
    setup: Vec<RawStep>,
    #[serde(default)]
    checks: Vec<RawCheck>,
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Action {
    Sql(String),
    Request(RequestSpec),
}

impl Action {
    fn from_parts(sql: Option<String>, request: Option<RequestSpec>) -> Result<Self, String> {
        match (sql, request) {
            (Some(sql), None) => Ok(Self::Sql(sql)),
            (None, Some(request)) => Ok(Self::Request(request)),
            (Some(_), Some(_)) => Err("has both 'sql' and 'request'".to_string()),
            (None, None) => Err("needs either 'sql' or 'request'".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub action: Action,
    pub expect: Expectation,
}

/// A case that passed validation and can be turned into a unit.
#[derive(Debug, Clone)]
pub struct DeclarativeCase {
    pub name: String,
    pub setup: Vec<Action>,
    pub checks: Vec<Check>,
}

impl DeclarativeCase {
    /// Validate one raw case.
    ///
    /// `Err` carries a human-readable reason the case does not conform.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let Some(object) = raw.as_object() else {
            return Err("case is not an object".to_string());
        };
        match object.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err("missing 'name'".to_string()),
        }
        if !object.get("setup").is_some_and(Value::is_array) {
            return Err("missing 'setup' array".to_string());
        }

        let raw: RawCase = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;

        let setup = raw
            .setup
            .into_iter()
            .enumerate()
            .map(|(i, step)| {
                Action::from_parts(step.sql, step.request)
                    .map_err(|e| format!("setup step {}: {e}", i + 1))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let names: Vec<&str> = raw.checks.iter().map(|c| c.name.as_str()).collect();
        validate_check_names(&names)?;

        let checks = raw
            .checks
            .into_iter()
            .map(|check| {
                let action = Action::from_parts(check.sql, check.request)
                    .map_err(|e| format!("check '{}': {e}", check.name))?;
                validate_expectation(&check.name, &action, &check.expect)?;
                Ok(Check {
                    name: check.name,
                    action,
                    expect: check.expect,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self {
            name: raw.name,
            setup,
            checks,
        })
    }

    /// Wrap the case into a descriptor for `module`.
    pub fn into_descriptor(self, module: &str) -> TestUnitDescriptor {
        TestUnitDescriptor {
            name: self.name.clone(),
            module: module.to_string(),
            checks: self.checks.iter().map(|c| c.name.clone()).collect(),
            factory: Arc::new(DeclarativeFactory(Arc::new(self))),
        }
    }
}

fn validate_expectation(check: &str, action: &Action, expect: &Expectation) -> Result<(), String> {
    let http_fields = expect.status.is_some() || expect.json.is_some() || expect.body_contains.is_some();
    let sql_fields = expect.value.is_some() || expect.rows.is_some();
    match action {
        Action::Sql(_) if http_fields => Err(format!(
            "check '{check}': sql checks support only 'value' and 'rows'"
        )),
        Action::Request(_) if sql_fields => Err(format!(
            "check '{check}': request checks support only 'status', 'json' and 'body_contains'"
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

struct DeclarativeFactory(Arc<DeclarativeCase>);

impl UnitFactory for DeclarativeFactory {
    fn instantiate(&self, ctx: TestContext) -> Box<dyn TestCase> {
        Box::new(DeclarativeUnit {
            case: Arc::clone(&self.0),
            ctx,
        })
    }
}

struct DeclarativeUnit {
    case: Arc<DeclarativeCase>,
    ctx: TestContext,
}

#[async_trait]
impl TestCase for DeclarativeUnit {
    async fn setup(&mut self) -> Result<(), CheckFailure> {
        for (i, step) in self.case.setup.iter().enumerate() {
            match step {
                Action::Sql(sql) => {
                    sqlx::raw_sql(sql).execute(&self.ctx.db).await?;
                }
                Action::Request(request) => {
                    let response = self
                        .ctx
                        .http
                        .request(&request.method, &request.path, request.json.as_ref())
                        .await?;
                    if !response.is_success() {
                        return Err(CheckFailure::error(format!(
                            "setup step {}: {} {} returned {}",
                            i + 1,
                            request.method,
                            request.path,
                            response.status
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn check(&mut self, name: &str) -> Result<(), CheckFailure> {
        let Some(check) = self.case.checks.iter().find(|c| c.name == name) else {
            return Err(CheckFailure::error(format!("no check named '{name}'")));
        };
        match &check.action {
            Action::Sql(sql) => self.sql_check(sql, &check.expect).await,
            Action::Request(request) => self.request_check(request, &check.expect).await,
        }
    }
}

impl DeclarativeUnit {
    async fn sql_check(&self, sql: &str, expect: &Expectation) -> Result<(), CheckFailure> {
        let rows = sqlx::query(sql).fetch_all(&self.ctx.db).await?;

        if let Some(expected) = expect.rows {
            if rows.len() as u64 != expected {
                return Err(CheckFailure::assertion(format!(
                    "expected {expected} rows, got {}",
                    rows.len()
                )));
            }
        }

        if let Some(expected) = &expect.value {
            let Some(row) = rows.first() else {
                return Err(CheckFailure::assertion(format!(
                    "expected value '{expected}', query returned no rows"
                )));
            };
            match column_text(row, 0)? {
                Some(actual) if &actual == expected => {}
                Some(actual) => {
                    return Err(CheckFailure::assertion(format!(
                        "expected value '{expected}', got '{actual}'"
                    )))
                }
                None => {
                    return Err(CheckFailure::assertion(format!(
                        "expected value '{expected}', got NULL"
                    )))
                }
            }
        }
        Ok(())
    }

    async fn request_check(
        &self,
        request: &RequestSpec,
        expect: &Expectation,
    ) -> Result<(), CheckFailure> {
        let response = self
            .ctx
            .http
            .request(&request.method, &request.path, request.json.as_ref())
            .await?;

        match expect.status {
            Some(status) if response.status != status => {
                return Err(CheckFailure::assertion(format!(
                    "expected status {status}, got {}",
                    response.status
                )));
            }
            None if !response.is_success() => {
                return Err(CheckFailure::assertion(format!(
                    "expected a 2xx status, got {}",
                    response.status
                )));
            }
            _ => {}
        }

        if let Some(needle) = &expect.body_contains {
            if !response.body.contains(needle.as_str()) {
                return Err(CheckFailure::assertion(format!(
                    "response body does not contain '{needle}'"
                )));
            }
        }

        if let Some(expected) = &expect.json {
            let actual = response.json()?;
            if let Some(mismatch) = json_mismatch(&actual, expected, "$") {
                return Err(CheckFailure::assertion(mismatch));
            }
        }
        Ok(())
    }
}

/// Render column `index` of `row` the way PostgreSQL prints it, so
/// `SELECT count(*)` and `SELECT count(*)::TEXT` compare alike.
fn column_text(row: &PgRow, index: usize) -> Result<Option<String>, CheckFailure> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(None);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Some(v));
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<i16, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(Some(if v { "t" } else { "f" }.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        return Ok(Some(v.to_string()));
    }

    let column = row.column(index);
    Err(CheckFailure::error(format!(
        "column '{}' has type {} which cannot be compared as text; cast it with ::TEXT",
        column.name(),
        column.type_info().name()
    )))
}

/// First place where `actual` does not contain `expected`, if any.
///
/// Objects match when every expected key matches; extra keys in `actual`
/// are ignored. Arrays must have the same length and match element-wise.
/// Everything else compares by equality.
pub fn json_mismatch(actual: &Value, expected: &Value, path: &str) -> Option<String> {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => {
            expected.iter().find_map(|(key, want)| {
                let here = format!("{path}.{key}");
                match actual.get(key) {
                    Some(got) => json_mismatch(got, want, &here),
                    None => Some(format!("{here}: missing")),
                }
            })
        }
        (Value::Array(actual), Value::Array(expected)) => {
            if actual.len() != expected.len() {
                return Some(format!(
                    "{path}: expected {} elements, got {}",
                    expected.len(),
                    actual.len()
                ));
            }
            actual
                .iter()
                .zip(expected)
                .enumerate()
                .find_map(|(i, (got, want))| json_mismatch(got, want, &format!("{path}[{i}]")))
        }
        _ if actual == expected => None,
        _ => Some(format!("{path}: expected {expected}, got {actual}")),
    }
}
