//! Explicit registration of compiled-in test units.
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.register("smoke", "health", &["responds"], |ctx| {
//!     Box::new(HealthCase::new(ctx)) as Box<dyn TestCase>
//! })?;
//! ```

use std::sync::Arc;

use crate::case::{validate_check_names, TestCase, TestContext, TestUnitDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unit name must not be empty")]
    EmptyName,

    #[error("Unit '{0}' is already registered")]
    Duplicate(String),

    #[error("Unit '{unit}': {reason}")]
    InvalidChecks { unit: String, reason: String },
}

/// Units registered in code, kept in registration order.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    units: Vec<TestUnitDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit under `module` whose checks run in the order given.
    pub fn register<F>(
        &mut self,
        module: &str,
        name: &str,
        checks: &[&str],
        factory: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(TestContext) -> Box<dyn TestCase> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.units.iter().any(|u| u.name == name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        validate_check_names(checks).map_err(|reason| RegistryError::InvalidChecks {
            unit: name.to_string(),
            reason,
        })?;

        self.units.push(TestUnitDescriptor {
            name: name.to_string(),
            module: module.to_string(),
            checks: checks.iter().map(|c| c.to_string()).collect(),
            factory: Arc::new(factory),
        });
        Ok(self)
    }

    /// Descriptors for every registered unit, in registration order.
    pub fn descriptors(&self) -> Vec<TestUnitDescriptor> {
        self.units.clone()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::case::CheckFailure;

    struct Noop;

    #[async_trait]
    impl TestCase for Noop {
        async fn setup(&mut self) -> Result<(), CheckFailure> {
            Ok(())
        }

        async fn check(&mut self, _name: &str) -> Result<(), CheckFailure> {
            Ok(())
        }
    }

    fn noop(_ctx: TestContext) -> Box<dyn TestCase> {
        Box::new(Noop)
    }

    #[test]
    fn keeps_registration_and_check_order() {
        let mut registry = Registry::new();
        registry
            .register("m", "second", &["z", "a"], noop)
            .unwrap()
            .register("m", "first", &[], noop)
            .unwrap();

        let units = registry.descriptors();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "second");
        assert_eq!(units[0].checks, vec!["z", "a"]);
        assert_eq!(units[1].qualified_name(), "m::first");
    }

    #[test]
    fn rejects_duplicates_and_reserved_checks() {
        let mut registry = Registry::new();
        registry.register("m", "unit", &[], noop).unwrap();

        assert_matches!(
            registry.register("other", "unit", &[], noop),
            Err(RegistryError::Duplicate(_))
        );
        assert_matches!(
            registry.register("m", "bad", &["setup"], noop),
            Err(RegistryError::InvalidChecks { .. })
        );
        assert_matches!(registry.register("m", "", &[], noop), Err(RegistryError::EmptyName));
        assert_eq!(registry.len(), 1);
    }
}
