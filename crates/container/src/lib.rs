//! Disposable PostgreSQL infrastructure for a test run.
//!
//! One container hosts every logical database; [`provisioner::Provisioner`]
//! creates it, fills it with `database_1..N` and removes it afterwards.

pub mod docker;
pub mod engine;
pub mod provisioner;
pub mod settings;

pub use provisioner::{Provisioner, ProvisionError, ResourceProvisioner, TeardownError};
