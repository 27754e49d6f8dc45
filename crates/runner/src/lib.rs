//! Test discovery and execution for detest.
//!
//! [`controller::Orchestrator`] ties everything together: it provisions
//! databases, starts the service, discovers units (declarative modules
//! plus an optional [`registry::Registry`]) and runs them through the
//! [`driver::ExecutionDriver`].

pub mod case;
pub mod client;
pub mod controller;
pub mod declarative;
pub mod discovery;
pub mod driver;
pub mod registry;
pub mod service;

pub use case::{CheckFailure, TestCase, TestContext, TestUnitDescriptor, UnitFactory};
pub use client::ServiceClient;
pub use controller::{OrchestrationError, Orchestrator, RunOptions, Stage};
pub use discovery::{discover, Discovery, DiscoveryError, DiscoveryPolicy};
pub use registry::Registry;
