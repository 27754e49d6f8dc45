//! Domain types and process plumbing shared by every `detest` crate.
//!
//! Nothing in here talks to Docker or PostgreSQL directly; those live in
//! `detest-container` and `detest-db`. This crate owns the project
//! configuration, environment templating, the run report, and the
//! subprocess layer (one-shot shell commands and the long-lived service
//! process group).

pub mod config;
pub mod error;
pub mod home;
pub mod report;
pub mod shell;
pub mod supervisor;
pub mod template;
pub mod types;
