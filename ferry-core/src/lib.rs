//! Ferry Core
//!
//! Core types for the Ferry build/deploy pipeline runner.
//!
//! This crate contains:
//! - Domain types: pipeline definitions, task kinds, servers and registries
//! - Events: the lifecycle/output stream consumed by display layers
//!
//! Note: no I/O lives here. Execution logic is in `ferry-runner`.

pub mod domain;
pub mod event;
