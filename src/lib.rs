// src/lib.rs

//! Quartermaster
//!
//! Orchestration core for package and repository management on a device.
//! Quartermaster sits between a user-facing layer and two external
//! collaborators: a package-transaction backend (asynchronous, one
//! transaction at a time) and a repository-configuration tool (per-alias
//! add/remove/enable/disable). It owns nothing below that seam; what it
//! provides is the coordination the collaborators cannot:
//!
//! - Operation queue: serializes transaction-backed work globally and
//!   repo-configuration work per alias, rejects conflicting requests at
//!   submission, and resolves every accepted operation exactly once
//! - Status tracking: an authoritative in-memory status per package and
//!   repository, never left in a transient state after a failure
//! - Notifications: publish/subscribe events for status changes, repo
//!   modifications, update availability and errors
//! - Bootstrap: initial population from both collaborators with a
//!   readiness flag and a degraded mode when one of them is unreachable
//!
//! The composition root constructs an [`Orchestrator`] with adapter
//! implementations of [`backend::TransactionBackend`] and
//! [`backend::RepoTool`] and hands clones of the handle to callers.

pub mod backend;
pub mod config;
mod error;
pub mod events;
pub mod ops;
mod orchestrator;
mod queue;
mod status;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use status::{PackageId, PackageStatus, RepoAlias, RepoStatus, RepoSummary};
