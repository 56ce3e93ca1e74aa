// src/backend/mod.rs

//! Adapter seams for the two external collaborators
//!
//! This module defines the interfaces the orchestration core consumes:
//! - [`TransactionBackend`]: the package-transaction engine, which runs
//!   install/remove/update/refresh jobs asynchronously, one at a time
//! - [`RepoTool`]: the repository-configuration utility, which adds,
//!   removes, enables and disables software sources by alias
//!
//! The traits are object-safe so composition roots can hand the
//! orchestrator `Arc<dyn TransactionBackend>` / `Arc<dyn RepoTool>`.
//! [`command::CommandRepoTool`] is a ready-made `RepoTool` for tools
//! driven over their command line.

pub mod command;

use crate::error::Result;
use crate::status::{PackageId, RepoAlias};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// A job submitted to the transaction backend
///
/// At most one job is in flight at any instant; the queue enforces this
/// regardless of whether the backend itself would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionJob {
    /// Enumerate packages installed on the device
    ListInstalled,
    /// Enumerate installed packages with newer versions available
    CheckUpdates,
    /// Enumerate the versions available for one package name
    ListVersions { name: String },
    InstallPackage { id: PackageId },
    InstallFile { path: PathBuf },
    RemovePackage { id: PackageId, autoremove: bool },
    UpdatePackage { id: PackageId },
    RefreshCache,
    RefreshRepo { alias: RepoAlias },
}

impl fmt::Display for TransactionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionJob::ListInstalled => write!(f, "list-installed"),
            TransactionJob::CheckUpdates => write!(f, "check-updates"),
            TransactionJob::ListVersions { name } => write!(f, "list-versions {}", name),
            TransactionJob::InstallPackage { id } => write!(f, "install {}", id),
            TransactionJob::InstallFile { path } => write!(f, "install-file {}", path.display()),
            TransactionJob::RemovePackage { id, .. } => write!(f, "remove {}", id),
            TransactionJob::UpdatePackage { id } => write!(f, "update {}", id),
            TransactionJob::RefreshCache => write!(f, "refresh-cache"),
            TransactionJob::RefreshRepo { alias } => write!(f, "refresh-repo {}", alias),
        }
    }
}

/// Progress notification emitted by the backend while a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionProgress {
    pub percent: u8,
}

/// Sender half the backend uses to report progress
pub type ProgressSender = mpsc::UnboundedSender<TransactionProgress>;

/// How the backend classified a package it reported on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageInfo {
    /// Present on the device
    Installed,
    /// Installable from a configured repository
    Available,
    /// Installed, with a newer version available
    Update,
}

/// One package mentioned in a transaction report
#[derive(Debug, Clone)]
pub struct PackageReport {
    pub id: PackageId,
    pub version: Option<String>,
    pub info: PackageInfo,
}

/// Terminal result of a successful transaction
///
/// Failures do not produce a report; they surface as
/// [`Error::Backend`](crate::Error::Backend) with the backend's code and
/// details passed through verbatim, or as
/// [`Error::BackendUnavailable`](crate::Error::BackendUnavailable) when
/// the backend cannot be reached at all.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    /// Wall-clock runtime the backend reported for the job
    pub runtime: Duration,
    /// Per-package results; empty for jobs that report none
    pub packages: Vec<PackageReport>,
}

impl TransactionReport {
    pub fn empty(runtime: Duration) -> Self {
        Self {
            runtime,
            packages: Vec::new(),
        }
    }
}

/// The package-transaction engine
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Run one job to completion, reporting progress along the way
    ///
    /// The implementation owns transaction lifecycle details entirely;
    /// the caller only sees the terminal report or error.
    async fn run(
        &self,
        job: TransactionJob,
        progress: ProgressSender,
    ) -> Result<TransactionReport>;
}

/// Action applied to a repository by the repo tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoAction {
    Remove,
    Add { url: String },
    Disable,
    Enable,
}

impl RepoAction {
    pub fn as_str(&self) -> &str {
        match self {
            RepoAction::Remove => "remove",
            RepoAction::Add { .. } => "add",
            RepoAction::Disable => "disable",
            RepoAction::Enable => "enable",
        }
    }
}

impl fmt::Display for RepoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One repository as listed by the repo tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    pub alias: RepoAlias,
    pub url: String,
    pub enabled: bool,
}

/// The repository-configuration utility
#[async_trait]
pub trait RepoTool: Send + Sync {
    /// Enumerate configured repositories
    async fn list_repos(&self) -> Result<Vec<RepoEntry>>;

    /// Apply one action to one repository
    async fn modify_repo(&self, alias: &RepoAlias, action: &RepoAction) -> Result<()>;
}
