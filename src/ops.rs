// src/ops.rs

//! Operation kinds and targets
//!
//! Every request accepted by the queue is described by an
//! [`OperationKind`] plus an optional [`OperationTarget`]. The pair is
//! what duplicate detection keys on, and what the `operations()` listing
//! reports back to observers.

use crate::status::{PackageId, RepoAlias};
use std::fmt;
use std::path::PathBuf;

/// Kind of operation handled by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    AddRepo,
    RemoveRepo,
    EnableRepo,
    DisableRepo,
    RefreshRepo,
    RefreshAllRepos,
    RefreshCache,
    InstallPackage,
    InstallFile,
    RemovePackage,
    UpdatePackage,
    GetPackageVersions,
    EnableAllRepos,
    DisableAllRepos,
    RemoveAllRepos,
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::AddRepo => "add-repo",
            OperationKind::RemoveRepo => "remove-repo",
            OperationKind::EnableRepo => "enable-repo",
            OperationKind::DisableRepo => "disable-repo",
            OperationKind::RefreshRepo => "refresh-repo",
            OperationKind::RefreshAllRepos => "refresh-all-repos",
            OperationKind::RefreshCache => "refresh-cache",
            OperationKind::InstallPackage => "install-package",
            OperationKind::InstallFile => "install-file",
            OperationKind::RemovePackage => "remove-package",
            OperationKind::UpdatePackage => "update-package",
            OperationKind::GetPackageVersions => "get-package-versions",
            OperationKind::EnableAllRepos => "enable-all-repos",
            OperationKind::DisableAllRepos => "disable-all-repos",
            OperationKind::RemoveAllRepos => "remove-all-repos",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation acts on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationTarget {
    Package(PackageId),
    File(PathBuf),
    Repo(RepoAlias),
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationTarget::Package(id) => write!(f, "{}", id),
            OperationTarget::File(path) => write!(f, "{}", path.display()),
            OperationTarget::Repo(alias) => write!(f, "{}", alias),
        }
    }
}

/// Descriptor of a pending or active operation, as reported by
/// `operations()` and the `OperationsChanged` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveOperation {
    pub kind: OperationKind,
    pub target: Option<OperationTarget>,
    /// Backend-reported completion percentage, once dispatched
    pub progress: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(OperationKind::InstallPackage.to_string(), "install-package");
        assert_eq!(OperationKind::RemoveAllRepos.to_string(), "remove-all-repos");
    }

    #[test]
    fn test_target_display() {
        let target = OperationTarget::Package(PackageId::from("harbour-example"));
        assert_eq!(target.to_string(), "harbour-example");

        let target = OperationTarget::Repo(RepoAlias::from("mentaljam-obs"));
        assert_eq!(target.to_string(), "mentaljam-obs");
    }
}
