// src/orchestrator.rs

//! Public orchestrator handle
//!
//! [`Orchestrator`] is the one entry point for callers and observers.
//! Constructing it spawns the queue's owner task; the handle itself is
//! cheap to clone and every clone talks to the same queue. There is no
//! ambient global instance: the composition root builds one and passes
//! it to whoever needs it.

use crate::backend::{PackageReport, RepoTool, TransactionBackend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{NotificationBus, Subscription};
use crate::ops::{ActiveOperation, OperationTarget};
use crate::queue::{Core, OperationRequest, Outcome, Request};
use crate::status::{PackageId, PackageStatus, RepoAlias, RepoStatus, RepoSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

/// Handle to a running package/repository orchestrator
///
/// Must be created from within a tokio runtime; the owner task runs
/// until the last handle is dropped.
#[derive(Clone)]
pub struct Orchestrator {
    requests: mpsc::UnboundedSender<Request>,
    bus: NotificationBus,
    initialised: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn TransactionBackend>,
        repo_tool: Arc<dyn RepoTool>,
        config: Config,
    ) -> Self {
        let bus = NotificationBus::new();
        let initialised = Arc::new(AtomicBool::new(false));
        let (requests, request_rx) = mpsc::unbounded_channel();

        let core = Core::new(
            backend,
            repo_tool,
            config,
            bus.clone(),
            request_rx,
            initialised.clone(),
        );
        tokio::spawn(core.run());

        Self {
            requests,
            bus,
            initialised,
        }
    }

    /// True once initial status population has completed, possibly degraded
    pub fn initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    /// Register an observer for status, repo, update and error events
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    // === Package operations ===

    pub async fn install_package(&self, id: impl Into<PackageId>) -> Result<()> {
        self.submit(OperationRequest::InstallPackage { id: id.into() })
            .await
            .map(|_| ())
    }

    /// Install a local package file
    pub async fn install_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.submit(OperationRequest::InstallFile { path: path.into() })
            .await
            .map(|_| ())
    }

    pub async fn remove_package(&self, id: impl Into<PackageId>, autoremove: bool) -> Result<()> {
        self.submit(OperationRequest::RemovePackage {
            id: id.into(),
            autoremove,
        })
        .await
        .map(|_| ())
    }

    pub async fn update_package(&self, id: impl Into<PackageId>) -> Result<()> {
        self.submit(OperationRequest::UpdatePackage { id: id.into() })
            .await
            .map(|_| ())
    }

    /// Versions available for a package name, as reported by the backend
    pub async fn package_versions(&self, name: impl Into<String>) -> Result<Vec<PackageReport>> {
        match self
            .submit(OperationRequest::GetPackageVersions { name: name.into() })
            .await?
        {
            Outcome::Versions(versions) => Ok(versions),
            Outcome::Done => Ok(Vec::new()),
        }
    }

    // === Refresh operations ===

    /// Refresh the package metadata cache
    ///
    /// With `force` false this is a no-op if a refresh happened within
    /// the configured expiry window.
    pub async fn refresh_cache(&self, force: bool) -> Result<()> {
        self.submit(OperationRequest::RefreshCache { force })
            .await
            .map(|_| ())
    }

    pub async fn refresh_repo(&self, alias: impl Into<RepoAlias>, force: bool) -> Result<()> {
        self.submit(OperationRequest::RefreshRepo {
            alias: alias.into(),
            force,
        })
        .await
        .map(|_| ())
    }

    pub async fn refresh_all_repos(&self, force: bool) -> Result<()> {
        self.submit(OperationRequest::RefreshAllRepos { force })
            .await
            .map(|_| ())
    }

    // === Repository operations ===

    pub async fn add_repo(
        &self,
        alias: impl Into<RepoAlias>,
        url: impl Into<String>,
    ) -> Result<()> {
        self.submit(OperationRequest::AddRepo {
            alias: alias.into(),
            url: url.into(),
        })
        .await
        .map(|_| ())
    }

    pub async fn remove_repo(&self, alias: impl Into<RepoAlias>) -> Result<()> {
        self.submit(OperationRequest::RemoveRepo {
            alias: alias.into(),
        })
        .await
        .map(|_| ())
    }

    pub async fn enable_repo(&self, alias: impl Into<RepoAlias>) -> Result<()> {
        self.submit(OperationRequest::EnableRepo {
            alias: alias.into(),
        })
        .await
        .map(|_| ())
    }

    pub async fn disable_repo(&self, alias: impl Into<RepoAlias>) -> Result<()> {
        self.submit(OperationRequest::DisableRepo {
            alias: alias.into(),
        })
        .await
        .map(|_| ())
    }

    /// Enable every configured repository; resolves after all
    /// constituent calls complete
    pub async fn enable_all_repos(&self) -> Result<()> {
        self.submit(OperationRequest::EnableAllRepos).await.map(|_| ())
    }

    pub async fn disable_all_repos(&self) -> Result<()> {
        self.submit(OperationRequest::DisableAllRepos)
            .await
            .map(|_| ())
    }

    pub async fn remove_all_repos(&self) -> Result<()> {
        self.submit(OperationRequest::RemoveAllRepos)
            .await
            .map(|_| ())
    }

    // === Queries ===

    pub async fn package_status(&self, id: impl Into<PackageId>) -> PackageStatus {
        self.query(|reply| Request::PackageStatus {
            id: id.into(),
            reply,
        })
        .await
        .unwrap_or(PackageStatus::Unknown)
    }

    pub async fn repo_status(&self, alias: impl Into<RepoAlias>) -> RepoStatus {
        self.query(|reply| Request::RepoStatus {
            alias: alias.into(),
            reply,
        })
        .await
        .unwrap_or(RepoStatus::Unknown)
    }

    /// Identifiers of all packages with a known available update
    pub async fn updatable_packages(&self) -> Vec<PackageId> {
        self.query(|reply| Request::UpdatablePackages { reply })
            .await
            .unwrap_or_default()
    }

    /// Aggregate flag: any update available at all
    pub async fn updates_available(&self) -> bool {
        self.query(|reply| Request::UpdatesAvailable { reply })
            .await
            .unwrap_or(false)
    }

    /// Version of the available update for one package
    pub async fn update_version(&self, id: impl Into<PackageId>) -> Option<String> {
        self.query(|reply| Request::UpdateVersion {
            id: id.into(),
            reply,
        })
        .await
        .unwrap_or(None)
    }

    /// Every known repository with status, URL and last refresh time
    pub async fn repo_list(&self) -> Vec<RepoSummary> {
        self.query(|reply| Request::RepoList { reply })
            .await
            .unwrap_or_default()
    }

    /// Descriptors of the operations currently pending or active
    pub async fn operations(&self) -> Vec<ActiveOperation> {
        self.query(|reply| Request::Operations { reply })
            .await
            .unwrap_or_default()
    }

    /// Cancel queued-but-not-dispatched operations for a target
    ///
    /// Returns whether anything was actually removed; each removed
    /// operation resolves with [`Error::Cancelled`] at its submitter.
    pub async fn cancel_pending(&self, target: OperationTarget) -> bool {
        self.query(|reply| Request::CancelPending { target, reply })
            .await
            .unwrap_or(false)
    }

    async fn submit(&self, op: OperationRequest) -> Result<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Submit { op, reply })
            .map_err(|_| Error::BackendUnavailable)?;
        rx.await.map_err(|_| Error::BackendUnavailable)?
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(make(reply)).ok()?;
        rx.await.ok()
    }
}
