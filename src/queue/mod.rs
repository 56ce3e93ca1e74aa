// src/queue/mod.rs

//! The operation queue
//!
//! A single owner task drives everything here: it accepts operation
//! requests, enforces the acceptance and serialization rules, hands work
//! to the adapters and commits the resulting status changes. Callers
//! never touch queue state directly; they talk to the owner task over a
//! request channel and get resolved through oneshot replies.
//!
//! Two independent lanes exist:
//! - the transaction lane: global FIFO, at most one job dispatched to
//!   the transaction backend at any instant
//! - the repository lanes: one FIFO per alias, dispatched concurrently
//!   across aliases up to the configured limit

mod bootstrap;
mod repos;
mod transactions;

use crate::backend::{
    PackageReport, RepoAction, RepoEntry, RepoTool, TransactionBackend, TransactionJob,
    TransactionReport,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, NotificationBus};
use crate::ops::{ActiveOperation, OperationKind, OperationTarget};
use crate::status::{PackageId, PackageStatus, RepoAlias, RepoStatus, RepoSummary, StatusTracker};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Successful resolution of an operation
#[derive(Debug)]
pub(crate) enum Outcome {
    Done,
    Versions(Vec<PackageReport>),
}

pub(crate) type ReplySender = oneshot::Sender<Result<Outcome>>;

/// One operation as submitted by a caller
#[derive(Debug)]
pub(crate) enum OperationRequest {
    InstallPackage { id: PackageId },
    InstallFile { path: PathBuf },
    RemovePackage { id: PackageId, autoremove: bool },
    UpdatePackage { id: PackageId },
    GetPackageVersions { name: String },
    RefreshCache { force: bool },
    RefreshRepo { alias: RepoAlias, force: bool },
    RefreshAllRepos { force: bool },
    AddRepo { alias: RepoAlias, url: String },
    RemoveRepo { alias: RepoAlias },
    EnableRepo { alias: RepoAlias },
    DisableRepo { alias: RepoAlias },
    EnableAllRepos,
    DisableAllRepos,
    RemoveAllRepos,
}

impl OperationRequest {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::InstallPackage { .. } => OperationKind::InstallPackage,
            OperationRequest::InstallFile { .. } => OperationKind::InstallFile,
            OperationRequest::RemovePackage { .. } => OperationKind::RemovePackage,
            OperationRequest::UpdatePackage { .. } => OperationKind::UpdatePackage,
            OperationRequest::GetPackageVersions { .. } => OperationKind::GetPackageVersions,
            OperationRequest::RefreshCache { .. } => OperationKind::RefreshCache,
            OperationRequest::RefreshRepo { .. } => OperationKind::RefreshRepo,
            OperationRequest::RefreshAllRepos { .. } => OperationKind::RefreshAllRepos,
            OperationRequest::AddRepo { .. } => OperationKind::AddRepo,
            OperationRequest::RemoveRepo { .. } => OperationKind::RemoveRepo,
            OperationRequest::EnableRepo { .. } => OperationKind::EnableRepo,
            OperationRequest::DisableRepo { .. } => OperationKind::DisableRepo,
            OperationRequest::EnableAllRepos => OperationKind::EnableAllRepos,
            OperationRequest::DisableAllRepos => OperationKind::DisableAllRepos,
            OperationRequest::RemoveAllRepos => OperationKind::RemoveAllRepos,
        }
    }
}

/// Messages from callers to the owner task
pub(crate) enum Request {
    Submit {
        op: OperationRequest,
        reply: ReplySender,
    },
    CancelPending {
        target: OperationTarget,
        reply: oneshot::Sender<bool>,
    },
    PackageStatus {
        id: PackageId,
        reply: oneshot::Sender<PackageStatus>,
    },
    RepoStatus {
        alias: RepoAlias,
        reply: oneshot::Sender<RepoStatus>,
    },
    UpdatablePackages {
        reply: oneshot::Sender<Vec<PackageId>>,
    },
    UpdatesAvailable {
        reply: oneshot::Sender<bool>,
    },
    UpdateVersion {
        id: PackageId,
        reply: oneshot::Sender<Option<String>>,
    },
    RepoList {
        reply: oneshot::Sender<Vec<RepoSummary>>,
    },
    Operations {
        reply: oneshot::Sender<Vec<ActiveOperation>>,
    },
}

/// Messages from spawned adapter tasks back to the owner task
pub(crate) enum Internal {
    TransactionDone {
        seq: u64,
        result: Result<TransactionReport>,
    },
    TransactionProgress {
        seq: u64,
        percent: u8,
    },
    /// One constituent refresh of a refresh-all driver succeeded
    RepoRefreshed {
        alias: RepoAlias,
    },
    RepoJobDone {
        alias: RepoAlias,
        result: Result<()>,
    },
    BootstrapRepos {
        result: Result<Vec<RepoEntry>>,
    },
}

/// What a transaction-lane entry runs when dispatched
enum TxJob {
    Single(TransactionJob),
    /// Expanded at dispatch into one refresh per enabled, stale alias
    RefreshAll { force: bool },
}

/// One entry in the transaction lane
struct TxOp {
    seq: u64,
    /// None for internal work (bootstrap, update checks) that is not a
    /// caller-visible operation
    kind: Option<OperationKind>,
    job: TxJob,
    target: Option<OperationTarget>,
    /// Status to restore if the operation fails or is cancelled
    prior: Option<(PackageId, PackageStatus)>,
    reply: Option<ReplySender>,
    progress: Option<u8>,
}

/// How a repo-lane job resolves
enum RepoCompletion {
    Single(ReplySender),
    Batch(u32),
}

/// One entry in a per-alias repository lane
struct RepoJob {
    kind: OperationKind,
    action: RepoAction,
    completion: RepoCompletion,
}

/// An outstanding bulk repository operation
struct RepoBatch {
    kind: OperationKind,
    remaining: usize,
    succeeded: Vec<RepoAlias>,
    first_error: Option<Error>,
    reply: Option<ReplySender>,
}

/// Owner-task state; constructed once and consumed by [`Core::run`]
pub(crate) struct Core {
    config: Config,
    backend: Arc<dyn TransactionBackend>,
    repo_tool: Arc<dyn RepoTool>,
    status: StatusTracker,
    bus: NotificationBus,
    requests: mpsc::UnboundedReceiver<Request>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    initialised: Arc<AtomicBool>,
    packages_seeded: bool,
    repos_seeded: bool,
    next_seq: u64,
    next_batch: u32,
    tx_pending: VecDeque<TxOp>,
    tx_active: Option<TxOp>,
    cache_refreshed: Option<DateTime<Utc>>,
    repo_lanes: HashMap<RepoAlias, VecDeque<RepoJob>>,
    repo_active: HashMap<RepoAlias, RepoJob>,
    batches: HashMap<u32, RepoBatch>,
}

impl Core {
    pub(crate) fn new(
        backend: Arc<dyn TransactionBackend>,
        repo_tool: Arc<dyn RepoTool>,
        config: Config,
        bus: NotificationBus,
        requests: mpsc::UnboundedReceiver<Request>,
        initialised: Arc<AtomicBool>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let status = StatusTracker::new(bus.clone());
        Self {
            config,
            backend,
            repo_tool,
            status,
            bus,
            requests,
            internal_tx,
            internal_rx,
            initialised,
            packages_seeded: false,
            repos_seeded: false,
            next_seq: 0,
            next_batch: 0,
            tx_pending: VecDeque::new(),
            tx_active: None,
            cache_refreshed: None,
            repo_lanes: HashMap::new(),
            repo_active: HashMap::new(),
            batches: HashMap::new(),
        }
    }

    /// Drive the queue until every caller handle is gone
    pub(crate) async fn run(mut self) {
        self.start_bootstrap();

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
        }

        debug!("owner task exiting, all orchestrator handles dropped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Submit { op, reply } => self.handle_submit(op, reply),
            Request::CancelPending { target, reply } => {
                let cancelled = self.cancel_pending(&target);
                let _ = reply.send(cancelled);
            }
            Request::PackageStatus { id, reply } => {
                let _ = reply.send(self.status.package_status(&id));
            }
            Request::RepoStatus { alias, reply } => {
                let _ = reply.send(self.status.repo_status(&alias));
            }
            Request::UpdatablePackages { reply } => {
                let _ = reply.send(self.status.updatable_packages());
            }
            Request::UpdatesAvailable { reply } => {
                let _ = reply.send(self.status.updates_available());
            }
            Request::UpdateVersion { id, reply } => {
                let _ = reply.send(self.status.update_version(&id));
            }
            Request::RepoList { reply } => {
                let _ = reply.send(self.status.repo_list());
            }
            Request::Operations { reply } => {
                let _ = reply.send(self.operations_snapshot());
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::TransactionDone { seq, result } => self.handle_transaction_done(seq, result),
            Internal::TransactionProgress { seq, percent } => {
                if let Some(active) = &mut self.tx_active {
                    if active.seq == seq {
                        active.progress = Some(percent);
                    }
                }
            }
            Internal::RepoRefreshed { alias } => {
                self.status.mark_repo_refreshed(&alias, Utc::now());
            }
            Internal::RepoJobDone { alias, result } => self.handle_repo_job_done(alias, result),
            Internal::BootstrapRepos { result } => self.handle_bootstrap_repos(result),
        }
    }

    // === Acceptance ===

    fn handle_submit(&mut self, op: OperationRequest, reply: ReplySender) {
        let kind = op.kind();

        // Until bootstrap completes the status maps cannot back the
        // acceptance rules, so mutations are rejected outright. Version
        // queries are read-only and simply wait their turn in the lane.
        if !self.initialised.load(Ordering::SeqCst)
            && !matches!(op, OperationRequest::GetPackageVersions { .. })
        {
            let _ = reply.send(Err(Error::InvalidState {
                target: kind.to_string(),
                status: "not-initialised".to_string(),
            }));
            return;
        }

        match op {
            OperationRequest::InstallPackage { id } => {
                let job = TransactionJob::InstallPackage { id: id.clone() };
                self.submit_package_op(kind, id, job, PackageStatus::Installing, reply);
            }
            OperationRequest::RemovePackage { id, autoremove } => {
                let job = TransactionJob::RemovePackage {
                    id: id.clone(),
                    autoremove,
                };
                self.submit_package_op(kind, id, job, PackageStatus::Removing, reply);
            }
            OperationRequest::UpdatePackage { id } => {
                let job = TransactionJob::UpdatePackage { id: id.clone() };
                self.submit_package_op(kind, id, job, PackageStatus::Updating, reply);
            }
            OperationRequest::InstallFile { path } => {
                let target = OperationTarget::File(path.clone());
                if self.duplicate_tx(kind, Some(&target)) {
                    let _ = reply.send(Err(Error::OperationInProgress(
                        path.display().to_string(),
                    )));
                    return;
                }
                self.enqueue_tx(
                    Some(kind),
                    TxJob::Single(TransactionJob::InstallFile { path }),
                    Some(target),
                    None,
                    Some(reply),
                );
            }
            OperationRequest::GetPackageVersions { name } => {
                // Read-only; concurrent identical queries are harmless
                let target = OperationTarget::Package(PackageId::from(name.as_str()));
                self.enqueue_tx(
                    Some(kind),
                    TxJob::Single(TransactionJob::ListVersions { name }),
                    Some(target),
                    None,
                    Some(reply),
                );
            }
            OperationRequest::RefreshCache { force } => {
                if self.duplicate_tx(kind, None) {
                    let _ = reply.send(Err(Error::OperationInProgress(kind.to_string())));
                    return;
                }
                if !force && !self.cache_refresh_stale() {
                    debug!("cache refreshed recently, skipping");
                    let _ = reply.send(Ok(Outcome::Done));
                    return;
                }
                self.enqueue_tx(
                    Some(kind),
                    TxJob::Single(TransactionJob::RefreshCache),
                    None,
                    None,
                    Some(reply),
                );
            }
            OperationRequest::RefreshRepo { alias, force } => {
                let target = OperationTarget::Repo(alias.clone());
                if self.duplicate_tx(kind, Some(&target)) {
                    let _ = reply.send(Err(Error::OperationInProgress(alias.to_string())));
                    return;
                }
                let current = self.status.repo_status(&alias);
                if !current.is_installed() {
                    let _ = reply.send(Err(Error::InvalidState {
                        target: alias.to_string(),
                        status: current.to_string(),
                    }));
                    return;
                }
                if !force && !self.status.repo_refresh_stale(&alias, self.config.refresh_expire) {
                    debug!("repo {} refreshed recently, skipping", alias);
                    let _ = reply.send(Ok(Outcome::Done));
                    return;
                }
                self.enqueue_tx(
                    Some(kind),
                    TxJob::Single(TransactionJob::RefreshRepo { alias }),
                    Some(target),
                    None,
                    Some(reply),
                );
            }
            OperationRequest::RefreshAllRepos { force } => {
                if self.duplicate_tx(kind, None) {
                    let _ = reply.send(Err(Error::OperationInProgress(kind.to_string())));
                    return;
                }
                let any_stale = self
                    .status
                    .enabled_repos()
                    .iter()
                    .any(|alias| self.status.repo_refresh_stale(alias, self.config.refresh_expire));
                if !force && !any_stale {
                    debug!("all repos refreshed recently, skipping");
                    let _ = reply.send(Ok(Outcome::Done));
                    return;
                }
                self.enqueue_tx(Some(kind), TxJob::RefreshAll { force }, None, None, Some(reply));
            }
            OperationRequest::AddRepo { alias, url } => {
                let current = self.status.repo_status(&alias);
                if current.is_installed() {
                    let _ = reply.send(Err(Error::InvalidState {
                        target: alias.to_string(),
                        status: current.to_string(),
                    }));
                    return;
                }
                self.submit_repo_op(kind, alias, RepoAction::Add { url }, reply);
            }
            OperationRequest::RemoveRepo { alias } => {
                self.submit_installed_repo_op(kind, alias, RepoAction::Remove, reply);
            }
            OperationRequest::EnableRepo { alias } => {
                self.submit_installed_repo_op(kind, alias, RepoAction::Enable, reply);
            }
            OperationRequest::DisableRepo { alias } => {
                self.submit_installed_repo_op(kind, alias, RepoAction::Disable, reply);
            }
            OperationRequest::EnableAllRepos => self.submit_bulk_repo(kind, RepoAction::Enable, reply),
            OperationRequest::DisableAllRepos => {
                self.submit_bulk_repo(kind, RepoAction::Disable, reply)
            }
            OperationRequest::RemoveAllRepos => self.submit_bulk_repo(kind, RepoAction::Remove, reply),
        }
    }

    /// Acceptance path shared by install/remove/update
    fn submit_package_op(
        &mut self,
        kind: OperationKind,
        id: PackageId,
        job: TransactionJob,
        transient: PackageStatus,
        reply: ReplySender,
    ) {
        let target = OperationTarget::Package(id.clone());
        if self.duplicate_tx(kind, Some(&target)) {
            let _ = reply.send(Err(Error::OperationInProgress(id.to_string())));
            return;
        }

        let current = self.status.package_status(&id);
        let allowed = match kind {
            OperationKind::InstallPackage => matches!(
                current,
                PackageStatus::Unknown | PackageStatus::NotInstalled | PackageStatus::Available
            ),
            OperationKind::RemovePackage => current.is_installed(),
            OperationKind::UpdatePackage => current == PackageStatus::UpdateAvailable,
            _ => false,
        };
        if current.is_transient() || !allowed {
            let _ = reply.send(Err(Error::InvalidState {
                target: id.to_string(),
                status: current.to_string(),
            }));
            return;
        }

        // Transient status lands at acceptance so observers see the
        // intent even while the operation waits in line.
        self.status.set_package_status(&id, transient);
        self.enqueue_tx(
            Some(kind),
            TxJob::Single(job),
            Some(target),
            Some((id, current)),
            Some(reply),
        );
    }

    /// True when an identical (kind, target) already waits or runs in the
    /// transaction lane
    fn duplicate_tx(&self, kind: OperationKind, target: Option<&OperationTarget>) -> bool {
        self.tx_active
            .iter()
            .chain(self.tx_pending.iter())
            .any(|op| op.kind == Some(kind) && op.target.as_ref() == target)
    }

    fn cache_refresh_stale(&self) -> bool {
        match self.cache_refreshed {
            None => true,
            Some(last) => {
                Utc::now() - last > Duration::seconds(self.config.refresh_expire as i64)
            }
        }
    }

    // === Cancellation ===

    /// Remove queued-but-not-dispatched operations matching a target
    ///
    /// Dispatched work cannot be cancelled from this layer. Constituents
    /// of bulk operations are not individually cancellable either; they
    /// belong to the batch.
    fn cancel_pending(&mut self, target: &OperationTarget) -> bool {
        let mut cancelled = false;

        let pending = std::mem::take(&mut self.tx_pending);
        for op in pending {
            if op.target.as_ref() == Some(target) {
                self.resolve_cancelled_tx(op);
                cancelled = true;
            } else {
                self.tx_pending.push_back(op);
            }
        }

        if let OperationTarget::Repo(alias) = target {
            if let Some(lane) = self.repo_lanes.remove(alias) {
                let mut kept = VecDeque::new();
                for job in lane {
                    match job.completion {
                        RepoCompletion::Single(reply) => {
                            let _ = reply.send(Err(Error::Cancelled));
                            cancelled = true;
                        }
                        RepoCompletion::Batch(_) => kept.push_back(job),
                    }
                }
                if !kept.is_empty() {
                    self.repo_lanes.insert(alias.clone(), kept);
                }
            }
        }

        if cancelled {
            debug!("cancelled pending operations for {}", target);
            self.emit_operations_changed();
        }
        cancelled
    }

    fn resolve_cancelled_tx(&mut self, op: TxOp) {
        if let Some((id, prior)) = &op.prior {
            self.status.set_package_status(id, *prior);
        }
        if let Some(reply) = op.reply {
            let _ = reply.send(Err(Error::Cancelled));
        }
    }

    // === Observability ===

    fn operations_snapshot(&self) -> Vec<ActiveOperation> {
        let mut operations = Vec::new();

        for op in self.tx_active.iter().chain(self.tx_pending.iter()) {
            if let Some(kind) = op.kind {
                operations.push(ActiveOperation {
                    kind,
                    target: op.target.clone(),
                    progress: op.progress,
                });
            }
        }

        let mut active: Vec<(&RepoAlias, &RepoJob)> = self
            .repo_active
            .iter()
            .filter(|(_, job)| matches!(job.completion, RepoCompletion::Single(_)))
            .collect();
        active.sort_by_key(|(alias, _)| (*alias).clone());
        for (alias, job) in active {
            operations.push(ActiveOperation {
                kind: job.kind,
                target: Some(OperationTarget::Repo(alias.clone())),
                progress: None,
            });
        }

        let mut lanes: Vec<(&RepoAlias, &VecDeque<RepoJob>)> = self.repo_lanes.iter().collect();
        lanes.sort_by_key(|(alias, _)| (*alias).clone());
        for (alias, lane) in lanes {
            for job in lane {
                if matches!(job.completion, RepoCompletion::Single(_)) {
                    operations.push(ActiveOperation {
                        kind: job.kind,
                        target: Some(OperationTarget::Repo(alias.clone())),
                        progress: None,
                    });
                }
            }
        }

        let mut batch_ids: Vec<&u32> = self.batches.keys().collect();
        batch_ids.sort();
        for id in batch_ids {
            operations.push(ActiveOperation {
                kind: self.batches[id].kind,
                target: None,
                progress: None,
            });
        }

        operations
    }

    fn emit_operations_changed(&self) {
        self.bus.publish(Event::OperationsChanged {
            operations: self.operations_snapshot(),
        });
    }
}
