// src/queue/transactions.rs

//! Transaction lane: global FIFO, one job in flight
//!
//! The transaction backend takes one transaction at a time. The lane
//! enforces that invariant itself rather than trusting the backend:
//! the next entry is dispatched only after the active one reports
//! terminal completion.

use super::{Core, Internal, Outcome, ReplySender, TxJob, TxOp};
use crate::backend::{PackageInfo, TransactionJob, TransactionProgress, TransactionReport};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::ops::{OperationKind, OperationTarget};
use crate::status::{PackageId, PackageStatus};
use chrono::Utc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

impl Core {
    /// Append a caller-visible entry to the transaction lane
    pub(super) fn enqueue_tx(
        &mut self,
        kind: Option<OperationKind>,
        job: TxJob,
        target: Option<OperationTarget>,
        prior: Option<(PackageId, PackageStatus)>,
        reply: Option<ReplySender>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tx_pending.push_back(TxOp {
            seq,
            kind,
            job,
            target,
            prior,
            reply,
            progress: None,
        });
        if kind.is_some() {
            self.emit_operations_changed();
        }
        self.pump_transactions();
    }

    /// Queue internal work (bootstrap, update checks), deduplicated
    pub(super) fn enqueue_internal_tx(&mut self, job: TransactionJob) {
        let already_queued = self
            .tx_active
            .iter()
            .chain(self.tx_pending.iter())
            .any(|op| op.kind.is_none() && matches!(&op.job, TxJob::Single(queued) if *queued == job));
        if already_queued {
            return;
        }
        self.enqueue_tx(None, TxJob::Single(job), None, None, None);
    }

    /// Dispatch the next entry when the single active slot is free
    pub(super) fn pump_transactions(&mut self) {
        if self.tx_active.is_some() {
            return;
        }
        let Some(op) = self.tx_pending.pop_front() else {
            return;
        };
        self.dispatch_tx(op);
    }

    fn dispatch_tx(&mut self, op: TxOp) {
        let seq = op.seq;
        let internal = self.internal_tx.clone();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<TransactionProgress>();

        // Forward backend progress to the owner task, tagged with the
        // logical operation it belongs to
        let progress_internal = internal.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let _ = progress_internal.send(Internal::TransactionProgress {
                    seq,
                    percent: progress.percent,
                });
            }
        });

        match &op.job {
            TxJob::Single(job) => {
                debug!("dispatching transaction {}", job);
                let job = job.clone();
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = backend.run(job, progress_tx).await;
                    let _ = internal.send(Internal::TransactionDone { seq, result });
                });
            }
            TxJob::RefreshAll { force } => {
                // Expand here so staleness reflects the moment the
                // operation actually runs, not when it was queued
                let force = *force;
                let aliases: Vec<_> = self
                    .status
                    .enabled_repos()
                    .into_iter()
                    .filter(|alias| {
                        force || self.status.repo_refresh_stale(alias, self.config.refresh_expire)
                    })
                    .collect();
                debug!("refreshing {} repositories", aliases.len());

                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    for alias in aliases {
                        let job = TransactionJob::RefreshRepo {
                            alias: alias.clone(),
                        };
                        match backend.run(job, progress_tx.clone()).await {
                            Ok(_) => {
                                let _ = internal.send(Internal::RepoRefreshed { alias });
                            }
                            Err(error) => {
                                let _ = internal.send(Internal::TransactionDone {
                                    seq,
                                    result: Err(error),
                                });
                                return;
                            }
                        }
                    }
                    let _ = internal.send(Internal::TransactionDone {
                        seq,
                        result: Ok(TransactionReport::empty(started.elapsed())),
                    });
                });
            }
        }

        self.tx_active = Some(op);
    }

    pub(super) fn handle_transaction_done(&mut self, seq: u64, result: Result<TransactionReport>) {
        let Some(op) = self.tx_active.take_if(|active| active.seq == seq) else {
            warn!("ignoring completion of unknown transaction {}", seq);
            return;
        };

        match result {
            Ok(report) => self.complete_tx(op, report),
            Err(error) => {
                self.fail_tx(op, error.clone());
                // Losing the backend fails everything queued behind the
                // active operation as well; the queue drains and reports
                if error == Error::BackendUnavailable {
                    let pending = std::mem::take(&mut self.tx_pending);
                    for queued in pending {
                        self.fail_tx(queued, Error::BackendUnavailable);
                    }
                }
            }
        }

        self.emit_operations_changed();
        self.pump_transactions();
    }

    /// Commit the terminal status and resolve the submitter
    fn complete_tx(&mut self, op: TxOp, report: TransactionReport) {
        let mut outcome = Outcome::Done;

        match &op.job {
            TxJob::RefreshAll { .. } => {
                // Per-alias refresh marks arrived while the driver ran
                self.enqueue_internal_tx(TransactionJob::CheckUpdates);
            }
            TxJob::Single(job) => match job {
                TransactionJob::ListInstalled => {
                    let installed: Vec<PackageId> = report
                        .packages
                        .iter()
                        .filter(|pkg| pkg.info == PackageInfo::Installed)
                        .map(|pkg| pkg.id.clone())
                        .collect();
                    info!("backend reports {} installed packages", installed.len());
                    self.status.seed_packages(installed);
                    self.enqueue_internal_tx(TransactionJob::CheckUpdates);
                    self.finish_bootstrap_packages();
                }
                TransactionJob::CheckUpdates => {
                    let updates: Vec<(PackageId, String)> = report
                        .packages
                        .iter()
                        .filter(|pkg| pkg.info == PackageInfo::Update)
                        .map(|pkg| (pkg.id.clone(), pkg.version.clone().unwrap_or_default()))
                        .collect();
                    info!("{} updates available", updates.len());
                    self.status.apply_update_check(updates);
                }
                TransactionJob::ListVersions { name } => {
                    let id = PackageId::from(name.as_str());
                    let current = self.status.package_status(&id);
                    if !report.packages.is_empty()
                        && matches!(current, PackageStatus::Unknown | PackageStatus::NotInstalled)
                    {
                        self.status.set_package_status(&id, PackageStatus::Available);
                    }
                    outcome = Outcome::Versions(report.packages.clone());
                }
                TransactionJob::InstallPackage { id } => {
                    self.status.set_package_status(id, PackageStatus::Installed);
                }
                TransactionJob::InstallFile { .. } => {
                    for pkg in &report.packages {
                        if pkg.info == PackageInfo::Installed {
                            self.status.set_package_status(&pkg.id, PackageStatus::Installed);
                        }
                    }
                }
                TransactionJob::RemovePackage { id, .. } => {
                    self.status.set_package_status(id, PackageStatus::NotInstalled);
                }
                TransactionJob::UpdatePackage { id } => {
                    self.status.set_package_status(id, PackageStatus::Installed);
                }
                TransactionJob::RefreshCache => {
                    self.cache_refreshed = Some(Utc::now());
                    self.enqueue_internal_tx(TransactionJob::CheckUpdates);
                }
                TransactionJob::RefreshRepo { alias } => {
                    self.status.mark_repo_refreshed(alias, Utc::now());
                }
            },
        }

        if let Some(kind) = op.kind {
            info!(
                "{} finished in {}ms",
                kind,
                report.runtime.as_millis()
            );
        }
        if let Some(reply) = op.reply {
            let _ = reply.send(Ok(outcome));
        }
    }

    /// Revert status, notify observers and resolve the submitter
    fn fail_tx(&mut self, op: TxOp, error: Error) {
        if let Some(kind) = op.kind {
            warn!("{} failed: {}", kind, error);
        }

        if let Some((id, prior)) = &op.prior {
            self.status.set_package_status(id, *prior);
        }

        // Internal update checks fail quietly; everything a caller or
        // bootstrap asked for is reported on the bus
        let bootstrap_query =
            matches!(&op.job, TxJob::Single(TransactionJob::ListInstalled)) && op.kind.is_none();
        if op.reply.is_some() || bootstrap_query {
            self.bus.publish(Event::Error {
                error: error.clone(),
            });
        }

        if bootstrap_query {
            self.finish_bootstrap_packages();
        }

        if let Some(reply) = op.reply {
            let _ = reply.send(Err(error));
        }
    }
}
