// src/queue/repos.rs

//! Repository lanes: FIFO per alias, concurrent across aliases
//!
//! Repo-configuration calls do not compete with the transaction backend,
//! so they run alongside an active transaction. Calls for one alias are
//! serialized so enable/disable/remove for the same repository can never
//! interleave; distinct aliases proceed in parallel up to the configured
//! limit. Bulk operations fan out into one constituent call per known
//! alias and resolve exactly once, after the last constituent lands.

use super::{Core, Internal, Outcome, RepoBatch, RepoCompletion, RepoJob, ReplySender};
use crate::backend::RepoAction;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::ops::OperationKind;
use crate::status::{RepoAlias, RepoStatus};
use tracing::{debug, info, warn};

impl Core {
    /// Acceptance path for remove/enable/disable, which all require the
    /// repository to be configured on the device
    pub(super) fn submit_installed_repo_op(
        &mut self,
        kind: OperationKind,
        alias: RepoAlias,
        action: RepoAction,
        reply: ReplySender,
    ) {
        let current = self.status.repo_status(&alias);
        if !current.is_installed() {
            let _ = reply.send(Err(Error::InvalidState {
                target: alias.to_string(),
                status: current.to_string(),
            }));
            return;
        }
        self.submit_repo_op(kind, alias, action, reply);
    }

    pub(super) fn submit_repo_op(
        &mut self,
        kind: OperationKind,
        alias: RepoAlias,
        action: RepoAction,
        reply: ReplySender,
    ) {
        if self.duplicate_repo(kind, &alias) {
            let _ = reply.send(Err(Error::OperationInProgress(alias.to_string())));
            return;
        }
        self.enqueue_repo_job(
            alias,
            RepoJob {
                kind,
                action,
                completion: RepoCompletion::Single(reply),
            },
        );
    }

    /// Expand a bulk operation into per-alias constituents
    pub(super) fn submit_bulk_repo(
        &mut self,
        kind: OperationKind,
        action: RepoAction,
        reply: ReplySender,
    ) {
        if self.batches.values().any(|batch| batch.kind == kind) {
            let _ = reply.send(Err(Error::OperationInProgress(kind.to_string())));
            return;
        }

        let aliases = self.status.installed_repos();
        if aliases.is_empty() {
            self.publish_batch_finished(kind);
            let _ = reply.send(Ok(Outcome::Done));
            return;
        }

        debug!("{} fans out over {} repositories", kind, aliases.len());
        let batch_id = self.next_batch;
        self.next_batch += 1;
        self.batches.insert(
            batch_id,
            RepoBatch {
                kind,
                remaining: aliases.len(),
                succeeded: Vec::new(),
                first_error: None,
                reply: Some(reply),
            },
        );

        for alias in aliases {
            self.enqueue_repo_job(
                alias,
                RepoJob {
                    kind,
                    action: action.clone(),
                    completion: RepoCompletion::Batch(batch_id),
                },
            );
        }
    }

    /// True when the identical (kind, alias) operation already waits or runs
    fn duplicate_repo(&self, kind: OperationKind, alias: &RepoAlias) -> bool {
        if self
            .repo_active
            .get(alias)
            .is_some_and(|job| job.kind == kind)
        {
            return true;
        }
        self.repo_lanes
            .get(alias)
            .is_some_and(|lane| lane.iter().any(|job| job.kind == kind))
    }

    fn enqueue_repo_job(&mut self, alias: RepoAlias, job: RepoJob) {
        self.repo_lanes.entry(alias).or_default().push_back(job);
        self.emit_operations_changed();
        self.pump_repo_lanes();
    }

    /// Dispatch ready lanes up to the concurrency limit
    pub(super) fn pump_repo_lanes(&mut self) {
        let limit = self.config.repo_concurrency.max(1);
        while self.repo_active.len() < limit {
            let Some(alias) = self
                .repo_lanes
                .iter()
                .filter(|(alias, lane)| {
                    !lane.is_empty() && !self.repo_active.contains_key(*alias)
                })
                .map(|(alias, _)| alias.clone())
                .min()
            else {
                break;
            };

            let Some(lane) = self.repo_lanes.get_mut(&alias) else {
                break;
            };
            let Some(job) = lane.pop_front() else {
                break;
            };
            if lane.is_empty() {
                self.repo_lanes.remove(&alias);
            }
            self.dispatch_repo_job(alias, job);
        }
    }

    fn dispatch_repo_job(&mut self, alias: RepoAlias, job: RepoJob) {
        debug!("repo tool: {} {}", job.action, alias);
        let tool = self.repo_tool.clone();
        let internal = self.internal_tx.clone();
        let action = job.action.clone();
        let task_alias = alias.clone();
        tokio::spawn(async move {
            let result = tool.modify_repo(&task_alias, &action).await;
            let _ = internal.send(Internal::RepoJobDone {
                alias: task_alias,
                result,
            });
        });
        self.repo_active.insert(alias, job);
    }

    pub(super) fn handle_repo_job_done(&mut self, alias: RepoAlias, result: Result<()>) {
        let Some(job) = self.repo_active.remove(&alias) else {
            warn!("ignoring completion for inactive repo job on {}", alias);
            return;
        };

        let unavailable = matches!(result, Err(Error::RepoToolUnavailable));
        if let Err(error) = &result {
            warn!("{} {} failed: {}", job.action, alias, error);
            self.bus.publish(Event::Error {
                error: error.clone(),
            });
        }

        match job.completion {
            RepoCompletion::Single(reply) => match result {
                Ok(()) => {
                    self.apply_repo_action(&alias, &job.action);
                    let _ = reply.send(Ok(Outcome::Done));
                }
                Err(error) => {
                    let _ = reply.send(Err(error));
                }
            },
            RepoCompletion::Batch(batch_id) => {
                self.record_batch_result(batch_id, alias, result);
            }
        }

        if unavailable {
            self.drain_repo_lanes();
        }

        self.emit_operations_changed();
        self.pump_repo_lanes();
    }

    /// Commit the status a completed single-alias action implies
    fn apply_repo_action(&mut self, alias: &RepoAlias, action: &RepoAction) {
        let status = match action {
            RepoAction::Add { .. } | RepoAction::Enable => RepoStatus::Enabled,
            RepoAction::Disable => RepoStatus::Disabled,
            RepoAction::Remove => RepoStatus::NotInstalled,
        };
        self.status.set_repo_status(alias, status, action.clone());
    }

    fn record_batch_result(&mut self, batch_id: u32, alias: RepoAlias, result: Result<()>) {
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            return;
        };
        batch.remaining -= 1;
        match result {
            Ok(()) => batch.succeeded.push(alias),
            Err(error) => {
                if batch.first_error.is_none() {
                    batch.first_error = Some(error);
                }
            }
        }
        if batch.remaining == 0 {
            if let Some(batch) = self.batches.remove(&batch_id) {
                self.finalize_batch(batch);
            }
        }
    }

    /// Apply the batch's statuses in one burst and resolve it exactly once
    fn finalize_batch(&mut self, mut batch: RepoBatch) {
        batch.succeeded.sort();
        match batch.kind {
            OperationKind::EnableAllRepos => {
                self.status
                    .mark_repos(&batch.succeeded, RepoStatus::Enabled, RepoAction::Enable);
            }
            OperationKind::DisableAllRepos => {
                self.status
                    .mark_repos(&batch.succeeded, RepoStatus::Disabled, RepoAction::Disable);
            }
            OperationKind::RemoveAllRepos => {
                self.status.clear_repos(&batch.succeeded);
            }
            _ => {}
        }
        self.publish_batch_finished(batch.kind);
        info!(
            "{} finished, {} repositories affected",
            batch.kind,
            batch.succeeded.len()
        );

        let result = match batch.first_error {
            None => Ok(Outcome::Done),
            Some(error) => Err(error),
        };
        if let Some(reply) = batch.reply.take() {
            let _ = reply.send(result);
        }
    }

    fn publish_batch_finished(&self, kind: OperationKind) {
        match kind {
            OperationKind::EnableAllRepos | OperationKind::DisableAllRepos => {
                self.bus.publish(Event::EnableReposFinished);
            }
            OperationKind::RemoveAllRepos => {
                self.bus.publish(Event::RemoveAllReposFinished);
            }
            _ => {}
        }
    }

    /// Fail everything still queued once the repo tool is unreachable
    fn drain_repo_lanes(&mut self) {
        let lanes = std::mem::take(&mut self.repo_lanes);
        for (alias, lane) in lanes {
            for job in lane {
                self.bus.publish(Event::Error {
                    error: Error::RepoToolUnavailable,
                });
                match job.completion {
                    RepoCompletion::Single(reply) => {
                        let _ = reply.send(Err(Error::RepoToolUnavailable));
                    }
                    RepoCompletion::Batch(batch_id) => {
                        self.record_batch_result(
                            batch_id,
                            alias.clone(),
                            Err(Error::RepoToolUnavailable),
                        );
                    }
                }
            }
        }
    }
}
