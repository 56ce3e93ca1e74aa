// src/queue/bootstrap.rs

//! Initial status population
//!
//! Startup issues two independent queries: installed packages from the
//! transaction backend (through the normal transaction lane, so the
//! one-in-flight invariant holds from the first moment) and the repo
//! list from the repo tool. Each populates the status tracker as it
//! lands; readiness flips only once both have reported. A failing query
//! is reported on the bus but never blocks readiness: an unreachable
//! backend leaves the system degraded, not dead.

use super::{Core, Internal};
use crate::backend::{RepoEntry, TransactionJob};
use crate::error::Result;
use crate::events::Event;
use crate::status::RepoStatus;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl Core {
    pub(super) fn start_bootstrap(&mut self) {
        info!("querying installed packages and repository list");

        let tool = self.repo_tool.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tool.list_repos().await;
            let _ = internal.send(Internal::BootstrapRepos { result });
        });

        self.enqueue_internal_tx(TransactionJob::ListInstalled);
    }

    pub(super) fn handle_bootstrap_repos(&mut self, result: Result<Vec<RepoEntry>>) {
        match result {
            Ok(entries) => {
                info!("repo tool reports {} repositories", entries.len());
                for entry in entries {
                    let status = if entry.enabled {
                        RepoStatus::Enabled
                    } else {
                        RepoStatus::Disabled
                    };
                    self.status.seed_repo(entry.alias, status, Some(entry.url));
                }
            }
            Err(error) => {
                warn!("repository list query failed: {}", error);
                self.bus.publish(Event::Error { error });
            }
        }
        self.repos_seeded = true;
        self.maybe_finish_bootstrap();
    }

    /// Called when the installed-package query resolves, successfully or not
    pub(super) fn finish_bootstrap_packages(&mut self) {
        self.packages_seeded = true;
        self.maybe_finish_bootstrap();
    }

    fn maybe_finish_bootstrap(&mut self) {
        if self.packages_seeded && self.repos_seeded && !self.initialised.load(Ordering::SeqCst) {
            self.initialised.store(true, Ordering::SeqCst);
            info!("initial status population complete");
            self.bus.publish(Event::Initialised);
        }
    }
}
