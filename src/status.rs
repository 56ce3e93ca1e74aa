// src/status.rs

//! Status tracking for packages and repositories
//!
//! [`StatusTracker`] is the authoritative in-memory view of every known
//! package's and repository's status. It has a single writer (the queue
//! owner task); everything else reads through accessors or observes the
//! notification bus. Notifications fire only on actual changes, so
//! redundant writes stay silent.

use crate::backend::RepoAction;
use crate::events::{Event, NotificationBus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Package identifier as known to the transaction backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Repository alias as known to the repository tool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoAlias(String);

impl RepoAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepoAlias {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RepoAlias {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Status of a single package
///
/// A package is in exactly one status at any instant. The transient
/// statuses (Installing, Removing, Updating) exist only while an
/// operation targeting the package is pending or active in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    Unknown,
    NotInstalled,
    Available,
    Installed,
    UpdateAvailable,
    Installing,
    Removing,
    Updating,
}

impl PackageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PackageStatus::Unknown => "unknown",
            PackageStatus::NotInstalled => "not-installed",
            PackageStatus::Available => "available",
            PackageStatus::Installed => "installed",
            PackageStatus::UpdateAvailable => "update-available",
            PackageStatus::Installing => "installing",
            PackageStatus::Removing => "removing",
            PackageStatus::Updating => "updating",
        }
    }

    /// True while a queued or active operation holds the package
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PackageStatus::Installing | PackageStatus::Removing | PackageStatus::Updating
        )
    }

    /// True when the package is present on the device
    pub fn is_installed(&self) -> bool {
        matches!(self, PackageStatus::Installed | PackageStatus::UpdateAvailable)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    Unknown,
    NotInstalled,
    Disabled,
    Enabled,
}

impl RepoStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RepoStatus::Unknown => "unknown",
            RepoStatus::NotInstalled => "not-installed",
            RepoStatus::Disabled => "disabled",
            RepoStatus::Enabled => "enabled",
        }
    }

    /// True when the repository is configured on the device
    pub fn is_installed(&self) -> bool {
        matches!(self, RepoStatus::Enabled | RepoStatus::Disabled)
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything tracked for one repository
#[derive(Debug, Clone)]
struct RepoState {
    status: RepoStatus,
    url: Option<String>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Point-in-time view of one repository, as returned by `repo_list()`
#[derive(Debug, Clone)]
pub struct RepoSummary {
    pub alias: RepoAlias,
    pub status: RepoStatus,
    pub url: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Authoritative status store, single-writer
pub(crate) struct StatusTracker {
    packages: HashMap<PackageId, PackageStatus>,
    repos: HashMap<RepoAlias, RepoState>,
    update_versions: HashMap<PackageId, String>,
    updates_available: bool,
    bus: NotificationBus,
}

impl StatusTracker {
    pub(crate) fn new(bus: NotificationBus) -> Self {
        Self {
            packages: HashMap::new(),
            repos: HashMap::new(),
            update_versions: HashMap::new(),
            updates_available: false,
            bus,
        }
    }

    /// Current status of a package; Unknown for never-seen identifiers
    pub(crate) fn package_status(&self, id: &PackageId) -> PackageStatus {
        self.packages.get(id).copied().unwrap_or(PackageStatus::Unknown)
    }

    /// Overwrite a package's status, notifying only on actual change
    pub(crate) fn set_package_status(&mut self, id: &PackageId, status: PackageStatus) -> bool {
        let previous = self.package_status(id);
        if previous == status {
            return false;
        }

        debug!("package {} status {} -> {}", id, previous, status);
        self.packages.insert(id.clone(), status);

        // A transient status keeps its update entry so a failed operation
        // can revert without losing the known update version.
        if !status.is_transient() && status != PackageStatus::UpdateAvailable {
            self.update_versions.remove(id);
        }

        self.bus.publish(Event::PackageStatusChanged {
            id: id.clone(),
            status,
        });
        self.refresh_updates_aggregate();
        true
    }

    /// Populate installed packages at bootstrap, without notifications
    pub(crate) fn seed_packages(&mut self, ids: Vec<PackageId>) {
        for id in ids {
            self.packages.insert(id, PackageStatus::Installed);
        }
    }

    /// Replace the set of updatable packages with a fresh update-check result
    ///
    /// Packages that are no longer updatable return to Installed; newly
    /// updatable ones move to UpdateAvailable with their update version
    /// recorded.
    pub(crate) fn apply_update_check(&mut self, updates: Vec<(PackageId, String)>) {
        // A package in a transient status belongs to a pending operation;
        // that operation commits the terminal status, not the check.
        let stale: Vec<PackageId> = self
            .update_versions
            .keys()
            .filter(|id| !updates.iter().any(|(new_id, _)| new_id == *id))
            .filter(|id| !self.package_status(id).is_transient())
            .cloned()
            .collect();

        for id in stale {
            self.set_package_status(&id, PackageStatus::Installed);
        }

        for (id, version) in updates {
            if self.package_status(&id).is_transient() {
                continue;
            }
            self.set_package_status(&id, PackageStatus::UpdateAvailable);
            self.update_versions.insert(id, version);
        }
        self.refresh_updates_aggregate();
    }

    /// Version string of the available update for a package, if any
    pub(crate) fn update_version(&self, id: &PackageId) -> Option<String> {
        self.update_versions.get(id).cloned()
    }

    /// All packages with a known available update
    pub(crate) fn updatable_packages(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.update_versions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Aggregate "any updates available" flag
    pub(crate) fn updates_available(&self) -> bool {
        self.updates_available
    }

    fn refresh_updates_aggregate(&mut self) {
        let available = !self.update_versions.is_empty();
        if available != self.updates_available {
            self.updates_available = available;
            self.bus.publish(Event::UpdatesAvailableChanged { available });
        }
    }

    /// Current status of a repository; Unknown for never-seen aliases
    pub(crate) fn repo_status(&self, alias: &RepoAlias) -> RepoStatus {
        self.repos
            .get(alias)
            .map(|state| state.status)
            .unwrap_or(RepoStatus::Unknown)
    }

    /// Overwrite a repository's status, notifying only on actual change
    ///
    /// The action is what the completed operation did to the repository;
    /// it rides the `RepoModified` notification. An `Add` action also
    /// records the repository URL.
    pub(crate) fn set_repo_status(
        &mut self,
        alias: &RepoAlias,
        status: RepoStatus,
        action: RepoAction,
    ) -> bool {
        let state = self.repos.entry(alias.clone()).or_insert(RepoState {
            status: RepoStatus::Unknown,
            url: None,
            last_refresh: None,
        });

        if let RepoAction::Add { url } = &action {
            state.url = Some(url.clone());
        }

        if state.status == status {
            return false;
        }

        debug!("repo {} status {} -> {}", alias, state.status, status);
        state.status = status;
        self.bus.publish(Event::RepoModified {
            alias: alias.clone(),
            action,
        });
        true
    }

    /// Populate one repository at bootstrap, without notifications
    pub(crate) fn seed_repo(&mut self, alias: RepoAlias, status: RepoStatus, url: Option<String>) {
        self.repos.insert(
            alias,
            RepoState {
                status,
                url,
                last_refresh: None,
            },
        );
    }

    /// Apply one status to a set of repositories as a single batch
    ///
    /// All map writes are committed before the first notification is
    /// published, so observers never see a half-applied bulk change.
    pub(crate) fn mark_repos(
        &mut self,
        aliases: &[RepoAlias],
        status: RepoStatus,
        action: RepoAction,
    ) {
        let mut changed = Vec::new();
        for alias in aliases {
            let state = self.repos.entry(alias.clone()).or_insert(RepoState {
                status: RepoStatus::Unknown,
                url: None,
                last_refresh: None,
            });
            if state.status != status {
                state.status = status;
                changed.push(alias.clone());
            }
        }

        for alias in changed {
            self.bus.publish(Event::RepoModified {
                alias,
                action: action.clone(),
            });
        }
    }

    /// Forget a set of repositories entirely, as a single batch
    pub(crate) fn clear_repos(&mut self, aliases: &[RepoAlias]) {
        let mut removed = Vec::new();
        for alias in aliases {
            if self.repos.remove(alias).is_some() {
                removed.push(alias.clone());
            }
        }

        for alias in removed {
            self.bus.publish(Event::RepoModified {
                alias,
                action: RepoAction::Remove,
            });
        }
    }

    /// Aliases of repositories configured on the device
    pub(crate) fn installed_repos(&self) -> Vec<RepoAlias> {
        let mut aliases: Vec<RepoAlias> = self
            .repos
            .iter()
            .filter(|(_, state)| state.status.is_installed())
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Aliases of enabled repositories
    pub(crate) fn enabled_repos(&self) -> Vec<RepoAlias> {
        let mut aliases: Vec<RepoAlias> = self
            .repos
            .iter()
            .filter(|(_, state)| state.status == RepoStatus::Enabled)
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Point-in-time view of every known repository
    pub(crate) fn repo_list(&self) -> Vec<RepoSummary> {
        let mut list: Vec<RepoSummary> = self
            .repos
            .iter()
            .map(|(alias, state)| RepoSummary {
                alias: alias.clone(),
                status: state.status,
                url: state.url.clone(),
                last_refresh: state.last_refresh,
            })
            .collect();
        list.sort_by(|a, b| a.alias.cmp(&b.alias));
        list
    }

    /// Record a successful metadata refresh for a repository
    pub(crate) fn mark_repo_refreshed(&mut self, alias: &RepoAlias, when: DateTime<Utc>) {
        if let Some(state) = self.repos.get_mut(alias) {
            state.last_refresh = Some(when);
        }
    }

    /// Check whether a repository's metadata is older than the expiry window
    pub(crate) fn repo_refresh_stale(&self, alias: &RepoAlias, expire_secs: u64) -> bool {
        match self.repos.get(alias).and_then(|state| state.last_refresh) {
            None => true, // never refreshed
            Some(last) => Utc::now() - last > Duration::seconds(expire_secs as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;

    fn tracker_with_sub() -> (StatusTracker, crate::events::Subscription) {
        let bus = NotificationBus::new();
        let sub = bus.subscribe();
        (StatusTracker::new(bus), sub)
    }

    #[test]
    fn test_unknown_for_never_seen() {
        let (tracker, _sub) = tracker_with_sub();
        assert_eq!(
            tracker.package_status(&PackageId::from("nope")),
            PackageStatus::Unknown
        );
        assert_eq!(tracker.repo_status(&RepoAlias::from("nope")), RepoStatus::Unknown);
    }

    #[test]
    fn test_set_package_status_notifies_only_on_change() {
        let (mut tracker, mut sub) = tracker_with_sub();
        let id = PackageId::from("harbour-example");

        assert!(tracker.set_package_status(&id, PackageStatus::Installed));
        assert!(matches!(
            sub.try_recv(),
            Some(Event::PackageStatusChanged { status: PackageStatus::Installed, .. })
        ));

        // Redundant write stays silent
        assert!(!tracker.set_package_status(&id, PackageStatus::Installed));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_update_check_drives_aggregate_flag() {
        let (mut tracker, mut sub) = tracker_with_sub();
        let id = PackageId::from("harbour-example");
        tracker.seed_packages(vec![id.clone()]);
        assert!(!tracker.updates_available());

        tracker.apply_update_check(vec![(id.clone(), "1.2.0".to_string())]);
        assert!(tracker.updates_available());
        assert_eq!(tracker.update_version(&id).as_deref(), Some("1.2.0"));
        assert_eq!(tracker.updatable_packages(), vec![id.clone()]);

        let events: Vec<Event> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::UpdatesAvailableChanged { available: true }
        )));

        // Empty check clears everything back to Installed
        tracker.apply_update_check(Vec::new());
        assert!(!tracker.updates_available());
        assert_eq!(tracker.package_status(&id), PackageStatus::Installed);
        assert!(tracker.update_version(&id).is_none());
    }

    #[test]
    fn test_update_entry_survives_transient_status() {
        let (mut tracker, _sub) = tracker_with_sub();
        let id = PackageId::from("harbour-example");
        tracker.apply_update_check(vec![(id.clone(), "2.0".to_string())]);

        // While the update runs the entry stays, so a failure can revert
        tracker.set_package_status(&id, PackageStatus::Updating);
        assert_eq!(tracker.update_version(&id).as_deref(), Some("2.0"));
        assert!(tracker.updates_available());

        // Terminal status consumes it
        tracker.set_package_status(&id, PackageStatus::Installed);
        assert!(tracker.update_version(&id).is_none());
        assert!(!tracker.updates_available());
    }

    #[test]
    fn test_update_check_leaves_transient_packages_alone() {
        let (mut tracker, _sub) = tracker_with_sub();
        let id = PackageId::from("harbour-example");
        tracker.apply_update_check(vec![(id.clone(), "2.0".to_string())]);

        // The package is owned by a pending removal; a fresh check with
        // no updates must not clobber the transient status
        tracker.set_package_status(&id, PackageStatus::Removing);
        tracker.apply_update_check(Vec::new());
        assert_eq!(tracker.package_status(&id), PackageStatus::Removing);

        // Nor may a found update overwrite it
        tracker.apply_update_check(vec![(id.clone(), "3.0".to_string())]);
        assert_eq!(tracker.package_status(&id), PackageStatus::Removing);
        assert_eq!(tracker.update_version(&id).as_deref(), Some("2.0"));
    }

    #[test]
    fn test_mark_repos_batch_notifies_changed_only() {
        let (mut tracker, mut sub) = tracker_with_sub();
        let a = RepoAlias::from("repo-a");
        let b = RepoAlias::from("repo-b");
        tracker.seed_repo(a.clone(), RepoStatus::Enabled, None);
        tracker.seed_repo(b.clone(), RepoStatus::Disabled, None);

        tracker.mark_repos(&[a.clone(), b.clone()], RepoStatus::Enabled, RepoAction::Enable);

        let events: Vec<Event> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(events.len(), 1, "only repo-b actually changed");
        assert!(matches!(
            &events[0],
            Event::RepoModified { alias, action: RepoAction::Enable } if *alias == b
        ));
        assert_eq!(tracker.repo_status(&a), RepoStatus::Enabled);
        assert_eq!(tracker.repo_status(&b), RepoStatus::Enabled);
    }

    #[test]
    fn test_clear_repos_forgets_entries() {
        let (mut tracker, mut sub) = tracker_with_sub();
        let a = RepoAlias::from("repo-a");
        tracker.seed_repo(a.clone(), RepoStatus::Enabled, Some("https://example.org/a".into()));

        tracker.clear_repos(&[a.clone()]);
        assert_eq!(tracker.repo_status(&a), RepoStatus::Unknown);
        assert!(matches!(
            sub.try_recv(),
            Some(Event::RepoModified { action: RepoAction::Remove, .. })
        ));
    }

    #[test]
    fn test_refresh_staleness() {
        let (mut tracker, _sub) = tracker_with_sub();
        let a = RepoAlias::from("repo-a");
        tracker.seed_repo(a.clone(), RepoStatus::Enabled, None);

        // Never refreshed
        assert!(tracker.repo_refresh_stale(&a, 3600));

        tracker.mark_repo_refreshed(&a, Utc::now());
        assert!(!tracker.repo_refresh_stale(&a, 3600));
        assert!(tracker.repo_refresh_stale(&a, 0));
    }

    #[test]
    fn test_add_action_records_url() {
        let (mut tracker, _sub) = tracker_with_sub();
        let a = RepoAlias::from("mentaljam-obs");
        tracker.set_repo_status(
            &a,
            RepoStatus::Enabled,
            RepoAction::Add {
                url: "https://repo.example.org/mentaljam".to_string(),
            },
        );

        let list = tracker.repo_list();
        assert_eq!(list.len(), 1);
        assert_eq!(
            list[0].url.as_deref(),
            Some("https://repo.example.org/mentaljam")
        );
    }
}
