//! In-memory change and split sources.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use railsync_engine::{
    ChangeSource, LayoutBranch, PublicationChanges, Split, SplitSource, SyncResult,
};
use std::collections::HashMap;

/// Publications held in memory, per branch.
#[derive(Debug, Default)]
pub struct StaticChangeSource {
    publications: RwLock<HashMap<LayoutBranch, Vec<PublicationChanges>>>,
}

impl StaticChangeSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes on the main branch.
    pub fn publish(&self, publication: PublicationChanges) {
        self.publish_on(LayoutBranch::Main, publication);
    }

    /// Publishes on a branch.
    pub fn publish_on(&self, branch: LayoutBranch, publication: PublicationChanges) {
        let mut publications = self.publications.write();
        let list = publications.entry(branch).or_default();
        list.push(publication);
        list.sort_by_key(|p| (p.published_at, p.id));
    }
}

impl ChangeSource for StaticChangeSource {
    fn unpushed_changes(
        &self,
        branch: LayoutBranch,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<PublicationChanges>> {
        Ok(self
            .publications
            .read()
            .get(&branch)
            .map(|list| {
                list.iter()
                    .filter(|p| since.map_or(true, |since| p.published_at > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Splits held in memory, per branch.
#[derive(Debug, Default)]
pub struct StaticSplitSource {
    splits: RwLock<HashMap<LayoutBranch, Vec<Split>>>,
}

impl StaticSplitSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a split on the main branch.
    pub fn add(&self, split: Split) {
        self.add_on(LayoutBranch::Main, split);
    }

    /// Adds a split on a branch.
    pub fn add_on(&self, branch: LayoutBranch, split: Split) {
        self.splits.write().entry(branch).or_default().push(split);
    }
}

impl SplitSource for StaticSplitSource {
    fn published_splits(&self, branch: LayoutBranch) -> SyncResult<Vec<Split>> {
        Ok(self.splits.read().get(&branch).cloned().unwrap_or_default())
    }
}
