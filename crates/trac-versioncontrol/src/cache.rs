//! Cached repository facade
//!
//! Revision metadata and node changes are copied into the revision cache
//! tables of the in-memory database. The copy is incremental: only
//! revisions newer than the youngest stored one are fetched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trac_core::{ConnectionPool, MemoryDatabase, Result};

use crate::model::{Changeset, Delta, DiffArgs, Node, NodeChange, Rev};
use crate::repository::Repository;

/// A cached `revision` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRow {
    pub rev: Rev,
    pub author: String,
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// The `revision` and `node_change` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheTables {
    pub revisions: BTreeMap<Rev, RevisionRow>,
    pub node_changes: BTreeMap<Rev, Vec<NodeChange>>,
}

impl CacheTables {
    pub fn youngest_stored(&self) -> Option<Rev> {
        self.revisions.keys().next_back().copied()
    }

    fn changeset(&self, rev: Rev) -> Option<Changeset> {
        let row = self.revisions.get(&rev)?;
        Some(Changeset {
            rev: row.rev,
            author: row.author.clone(),
            message: row.message.clone(),
            date: row.date,
            changes: self.node_changes.get(&rev).cloned().unwrap_or_default(),
            properties: row.properties.clone(),
        })
    }
}

pub type CacheDatabase = MemoryDatabase<CacheTables>;

/// A [`Repository`] serving changesets from the revision cache.
pub struct CachedRepository {
    repos: Arc<dyn Repository>,
    pool: ConnectionPool<CacheDatabase>,
    timeout: Option<Duration>,
    synced: AtomicBool,
}

impl CachedRepository {
    pub fn new(
        repos: Arc<dyn Repository>,
        pool: ConnectionPool<CacheDatabase>,
        timeout: Option<Duration>,
    ) -> Self {
        CachedRepository {
            repos,
            pool,
            timeout,
            synced: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.repos
    }

    /// Cache every revision newer than the youngest stored one. Returns
    /// the number of revisions added.
    pub fn sync(&self) -> Result<usize> {
        debug!("Checking whether sync with repository is needed");
        let cnx = self.pool.get_cnx(self.timeout)?;
        let stored = cnx.lock().read(CacheTables::youngest_stored);
        let youngest = self.repos.youngest_rev();

        let first = match stored {
            Some(stored) if stored >= youngest => return Ok(0),
            Some(stored) => stored + 1,
            None => self.repos.oldest_rev(),
        };
        info!(
            "Syncing with repository ({} to {})",
            stored.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string()),
            youngest
        );

        let mut added = 0;
        for rev in first..=youngest {
            let changeset = self.repos.get_changeset(rev)?;
            for change in &changeset.changes {
                debug!(
                    "Caching node change in [{}]: {} {} {}",
                    rev, change.path, change.kind, change.change
                );
            }
            cnx.lock().write(|tables| {
                tables.revisions.insert(
                    rev,
                    RevisionRow {
                        rev,
                        author: changeset.author.clone(),
                        message: changeset.message.clone(),
                        date: changeset.date,
                        properties: changeset.properties.clone(),
                    },
                );
                tables.node_changes.insert(rev, changeset.changes.clone());
            });
            added += 1;
        }
        cnx.commit()?;
        Ok(added)
    }

    fn ensure_synced(&self) -> Result<()> {
        if !self.synced.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.sync() {
                self.synced.store(false, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Repository for CachedRepository {
    fn name(&self) -> &str {
        self.repos.name()
    }

    /// Served from the cache after one sync; revisions committed since
    /// then are read from the backend.
    fn get_changeset(&self, rev: Rev) -> Result<Changeset> {
        self.ensure_synced()?;
        let cached = self.pool.backend().snapshot().changeset(rev);
        match cached {
            Some(changeset) => Ok(changeset),
            None => self.repos.get_changeset(rev),
        }
    }

    fn get_node(&self, path: &str, rev: Option<Rev>) -> Result<Node> {
        self.repos.get_node(path, rev)
    }

    fn get_entries(&self, path: &str, rev: Option<Rev>) -> Result<Vec<Node>> {
        self.repos.get_entries(path, rev)
    }

    fn previous_node(&self, path: &str, rev: Rev) -> Result<Option<(String, Rev)>> {
        self.repos.previous_node(path, rev)
    }

    fn get_changes(&self, args: &DiffArgs) -> Result<Vec<Delta>> {
        self.repos.get_changes(args)
    }

    fn youngest_rev(&self) -> Rev {
        self.repos.youngest_rev()
    }

    fn oldest_rev(&self) -> Rev {
        self.repos.oldest_rev()
    }

    fn next_rev_for_path(&self, rev: Rev, path: &str) -> Option<Rev> {
        self.repos.next_rev_for_path(rev, path)
    }
}
