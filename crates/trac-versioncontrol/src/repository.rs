//! The version control backend interface

use chrono::{DateTime, Utc};
use trac_core::{Result, TracError};

use crate::model::{self, Changeset, Delta, DiffArgs, Node, Rev};

/// Read access to a versioned tree and its history.
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    fn get_changeset(&self, rev: Rev) -> Result<Changeset>;

    /// Node at `path`, at `rev` or the youngest revision.
    fn get_node(&self, path: &str, rev: Option<Rev>) -> Result<Node>;

    /// Direct children of the directory at `path@rev`, sorted by path.
    fn get_entries(&self, path: &str, rev: Option<Rev>) -> Result<Vec<Node>>;

    /// Previous `(path, rev)` in the history of the node at `path@rev`,
    /// following copies and moves.
    fn previous_node(&self, path: &str, rev: Rev) -> Result<Option<(String, Rev)>>;

    /// Node-level differences between two path@rev pairs.
    fn get_changes(&self, args: &DiffArgs) -> Result<Vec<Delta>>;

    fn youngest_rev(&self) -> Rev;

    fn oldest_rev(&self) -> Rev;

    fn previous_rev(&self, rev: Rev) -> Option<Rev> {
        (rev > self.oldest_rev()).then(|| rev - 1)
    }

    fn next_rev(&self, rev: Rev) -> Option<Rev> {
        (rev < self.youngest_rev()).then(|| rev + 1)
    }

    /// Next revision touching `path`. Backends without cheap reverse
    /// path history return `None`.
    fn next_rev_for_path(&self, _rev: Rev, _path: &str) -> Option<Rev> {
        None
    }

    fn has_node(&self, path: &str, rev: Option<Rev>) -> bool {
        self.get_node(path, rev).is_ok()
    }

    fn get_changesets(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Vec<Changeset>> {
        let mut changesets = Vec::new();
        for rev in self.oldest_rev()..=self.youngest_rev() {
            let changeset = self.get_changeset(rev)?;
            if changeset.date >= start && changeset.date < stop {
                changesets.push(changeset);
            }
        }
        Ok(changesets)
    }

    fn normalize_path(&self, path: Option<&str>) -> String {
        model::normalize_path(path)
    }

    /// Resolve a revision argument; a missing, empty or `latest` value is
    /// the youngest revision.
    fn normalize_rev(&self, rev: Option<&str>) -> Result<Rev> {
        let youngest = self.youngest_rev();
        let rev = match rev.map(str::trim) {
            None | Some("") | Some("latest") | Some("head") => return Ok(youngest),
            Some(rev) => rev.trim_start_matches('r'),
        };
        let parsed: Rev = rev.parse().map_err(|_| {
            TracError::not_found(
                "No such changeset",
                format!("Invalid revision \"{}\"", rev),
            )
        })?;
        if parsed > youngest || parsed < self.oldest_rev() {
            return Err(TracError::not_found(
                "No such changeset",
                format!("No changeset {} in the repository", parsed),
            ));
        }
        Ok(parsed)
    }

    fn rev_older_than(&self, rev1: Rev, rev2: Rev) -> bool {
        rev1 < rev2
    }

    fn short_rev(&self, rev: Rev) -> String {
        rev.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RepositoryBuilder;

    #[test]
    fn test_normalize_rev() {
        let repos = RepositoryBuilder::new("demo")
            .revision("alice", "one", |tx| {
                tx.add_file("/a.txt", "a\n");
            })
            .build()
            .unwrap();
        assert_eq!(repos.normalize_rev(None).unwrap(), 1);
        assert_eq!(repos.normalize_rev(Some("latest")).unwrap(), 1);
        assert_eq!(repos.normalize_rev(Some("r0")).unwrap(), 0);
        assert!(matches!(
            repos.normalize_rev(Some("7")),
            Err(TracError::NotFound { .. })
        ));
        assert!(repos.normalize_rev(Some("abc")).is_err());
        assert_eq!(repos.next_rev(1), None);
        assert_eq!(repos.previous_rev(1), Some(0));
        assert_eq!(repos.next_rev_for_path(0, "/a.txt"), None);
    }
}
