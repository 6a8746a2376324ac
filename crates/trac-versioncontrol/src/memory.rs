//! In-memory repository backend
//!
//! Every revision keeps a full snapshot of the tree, so any two path@rev
//! pairs can be compared directly. Repositories are built revision by
//! revision with [`RepositoryBuilder`] or loaded from a JSON dump.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trac_core::{Result, TracError};

use crate::model::{
    ChangeKind, Changeset, Delta, DiffArgs, Node, NodeChange, NodeKind, Rev, join_path,
    normalize_path, relative_to,
};
use crate::repository::Repository;

/// Timestamp of revision 0 in built repositories; each later revision is
/// one hour younger.
const EPOCH_SECS: i64 = 1_136_073_600;

#[derive(Debug, Clone, PartialEq)]
struct NodeRecord {
    kind: NodeKind,
    content: Arc<[u8]>,
    properties: BTreeMap<String, String>,
    content_type: Option<String>,
    created_path: String,
    created_rev: Rev,
    last_modified: DateTime<Utc>,
}

impl NodeRecord {
    fn same_state(&self, other: &NodeRecord) -> bool {
        self.kind == other.kind
            && self.content == other.content
            && self.properties == other.properties
    }
}

type Tree = BTreeMap<String, NodeRecord>;

#[derive(Debug)]
struct Revision {
    changeset: Changeset,
    tree: Arc<Tree>,
}

#[derive(Debug)]
pub struct MemoryRepository {
    name: String,
    revisions: Vec<Revision>,
}

fn default_date(rev: Rev) -> DateTime<Utc> {
    DateTime::from_timestamp(EPOCH_SECS + rev as i64 * 3600, 0).unwrap_or_default()
}

fn root_tree(date: DateTime<Utc>) -> Tree {
    let mut tree = Tree::new();
    tree.insert(
        "/".to_string(),
        NodeRecord {
            kind: NodeKind::Directory,
            content: Arc::from(Vec::new()),
            properties: BTreeMap::new(),
            content_type: None,
            created_path: "/".to_string(),
            created_rev: 0,
            last_modified: date,
        },
    );
    tree
}

fn no_such_node(path: &str, rev: Rev) -> TracError {
    TracError::not_found(
        "No such node",
        format!("No node {} at revision {}", path, rev),
    )
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

impl MemoryRepository {
    /// Load a repository from a JSON dump file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let dump: RepositoryDump = serde_json::from_str(&text)?;
        let repos = dump.into_repository()?;
        info!(
            "Loaded repository {} from {} ({} revisions)",
            repos.name,
            path.display(),
            repos.revisions.len()
        );
        Ok(repos)
    }

    fn revision(&self, rev: Rev) -> Result<&Revision> {
        self.revisions.get(rev as usize).ok_or_else(|| {
            TracError::not_found(
                "No such changeset",
                format!("No changeset {} in the repository", rev),
            )
        })
    }

    fn make_node(&self, path: &str, rev: Rev, record: &NodeRecord) -> Node {
        Node {
            path: path.to_string(),
            rev,
            kind: record.kind,
            created_path: record.created_path.clone(),
            created_rev: record.created_rev,
            content: Arc::clone(&record.content),
            properties: record.properties.clone(),
            last_modified: record.last_modified,
            content_type: record.content_type.clone(),
        }
    }

    /// Nodes at or below `base`, keyed by their path relative to `base`.
    fn subtree<'a>(tree: &'a Tree, base: &str) -> BTreeMap<&'a str, (&'a str, &'a NodeRecord)> {
        tree.iter()
            .filter_map(|(path, record)| {
                relative_to(path, base).map(|rel| (rel, (path.as_str(), record)))
            })
            .collect()
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_changeset(&self, rev: Rev) -> Result<Changeset> {
        Ok(self.revision(rev)?.changeset.clone())
    }

    fn get_node(&self, path: &str, rev: Option<Rev>) -> Result<Node> {
        let rev = rev.unwrap_or_else(|| self.youngest_rev());
        let path = normalize_path(Some(path));
        let record = self
            .revision(rev)?
            .tree
            .get(&path)
            .ok_or_else(|| no_such_node(&path, rev))?;
        Ok(self.make_node(&path, rev, record))
    }

    fn get_entries(&self, path: &str, rev: Option<Rev>) -> Result<Vec<Node>> {
        let rev = rev.unwrap_or_else(|| self.youngest_rev());
        let dir = self.get_node(path, Some(rev))?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let tree = &self.revision(rev)?.tree;
        Ok(tree
            .iter()
            .filter(|(child, _)| parent_of(child) == Some(dir.path.as_str()))
            .map(|(child, record)| self.make_node(child, rev, record))
            .collect())
    }

    fn previous_node(&self, path: &str, rev: Rev) -> Result<Option<(String, Rev)>> {
        let node = self.get_node(path, Some(rev))?;
        let created = &self.revision(node.created_rev)?.changeset;

        // The change that produced the node, or a copy of one of its parents.
        let origin = created
            .changes
            .iter()
            .filter_map(|c| relative_to(&node.created_path, &c.path).map(|rel| (c, rel)))
            .max_by_key(|(c, _)| c.path.len());

        let (base_path, base_rev) = match origin {
            Some((change, rel)) => match (change.change, &change.base_path, change.base_rev) {
                (ChangeKind::Copy | ChangeKind::Move, Some(base), Some(base_rev)) => {
                    (join_path(base, rel), base_rev)
                }
                (ChangeKind::Add, _, _) if rel.is_empty() => return Ok(None),
                _ => match node.created_rev.checked_sub(1) {
                    Some(prev) => (node.created_path.clone(), prev),
                    None => return Ok(None),
                },
            },
            None => match node.created_rev.checked_sub(1) {
                Some(prev) => (node.created_path.clone(), prev),
                None => return Ok(None),
            },
        };

        match self.get_node(&base_path, Some(base_rev)) {
            Ok(prev) => Ok(Some((prev.created_path, prev.created_rev))),
            Err(TracError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get_changes(&self, args: &DiffArgs) -> Result<Vec<Delta>> {
        let empty = Tree::new();
        let old_tree = match args.old_rev {
            Some(rev) => self.revision(rev)?.tree.as_ref(),
            None => &empty,
        };
        let new_tree = self.revision(args.new_rev)?.tree.as_ref();

        let old_base = normalize_path(Some(&args.old_path));
        let new_base = normalize_path(Some(&args.new_path));
        let old_nodes = Self::subtree(old_tree, &old_base);
        let new_nodes = Self::subtree(new_tree, &new_base);
        if old_nodes.is_empty() && new_nodes.is_empty() {
            return Err(no_such_node(&new_base, args.new_rev));
        }

        let old_rev = args.old_rev.unwrap_or_default();
        let keys: BTreeSet<&str> = old_nodes.keys().chain(new_nodes.keys()).copied().collect();
        let mut deleted_dirs: Vec<&str> = Vec::new();
        let mut deltas = Vec::new();

        for rel in keys {
            let old = old_nodes.get(rel);
            let new = new_nodes.get(rel);
            match (old, new) {
                (Some((opath, o)), Some((npath, n))) => {
                    if o.kind != n.kind {
                        deltas.push(Delta {
                            old: Some(self.make_node(opath, old_rev, o)),
                            new: None,
                            kind: o.kind,
                            change: ChangeKind::Delete,
                        });
                        deltas.push(Delta {
                            old: None,
                            new: Some(self.make_node(npath, args.new_rev, n)),
                            kind: n.kind,
                            change: ChangeKind::Add,
                        });
                    } else if !o.same_state(n) {
                        deltas.push(Delta {
                            old: Some(self.make_node(opath, old_rev, o)),
                            new: Some(self.make_node(npath, args.new_rev, n)),
                            kind: n.kind,
                            change: ChangeKind::Edit,
                        });
                    }
                }
                (Some((opath, o)), None) => {
                    if deleted_dirs.iter().any(|dir| relative_to(rel, dir).is_some()) {
                        continue;
                    }
                    if o.kind == NodeKind::Directory {
                        deleted_dirs.push(rel);
                    }
                    deltas.push(Delta {
                        old: Some(self.make_node(opath, old_rev, o)),
                        new: None,
                        kind: o.kind,
                        change: ChangeKind::Delete,
                    });
                }
                (None, Some((npath, n))) => deltas.push(Delta {
                    old: None,
                    new: Some(self.make_node(npath, args.new_rev, n)),
                    kind: n.kind,
                    change: ChangeKind::Add,
                }),
                (None, None) => {}
            }
        }
        debug!(
            "{} delta(s) between {}@{:?} and {}@{}",
            deltas.len(),
            old_base,
            args.old_rev,
            new_base,
            args.new_rev
        );
        Ok(deltas)
    }

    fn youngest_rev(&self) -> Rev {
        self.revisions.len().saturating_sub(1) as Rev
    }

    fn oldest_rev(&self) -> Rev {
        0
    }
}

/// Builds a [`MemoryRepository`] one committed revision at a time.
/// Revision 0 is the empty root.
pub struct RepositoryBuilder {
    repos: MemoryRepository,
    error: Option<TracError>,
}

impl RepositoryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let date = default_date(0);
        RepositoryBuilder {
            repos: MemoryRepository {
                name: name.into(),
                revisions: vec![Revision {
                    changeset: Changeset {
                        rev: 0,
                        author: String::new(),
                        message: String::new(),
                        date,
                        changes: Vec::new(),
                        properties: BTreeMap::new(),
                    },
                    tree: Arc::new(root_tree(date)),
                }],
            },
            error: None,
        }
    }

    /// Commit a revision made of the operations applied by `f`.
    pub fn revision(
        mut self,
        author: &str,
        message: &str,
        f: impl FnOnce(&mut Transaction<'_>),
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let rev = self.repos.revisions.len() as Rev;
        let previous = self.repos.revisions.last().map(|r| r.tree.as_ref().clone());
        let mut tx = Transaction {
            history: &self.repos.revisions,
            tree: previous.unwrap_or_default(),
            rev,
            date: default_date(rev),
            changes: Vec::new(),
            properties: BTreeMap::new(),
            error: None,
        };
        f(&mut tx);
        match tx.finish() {
            Ok((tree, changes, date, properties)) => self.repos.revisions.push(Revision {
                changeset: Changeset {
                    rev,
                    author: author.to_string(),
                    message: message.to_string(),
                    date,
                    changes,
                    properties,
                },
                tree: Arc::new(tree),
            }),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn build(self) -> Result<MemoryRepository> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.repos),
        }
    }
}

/// The working tree of a revision being committed.
pub struct Transaction<'a> {
    history: &'a [Revision],
    tree: Tree,
    rev: Rev,
    date: DateTime<Utc>,
    changes: Vec<NodeChange>,
    properties: BTreeMap<String, String>,
    error: Option<TracError>,
}

type Finished = (Tree, Vec<NodeChange>, DateTime<Utc>, BTreeMap<String, String>);

impl Transaction<'_> {
    fn finish(self) -> Result<Finished> {
        match self.error {
            Some(e) => Err(e),
            None => Ok((self.tree, self.changes, self.date, self.properties)),
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(TracError::generic("Invalid commit", message));
        }
    }

    fn record(&mut self, path: &str, kind: NodeKind, change: ChangeKind, base: Option<(String, Rev)>) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.path == path) {
            if change == ChangeKind::Edit {
                return;
            }
            existing.change = change;
            existing.kind = kind;
            return;
        }
        let (base_path, base_rev) = match base {
            Some((path, rev)) => (Some(path), Some(rev)),
            None => (None, None),
        };
        self.changes.push(NodeChange {
            path: path.to_string(),
            kind,
            change,
            base_path,
            base_rev,
        });
    }

    fn record_for(&self, kind: NodeKind, path: &str, content: Arc<[u8]>) -> NodeRecord {
        NodeRecord {
            kind,
            content,
            properties: BTreeMap::new(),
            content_type: None,
            created_path: path.to_string(),
            created_rev: self.rev,
            last_modified: self.date,
        }
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut missing = Vec::new();
        let mut current = parent_of(path);
        while let Some(dir) = current {
            match self.tree.get(dir) {
                Some(record) if record.kind == NodeKind::Directory => break,
                Some(_) => {
                    self.fail(format!("{} is not a directory", dir));
                    return;
                }
                None => missing.push(dir.to_string()),
            }
            current = parent_of(dir);
        }
        for dir in missing.into_iter().rev() {
            let record = self.record_for(NodeKind::Directory, &dir, Arc::from(Vec::new()));
            self.tree.insert(dir.clone(), record);
            self.record(&dir, NodeKind::Directory, ChangeKind::Add, None);
        }
    }

    fn touch(&mut self, path: &str) {
        let (rev, date) = (self.rev, self.date);
        if let Some(record) = self.tree.get_mut(path) {
            record.created_rev = rev;
            record.created_path = path.to_string();
            record.last_modified = date;
        }
    }

    /// Override the commit date.
    pub fn at(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.date = date;
        self
    }

    pub fn set_revprop(&mut self, name: &str, value: &str) -> &mut Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        let path = normalize_path(Some(path));
        if self.tree.contains_key(&path) {
            self.fail(format!("{} already exists", path));
            return self;
        }
        self.ensure_parents(&path);
        let record = self.record_for(NodeKind::Directory, &path, Arc::from(Vec::new()));
        self.tree.insert(path.clone(), record);
        self.record(&path, NodeKind::Directory, ChangeKind::Add, None);
        self
    }

    pub fn add_file(&mut self, path: &str, content: impl AsRef<[u8]>) -> &mut Self {
        let path = normalize_path(Some(path));
        if self.tree.contains_key(&path) {
            self.fail(format!("{} already exists", path));
            return self;
        }
        self.ensure_parents(&path);
        let record = self.record_for(NodeKind::File, &path, Arc::from(content.as_ref()));
        self.tree.insert(path.clone(), record);
        self.record(&path, NodeKind::File, ChangeKind::Add, None);
        self
    }

    pub fn edit_file(&mut self, path: &str, content: impl AsRef<[u8]>) -> &mut Self {
        let path = normalize_path(Some(path));
        match self.tree.get_mut(&path) {
            Some(record) if record.kind == NodeKind::File => {
                record.content = Arc::from(content.as_ref());
            }
            _ => {
                self.fail(format!("No file {} to edit", path));
                return self;
            }
        }
        self.touch(&path);
        let base = Some((path.clone(), self.rev - 1));
        self.record(&path, NodeKind::File, ChangeKind::Edit, base);
        self
    }

    pub fn set_content_type(&mut self, path: &str, content_type: &str) -> &mut Self {
        let path = normalize_path(Some(path));
        match self.tree.get_mut(&path) {
            Some(record) => record.content_type = Some(content_type.to_string()),
            None => self.fail(format!("No node {}", path)),
        }
        self
    }

    pub fn set_property(&mut self, path: &str, name: &str, value: &str) -> &mut Self {
        let path = normalize_path(Some(path));
        let kind = match self.tree.get_mut(&path) {
            Some(record) => {
                record.properties.insert(name.to_string(), value.to_string());
                record.kind
            }
            None => {
                self.fail(format!("No node {}", path));
                return self;
            }
        };
        self.touch(&path);
        let base = Some((path.clone(), self.rev - 1));
        self.record(&path, kind, ChangeKind::Edit, base);
        self
    }

    pub fn delete(&mut self, path: &str) -> &mut Self {
        let path = normalize_path(Some(path));
        let Some(kind) = self.tree.get(&path).map(|r| r.kind) else {
            self.fail(format!("No node {} to delete", path));
            return self;
        };
        if path == "/" {
            self.fail("The root cannot be deleted".to_string());
            return self;
        }
        self.tree.retain(|p, _| relative_to(p, &path).is_none());
        let base = Some((path.clone(), self.rev - 1));
        self.record(&path, kind, ChangeKind::Delete, base);
        self
    }

    /// Copy `from@from_rev` (default: the previous revision) to `to`.
    pub fn copy(&mut self, from: &str, from_rev: Option<Rev>, to: &str) -> &mut Self {
        let from = normalize_path(Some(from));
        let to = normalize_path(Some(to));
        let from_rev = from_rev.unwrap_or(self.rev - 1);
        let Some(source) = self.history.get(from_rev as usize).map(|r| Arc::clone(&r.tree)) else {
            self.fail(format!("No revision {}", from_rev));
            return self;
        };
        let Some(kind) = self.copy_subtree(&source, &from, &to) else {
            return self;
        };
        self.record(&to, kind, ChangeKind::Copy, Some((from, from_rev)));
        self
    }

    /// Move `from` to `to` within this revision.
    pub fn move_node(&mut self, from: &str, to: &str) -> &mut Self {
        let from = normalize_path(Some(from));
        let to = normalize_path(Some(to));
        let source = Arc::new(self.tree.clone());
        let Some(kind) = self.copy_subtree(&source, &from, &to) else {
            return self;
        };
        self.tree
            .retain(|p, _| relative_to(p, &from).is_none() || relative_to(p, &to).is_some());
        self.record(&to, kind, ChangeKind::Move, Some((from, self.rev - 1)));
        self
    }

    /// Apply one operation read from a dump.
    pub fn apply(&mut self, op: &DumpOp) {
        match op {
            DumpOp::AddDir { path } => {
                self.add_dir(path);
            }
            DumpOp::AddFile {
                path,
                content,
                content_type,
            } => {
                self.add_file(path, content);
                if let Some(content_type) = content_type {
                    self.set_content_type(path, content_type);
                }
            }
            DumpOp::EditFile { path, content } => {
                self.edit_file(path, content);
            }
            DumpOp::Delete { path } => {
                self.delete(path);
            }
            DumpOp::Copy { from, rev, to } => {
                self.copy(from, *rev, to);
            }
            DumpOp::Move { from, to } => {
                self.move_node(from, to);
            }
            DumpOp::SetProperty { path, name, value } => {
                self.set_property(path, name, value);
            }
        }
    }

    fn copy_subtree(&mut self, source: &Tree, from: &str, to: &str) -> Option<NodeKind> {
        let Some(kind) = source.get(from).map(|r| r.kind) else {
            self.fail(format!("No node {} to copy", from));
            return None;
        };
        if self.tree.contains_key(to) {
            self.fail(format!("{} already exists", to));
            return None;
        }
        self.ensure_parents(to);
        for (path, record) in source {
            if let Some(rel) = relative_to(path, from) {
                let target = join_path(to, rel);
                let mut copied = record.clone();
                copied.created_path = target.clone();
                copied.created_rev = self.rev;
                copied.last_modified = self.date;
                self.tree.insert(target, copied);
            }
        }
        Some(kind)
    }
}

// ── JSON dump ───────────────────────────────────────────

/// Serialized repository history, one entry per revision after 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryDump {
    #[serde(default)]
    pub name: Option<String>,
    pub revisions: Vec<DumpRevision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpRevision {
    pub author: String,
    pub message: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub ops: Vec<DumpOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DumpOp {
    AddDir {
        path: String,
    },
    AddFile {
        path: String,
        content: String,
        #[serde(default)]
        content_type: Option<String>,
    },
    EditFile {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Copy {
        from: String,
        #[serde(default)]
        rev: Option<Rev>,
        to: String,
    },
    Move {
        from: String,
        to: String,
    },
    SetProperty {
        path: String,
        name: String,
        value: String,
    },
}

impl RepositoryDump {
    pub fn into_repository(self) -> Result<MemoryRepository> {
        let mut builder = RepositoryBuilder::new(self.name.unwrap_or_else(|| "default".to_string()));
        for revision in self.revisions {
            builder = builder.revision(&revision.author, &revision.message, |tx| {
                if let Some(date) = revision.date {
                    tx.at(date);
                }
                for (name, value) in &revision.properties {
                    tx.set_revprop(name, value);
                }
                for op in &revision.ops {
                    tx.apply(op);
                }
            });
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryRepository {
        RepositoryBuilder::new("sample")
            .revision("alice", "Import", |tx| {
                tx.add_file("/trunk/a.txt", "one\ntwo\n")
                    .add_file("/trunk/lib/b.txt", "b\n");
            })
            .revision("bob", "Edit a", |tx| {
                tx.edit_file("/trunk/a.txt", "one\n2\n");
            })
            .revision("carol", "Branch", |tx| {
                tx.copy("/trunk", None, "/branches/stable");
            })
            .revision("dave", "Rename and drop", |tx| {
                tx.move_node("/trunk/a.txt", "/trunk/c.txt")
                    .delete("/trunk/lib");
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_revision_creates_parents() {
        let repos = sample();
        let changes = repos.get_changeset(1).unwrap().changes;
        let paths: Vec<_> = changes.iter().map(|c| (c.path.as_str(), c.change)).collect();
        assert_eq!(
            paths,
            vec![
                ("/trunk", ChangeKind::Add),
                ("/trunk/a.txt", ChangeKind::Add),
                ("/trunk/lib", ChangeKind::Add),
                ("/trunk/lib/b.txt", ChangeKind::Add),
            ]
        );
        assert_eq!(repos.youngest_rev(), 4);
    }

    #[test]
    fn test_node_history_follows_copies() {
        let repos = sample();
        let node = repos.get_node("/branches/stable/a.txt", None).unwrap();
        assert_eq!(node.created_rev, 3);
        assert_eq!(
            repos.previous_node("/branches/stable/a.txt", 4).unwrap(),
            Some(("/trunk/a.txt".to_string(), 2))
        );
        assert_eq!(
            repos.previous_node("/trunk/a.txt", 2).unwrap(),
            Some(("/trunk/a.txt".to_string(), 1))
        );
        assert_eq!(repos.previous_node("/trunk/a.txt", 1).unwrap(), None);
    }

    #[test]
    fn test_directory_entries() {
        let repos = sample();
        let names = |path: &str, rev: Rev| -> Vec<String> {
            repos
                .get_entries(path, Some(rev))
                .unwrap()
                .into_iter()
                .map(|node| node.path)
                .collect()
        };
        assert_eq!(names("/trunk", 1), vec!["/trunk/a.txt", "/trunk/lib"]);
        assert_eq!(names("/trunk", 4), vec!["/trunk/c.txt"]);
        assert!(names("/trunk/a.txt", 1).is_empty());
        assert!(repos.get_entries("/nowhere", Some(1)).is_err());
    }

    #[test]
    fn test_move_keeps_content() {
        let repos = sample();
        let moved = repos.get_node("/trunk/c.txt", Some(4)).unwrap();
        assert_eq!(moved.content(), b"one\n2\n");
        assert!(!repos.has_node("/trunk/a.txt", Some(4)));
        assert_eq!(
            repos.previous_node("/trunk/c.txt", 4).unwrap(),
            Some(("/trunk/a.txt".to_string(), 2))
        );
    }

    #[test]
    fn test_changes_between_revisions() {
        let repos = sample();
        let deltas = repos
            .get_changes(&DiffArgs {
                old_path: "/trunk".to_string(),
                old_rev: Some(2),
                new_path: "/trunk".to_string(),
                new_rev: 4,
            })
            .unwrap();
        let summary: Vec<_> = deltas
            .iter()
            .map(|d| {
                let path = d.new.as_ref().or(d.old.as_ref()).map(|n| n.path.clone());
                (path.unwrap_or_default(), d.change)
            })
            .collect();
        // Children of a deleted directory are not listed.
        assert_eq!(
            summary,
            vec![
                ("/trunk/a.txt".to_string(), ChangeKind::Delete),
                ("/trunk/c.txt".to_string(), ChangeKind::Add),
                ("/trunk/lib".to_string(), ChangeKind::Delete),
            ]
        );
    }

    #[test]
    fn test_changes_across_paths_reroot() {
        let repos = sample();
        let deltas = repos
            .get_changes(&DiffArgs {
                old_path: "/trunk".to_string(),
                old_rev: Some(1),
                new_path: "/branches/stable".to_string(),
                new_rev: 3,
            })
            .unwrap();
        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.change, ChangeKind::Edit);
        assert_eq!(delta.old.as_ref().unwrap().path, "/trunk/a.txt");
        assert_eq!(delta.new.as_ref().unwrap().path, "/branches/stable/a.txt");
    }

    #[test]
    fn test_invalid_operation_fails_build() {
        let err = RepositoryBuilder::new("bad")
            .revision("x", "edit nothing", |tx| {
                tx.edit_file("/missing.txt", "x");
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("/missing.txt"));
    }

    #[test]
    fn test_load_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repository.json");
        std::fs::write(
            &path,
            r#"{"name": "dumped", "revisions": [
                {"author": "a", "message": "m", "ops": [
                    {"action": "add_file", "path": "/README", "content": "hi\n"},
                    {"action": "set_property", "path": "/README", "name": "svn:eol-style", "value": "native"}
                ]}
            ]}"#,
        )
        .unwrap();
        let repos = MemoryRepository::load(&path).unwrap();
        assert_eq!(repos.name(), "dumped");
        let node = repos.get_node("/README", Some(1)).unwrap();
        assert_eq!(node.properties.get("svn:eol-style").map(String::as_str), Some("native"));
        assert_eq!(repos.get_changeset(1).unwrap().changes.len(), 1);
    }
}
