//! Core data structures for repository history

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Revision number. Revisions are totally ordered.
pub type Rev = u64;

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    #[serde(rename = "dir")]
    Directory,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
        })
    }
}

/// What happened to a node in a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Copy,
    Delete,
    Edit,
    Move,
}

/// Changes for which both sides exist and can be compared.
pub const DIFF_CHANGES: [ChangeKind; 3] = [ChangeKind::Edit, ChangeKind::Copy, ChangeKind::Move];

impl ChangeKind {
    pub fn is_diff_change(self) -> bool {
        DIFF_CHANGES.contains(&self)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Add => "add",
            ChangeKind::Copy => "copy",
            ChangeKind::Delete => "delete",
            ChangeKind::Edit => "edit",
            ChangeKind::Move => "move",
        })
    }
}

/// One node-level change of a changeset. Every change but an add has a
/// base; every change but a delete has a path at the changeset revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    pub path: String,
    pub kind: NodeKind,
    pub change: ChangeKind,
    pub base_path: Option<String>,
    pub base_rev: Option<Rev>,
}

/// A revision's metadata and node changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub rev: Rev,
    pub author: String,
    pub message: String,
    pub date: DateTime<Utc>,
    pub changes: Vec<NodeChange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// An extra revision property shown with the changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetProperty {
    pub name: String,
    pub value: String,
    pub wikiflag: bool,
}

impl Changeset {
    pub fn get_changes(&self) -> &[NodeChange] {
        &self.changes
    }

    pub fn get_properties(&self) -> Vec<ChangesetProperty> {
        self.properties
            .iter()
            .map(|(name, value)| ChangesetProperty {
                name: name.clone(),
                value: value.clone(),
                wikiflag: false,
            })
            .collect()
    }
}

/// A file or directory at a revision. `path` is where it is viewed;
/// `created_path`/`created_rev` is where it last changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub path: String,
    pub rev: Rev,
    pub kind: NodeKind,
    pub created_path: String,
    pub created_rev: Rev,
    #[serde(skip)]
    pub content: Arc<[u8]>,
    pub properties: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
}

impl Node {
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_length(&self) -> u64 {
        self.content.len() as u64
    }

    /// Last path component, empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn get_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Declared content type, or one guessed from the file name.
    pub fn content_type(&self) -> Option<String> {
        if self.content_type.is_some() || self.is_dir() {
            return self.content_type.clone();
        }
        mime_guess::from_path(&self.path)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }
}

/// A node-level difference between two tree states. At most one side is
/// missing: `old` for an add, `new` for a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub old: Option<Node>,
    pub new: Option<Node>,
    pub kind: NodeKind,
    pub change: ChangeKind,
}

/// The two path@rev pairs being compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffArgs {
    pub old_path: String,
    pub old_rev: Option<Rev>,
    pub new_path: String,
    pub new_rev: Rev,
}

/// Normalize a repository path to its absolute form: `/trunk/a.txt`,
/// `/` for the root.
pub fn normalize_path(path: Option<&str>) -> String {
    let trimmed = path.unwrap_or_default().trim_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    normalized.push('/');
    for (i, part) in trimmed.split('/').filter(|p| !p.is_empty()).enumerate() {
        if i > 0 {
            normalized.push('/');
        }
        normalized.push_str(part);
    }
    normalized
}

/// Join `rel` under `base`, both in normalized form.
pub fn join_path(base: &str, rel: &str) -> String {
    let rel = rel.trim_matches('/');
    match (base, rel) {
        (base, "") => base.to_string(),
        ("/", rel) => format!("/{}", rel),
        (base, rel) => format!("{}/{}", base, rel),
    }
}

/// `path` relative to `base` when it is `base` itself or below it.
pub fn relative_to<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if path == base {
        return Some("");
    }
    if base == "/" {
        return Some(path.trim_start_matches('/'));
    }
    path.strip_prefix(base)?.strip_prefix('/')
}

/// Percent-encode each segment of `path` for use in a URL, keeping the
/// `/` separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(None), "/");
        assert_eq!(normalize_path(Some("")), "/");
        assert_eq!(normalize_path(Some("trunk//a.txt/")), "/trunk/a.txt");
        assert_eq!(normalize_path(Some("/trunk")), "/trunk");
    }

    #[test]
    fn test_relative_paths() {
        assert_eq!(relative_to("/trunk/a.txt", "/trunk"), Some("a.txt"));
        assert_eq!(relative_to("/trunk", "/trunk"), Some(""));
        assert_eq!(relative_to("/trunkx/a", "/trunk"), None);
        assert_eq!(relative_to("/trunk/a", "/"), Some("trunk/a"));
        assert_eq!(join_path("/", "trunk/a"), "/trunk/a");
        assert_eq!(join_path("/branches/b", "a.txt"), "/branches/b/a.txt");
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("/trunk/a.txt"), "/trunk/a.txt");
        assert_eq!(encode_path("/a b/x&y?"), "/a%20b/x%26y%3F");
        assert_eq!(encode_path("/trunk/é.txt"), "/trunk/%C3%A9.txt");
        let encoded = encode_path("/docs/100% done#1");
        assert_eq!(urlencoding::decode(&encoded).unwrap(), "/docs/100% done#1");
    }

    #[test]
    fn test_diff_changes() {
        assert!(ChangeKind::Move.is_diff_change());
        assert!(!ChangeKind::Add.is_diff_change());
        assert_eq!(ChangeKind::Delete.to_string(), "delete");
    }
}
