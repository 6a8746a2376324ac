//! Cross-reference data model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trac_versioncontrol::encode_path;

pub const WIKI: &str = "wiki";
pub const TICKET: &str = "ticket";
pub const CHANGESET: &str = "changeset";
pub const REPORT: &str = "report";
pub const MILESTONE: &str = "milestone";
pub const SOURCE: &str = "source";

/// Identity of a Trac object that can take part in cross-references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ObjectRef {
    /// Source paths are stored without their leading and trailing slashes.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        let kind = kind.into();
        let id = id.into();
        let id = if kind == SOURCE {
            id.trim_matches('/').to_string()
        } else {
            id
        };
        ObjectRef { kind, id }
    }

    pub fn wiki(name: impl Into<String>) -> Self {
        Self::new(WIKI, name)
    }

    pub fn ticket(id: impl fmt::Display) -> Self {
        Self::new(TICKET, id.to_string())
    }

    pub fn changeset(rev: impl fmt::Display) -> Self {
        Self::new(CHANGESET, rev.to_string())
    }

    /// Parse a fully qualified `type:id` name.
    pub fn parse(fqname: &str) -> Option<Self> {
        let (kind, id) = fqname.split_once(':')?;
        if kind.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(kind, id))
    }

    /// The fully qualified wiki link, `type:id`.
    pub fn fqname(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// The shorthand wiki link for the object.
    pub fn shortname(&self) -> String {
        match self.kind.as_str() {
            TICKET => format!("#{}", self.id),
            CHANGESET => format!("[{}]", self.id),
            REPORT => format!("{{{}}}", self.id),
            _ => self.fqname(),
        }
    }

    /// A display name, e.g. `Ticket #1`.
    pub fn name(&self) -> String {
        match self.kind.as_str() {
            TICKET => format!("Ticket #{}", self.id),
            CHANGESET => format!("Changeset [{}]", self.id),
            REPORT => format!("Report {{{}}}", self.id),
            MILESTONE => format!("Milestone {}", self.id),
            WIKI => self.id.clone(),
            _ => self.fqname(),
        }
    }

    pub fn href(&self) -> String {
        match self.kind.as_str() {
            SOURCE => format!("/browser/{}", encode_path(&self.id)),
            _ => format!("/{}/{}", self.kind, encode_path(&self.id)),
        }
    }

    pub fn htmlclass(&self) -> &str {
        &self.kind
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One row of the cross-reference table. An empty `relation` marks an
/// implicit link found in wiki text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrefEdge {
    pub source: ObjectRef,
    pub facet: String,
    pub context: String,
    pub time: DateTime<Utc>,
    pub author: String,
    #[serde(default)]
    pub relation: String,
    pub target: ObjectRef,
}

impl XrefEdge {
    pub fn is_relation(&self) -> bool {
        !self.relation.is_empty()
    }
}

/// Which edges a query considers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RelationFilter {
    /// Implicit links and explicit relations alike.
    #[default]
    Any,
    /// Only edges carrying a relation.
    Explicit,
    /// Only implicit links.
    Implicit,
    Exact(String),
}

impl RelationFilter {
    pub fn matches(&self, relation: &str) -> bool {
        match self {
            RelationFilter::Any => true,
            RelationFilter::Explicit => !relation.is_empty(),
            RelationFilter::Implicit => relation.is_empty(),
            RelationFilter::Exact(wanted) => wanted == relation,
        }
    }
}

impl From<Option<&str>> for RelationFilter {
    fn from(relation: Option<&str>) -> Self {
        match relation {
            Some(relation) => RelationFilter::Exact(relation.to_string()),
            None => RelationFilter::Any,
        }
    }
}

/// A piece of wiki text attached to an object, such as a ticket
/// description or a changeset log message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub source: ObjectRef,
    pub name: String,
    pub time: DateTime<Utc>,
    pub author: String,
    pub text: String,
    /// Relation forced onto every link of the text; empty for plain links.
    #[serde(default)]
    pub relation: String,
}

impl Facet {
    pub fn new(
        source: ObjectRef,
        name: impl Into<String>,
        time: DateTime<Utc>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Facet {
            source,
            name: name.into(),
            time,
            author: author.into(),
            text: text.into(),
            relation: String::new(),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = relation.into();
        self
    }
}

/// A wiki page referenced by other objects but not existing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingLink {
    pub target: ObjectRef,
    pub sources: Vec<ObjectRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ObjectRef::ticket(1).shortname(), "#1");
        assert_eq!(ObjectRef::changeset(42).shortname(), "[42]");
        assert_eq!(ObjectRef::new(REPORT, "3").shortname(), "{3}");
        assert_eq!(ObjectRef::wiki("WikiStart").shortname(), "wiki:WikiStart");
        assert_eq!(ObjectRef::ticket(7).name(), "Ticket #7");
        assert_eq!(ObjectRef::new(MILESTONE, "m1").href(), "/milestone/m1");
        assert_eq!(ObjectRef::new(MILESTONE, "v 1.0").href(), "/milestone/v%201.0");
        assert_eq!(ObjectRef::new(SOURCE, "trunk/\u{e9}.txt").href(), "/browser/trunk/%C3%A9.txt");
    }

    #[test]
    fn test_source_ids_are_trimmed() {
        let source = ObjectRef::new(SOURCE, "/trunk/README/");
        assert_eq!(source.id, "trunk/README");
        assert_eq!(source.href(), "/browser/trunk/README");
        assert_eq!(ObjectRef::parse("source:/trunk"), Some(ObjectRef::new(SOURCE, "trunk")));
        assert_eq!(ObjectRef::parse("nocolon"), None);
    }

    #[test]
    fn test_relation_filter() {
        assert!(RelationFilter::Any.matches(""));
        assert!(RelationFilter::Implicit.matches(""));
        assert!(!RelationFilter::Explicit.matches(""));
        assert!(RelationFilter::Explicit.matches("blocks"));
        assert!(!RelationFilter::Exact("blocks".into()).matches("depends-on"));
        assert_eq!(RelationFilter::from(None), RelationFilter::Any);
    }
}
