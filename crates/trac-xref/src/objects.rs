//! Object managers: the sources of cross-referenced objects and of the
//! wiki text facets their links are parsed from

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trac_core::{ComponentDescriptor, Result};
use trac_versioncontrol::Repository;

use crate::model::{CHANGESET, Facet, MILESTONE, ObjectRef, REPORT, TICKET, WIKI};
use crate::system::OBJECT_MANAGERS;

/// Minimum delay between two reloads of the wiki page name index.
pub const INDEX_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Implemented by components extending `XRefSystem.object_managers`.
pub trait ObjectManager: Send + Sync {
    /// Object types served by this manager.
    fn object_types(&self) -> Vec<&'static str>;

    fn objects(&self) -> Result<Vec<ObjectRef>>;

    /// Every wiki text attached to the managed objects.
    fn facets(&self) -> Result<Vec<Facet>>;

    fn exists(&self, obj: &ObjectRef) -> Result<bool>;
}

/// Changesets of the repository; the log message is the `content` facet.
pub struct ChangesetObjects {
    repos: Arc<dyn Repository>,
}

impl ChangesetObjects {
    pub fn new(repos: Arc<dyn Repository>) -> Self {
        ChangesetObjects { repos }
    }

    pub fn descriptor(repos: Arc<dyn Repository>) -> ComponentDescriptor<ChangesetObjects> {
        ComponentDescriptor::new("ChangesetObjects", move |_| {
            Ok(ChangesetObjects::new(Arc::clone(&repos)))
        })
        .implements::<dyn ObjectManager>(|c| c)
        .extends(&OBJECT_MANAGERS)
    }

    /// Revision 0 is the empty root and carries no message.
    fn revisions(&self) -> std::ops::RangeInclusive<u64> {
        self.repos.oldest_rev().max(1)..=self.repos.youngest_rev()
    }
}

impl ObjectManager for ChangesetObjects {
    fn object_types(&self) -> Vec<&'static str> {
        vec![CHANGESET]
    }

    fn objects(&self) -> Result<Vec<ObjectRef>> {
        Ok(self.revisions().map(ObjectRef::changeset).collect())
    }

    fn facets(&self) -> Result<Vec<Facet>> {
        self.revisions()
            .map(|rev| {
                let changeset = self.repos.get_changeset(rev)?;
                Ok(Facet::new(
                    ObjectRef::changeset(rev),
                    "content",
                    changeset.date,
                    changeset.author,
                    changeset.message,
                ))
            })
            .collect()
    }

    fn exists(&self, obj: &ObjectRef) -> Result<bool> {
        Ok(obj.kind == CHANGESET
            && obj
                .id
                .parse::<u64>()
                .is_ok_and(|rev| self.revisions().contains(&rev)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WikiPage {
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketComment {
    pub author: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reporter: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<TicketComment>,
    /// Ticket fields holding links to other objects, keyed by the
    /// relation they establish (e.g. `blocks = "#2, #3"`).
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
}

/// Wiki pages, tickets, milestones and reports, as stored in
/// `objects.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentStore {
    pub wiki: Vec<WikiPage>,
    pub tickets: Vec<Ticket>,
    pub milestones: Vec<Milestone>,
    pub reports: Vec<Report>,
}

impl ContentStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No object content at {}", path.display());
            return Ok(ContentStore::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn page_names(&self) -> HashSet<String> {
        self.wiki.iter().map(|page| page.name.clone()).collect()
    }

    fn facets(&self) -> Vec<Facet> {
        let mut facets = Vec::new();
        for page in &self.wiki {
            facets.push(Facet::new(
                ObjectRef::wiki(&page.name),
                "content",
                page.time,
                &page.author,
                &page.text,
            ));
        }
        for ticket in &self.tickets {
            let me = ObjectRef::ticket(ticket.id);
            facets.push(Facet::new(
                me.clone(),
                "description",
                ticket.time,
                &ticket.reporter,
                &ticket.description,
            ));
            for (n, comment) in ticket.comments.iter().enumerate() {
                facets.push(Facet::new(
                    me.clone(),
                    format!("comment:{}", n + 1),
                    comment.time,
                    &comment.author,
                    &comment.text,
                ));
            }
            for (relation, value) in &ticket.relations {
                facets.push(
                    Facet::new(me.clone(), relation, ticket.time, &ticket.reporter, value)
                        .with_relation(relation),
                );
            }
        }
        for milestone in &self.milestones {
            facets.push(Facet::new(
                ObjectRef::new(MILESTONE, &milestone.name),
                "description",
                milestone.time,
                "",
                &milestone.description,
            ));
        }
        for report in &self.reports {
            facets.push(Facet::new(
                ObjectRef::new(REPORT, report.id.to_string()),
                "description",
                DateTime::<Utc>::default(),
                &report.author,
                &report.description,
            ));
        }
        facets
    }
}

struct IndexState {
    pages: Arc<HashSet<String>>,
    refreshed: Option<Instant>,
}

/// Cached set of existing wiki page names, reloaded at most every
/// [`INDEX_UPDATE_INTERVAL`].
pub struct WikiPageIndex {
    state: Mutex<IndexState>,
    interval: Duration,
}

impl Default for WikiPageIndex {
    fn default() -> Self {
        Self::with_interval(INDEX_UPDATE_INTERVAL)
    }
}

impl WikiPageIndex {
    pub fn with_interval(interval: Duration) -> Self {
        WikiPageIndex {
            state: Mutex::new(IndexState {
                pages: Arc::new(HashSet::new()),
                refreshed: None,
            }),
            interval,
        }
    }

    /// Current page names, calling `load` when the index is stale.
    pub fn pages(
        &self,
        load: impl FnOnce() -> Result<HashSet<String>>,
    ) -> Result<Arc<HashSet<String>>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stale = state
            .refreshed
            .is_none_or(|at| at.elapsed() >= self.interval);
        if stale {
            state.pages = Arc::new(load()?);
            state.refreshed = Some(Instant::now());
            debug!("Wiki page index reloaded ({} pages)", state.pages.len());
        }
        Ok(Arc::clone(&state.pages))
    }

    pub fn has_page(
        &self,
        name: &str,
        load: impl FnOnce() -> Result<HashSet<String>>,
    ) -> Result<bool> {
        Ok(self.pages(load)?.contains(name))
    }

    /// Force a reload on next access, e.g. after a page was added.
    pub fn invalidate(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .refreshed = None;
    }
}

enum ContentSource {
    File(PathBuf),
    Memory(Mutex<ContentStore>),
}

/// Wiki pages, tickets, milestones and reports.
pub struct ContentObjects {
    source: ContentSource,
    index: WikiPageIndex,
}

impl ContentObjects {
    /// Content read from a JSON file each time it is needed.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        ContentObjects {
            source: ContentSource::File(path.into()),
            index: WikiPageIndex::default(),
        }
    }

    pub fn descriptor(path: impl Into<PathBuf>) -> ComponentDescriptor<ContentObjects> {
        let path = path.into();
        ComponentDescriptor::new("ContentObjects", move |_| Ok(ContentObjects::open(path.clone())))
            .implements::<dyn ObjectManager>(|c| c)
            .extends(&OBJECT_MANAGERS)
    }

    pub fn in_memory(store: ContentStore) -> Self {
        ContentObjects {
            source: ContentSource::Memory(Mutex::new(store)),
            index: WikiPageIndex::default(),
        }
    }

    pub fn store(&self) -> Result<ContentStore> {
        match &self.source {
            ContentSource::File(path) => ContentStore::load(path),
            ContentSource::Memory(store) => {
                Ok(store.lock().unwrap_or_else(|e| e.into_inner()).clone())
            }
        }
    }

    /// Replace the stored content and drop the page name index.
    pub fn replace(&self, content: ContentStore) -> Result<()> {
        match &self.source {
            ContentSource::File(path) => content.save(path)?,
            ContentSource::Memory(store) => {
                *store.lock().unwrap_or_else(|e| e.into_inner()) = content;
            }
        }
        self.index.invalidate();
        Ok(())
    }

    pub fn page_exists(&self, name: &str) -> Result<bool> {
        self.index
            .has_page(name, || Ok(self.store()?.page_names()))
    }
}

impl ObjectManager for ContentObjects {
    fn object_types(&self) -> Vec<&'static str> {
        vec![WIKI, TICKET, MILESTONE, REPORT]
    }

    fn objects(&self) -> Result<Vec<ObjectRef>> {
        let store = self.store()?;
        let mut objects: Vec<ObjectRef> = store
            .wiki
            .iter()
            .map(|page| ObjectRef::wiki(&page.name))
            .collect();
        objects.extend(store.tickets.iter().map(|t| ObjectRef::ticket(t.id)));
        objects.extend(
            store
                .milestones
                .iter()
                .map(|m| ObjectRef::new(MILESTONE, &m.name)),
        );
        objects.extend(
            store
                .reports
                .iter()
                .map(|r| ObjectRef::new(REPORT, r.id.to_string())),
        );
        Ok(objects)
    }

    fn facets(&self) -> Result<Vec<Facet>> {
        Ok(self.store()?.facets())
    }

    fn exists(&self, obj: &ObjectRef) -> Result<bool> {
        if obj.kind == WIKI {
            return self.page_exists(&obj.id);
        }
        let store = self.store()?;
        Ok(match obj.kind.as_str() {
            TICKET => store.tickets.iter().any(|t| t.id.to_string() == obj.id),
            MILESTONE => store.milestones.iter().any(|m| m.name == obj.id),
            REPORT => store.reports.iter().any(|r| r.id.to_string() == obj.id),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_page_index_reloads_after_interval() {
        let index = WikiPageIndex::with_interval(Duration::from_secs(3600));
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(HashSet::from(["WikiStart".to_string()]))
        };
        assert!(index.has_page("WikiStart", load).unwrap());
        assert!(!index.has_page("Missing", load).unwrap());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        index.invalidate();
        assert!(index.has_page("WikiStart", load).unwrap());
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        let eager = WikiPageIndex::with_interval(Duration::ZERO);
        eager.pages(load).unwrap();
        eager.pages(load).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_content_facets() {
        let store = ContentStore {
            tickets: vec![Ticket {
                id: 1,
                description: "See WikiStart".into(),
                reporter: "joe".into(),
                comments: vec![TicketComment {
                    author: "ann".into(),
                    text: "Fixed in [3]".into(),
                    ..Default::default()
                }],
                relations: BTreeMap::from([("blocks".to_string(), "#2".to_string())]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let facets = store.facets();
        let names: Vec<_> = facets.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["description", "comment:1", "blocks"]);
        assert_eq!(facets[1].author, "ann");
        assert_eq!(facets[2].relation, "blocks");
    }

    #[test]
    fn test_content_objects_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.json");
        std::fs::write(
            &path,
            r#"{"wiki": [{"name": "WikiStart", "text": "Welcome"}], "reports": [{"id": 3}]}"#,
        )
        .unwrap();
        let objects = ContentObjects::open(&path);
        assert_eq!(
            objects.objects().unwrap(),
            vec![ObjectRef::wiki("WikiStart"), ObjectRef::new(REPORT, "3")]
        );
        assert!(objects.exists(&ObjectRef::wiki("WikiStart")).unwrap());
        assert!(objects.exists(&ObjectRef::new(REPORT, "3")).unwrap());
        assert!(!objects.exists(&ObjectRef::ticket(1)).unwrap());

        let mut store = objects.store().unwrap();
        store.wiki.push(WikiPage {
            name: "Roadmap".into(),
            ..Default::default()
        });
        objects.replace(store).unwrap();
        assert!(objects.page_exists("Roadmap").unwrap());
    }
}
