//! The cross-reference system: link maintenance, queries and reports

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use trac_core::{
    ComponentDescriptor, ComponentManager, Connection, ExtensionPoint, Result, TracError,
};

use crate::graph::{XrefConnection, XrefGraph};
use crate::model::{
    CHANGESET, Facet, MILESTONE, MissingLink, ObjectRef, REPORT, RelationFilter, TICKET, WIKI,
    XrefEdge,
};
use crate::objects::ObjectManager;
use crate::syntax::{LinkScanner, ScannedLink, WikiSyntaxProvider};

pub const XREF_SYSTEM: &str = "XRefSystem";

/// Action needed to browse cross-references.
pub const XREF_VIEW: &str = "XREF_VIEW";

pub const SYNTAX_PROVIDERS: ExtensionPoint<dyn WikiSyntaxProvider> =
    ExtensionPoint::new(XREF_SYSTEM, "syntax_providers");

pub const OBJECT_MANAGERS: ExtensionPoint<dyn ObjectManager> =
    ExtensionPoint::new(XREF_SYSTEM, "object_managers");

/// Order in which orphaned objects are reported.
const ORPHAN_TYPES: [&str; 5] = [WIKI, TICKET, MILESTONE, REPORT, CHANGESET];

/// An explicit relation to record between two objects.
#[derive(Debug, Clone)]
pub struct Relation {
    pub source: ObjectRef,
    pub relation: String,
    pub target: ObjectRef,
    pub facet: String,
    pub context: String,
    pub time: DateTime<Utc>,
    pub author: String,
}

impl Relation {
    pub fn new(source: ObjectRef, relation: impl Into<String>, target: ObjectRef) -> Self {
        Relation {
            source,
            relation: relation.into(),
            target,
            facet: String::new(),
            context: String::new(),
            time: Utc::now(),
            author: String::new(),
        }
    }

    pub fn in_facet(mut self, facet: impl Into<String>, context: impl Into<String>) -> Self {
        self.facet = facet.into();
        self.context = context.into();
        self
    }

    pub fn by(mut self, author: impl Into<String>, time: DateTime<Utc>) -> Self {
        self.author = author.into();
        self.time = time;
        self
    }
}

/// Maintains the cross-reference graph from wiki text and explicit
/// relations.
pub struct XRefSystem {
    scanner: LinkScanner,
    managers: Vec<Arc<dyn ObjectManager>>,
}

impl XRefSystem {
    pub fn new(
        providers: &[Arc<dyn WikiSyntaxProvider>],
        managers: Vec<Arc<dyn ObjectManager>>,
    ) -> Result<Self> {
        Ok(XRefSystem {
            scanner: LinkScanner::new(providers)?,
            managers,
        })
    }

    /// Component descriptor resolving both extension points when the
    /// system is first activated.
    pub fn descriptor() -> ComponentDescriptor<XRefSystem> {
        ComponentDescriptor::new(XREF_SYSTEM, |manager: &ComponentManager| {
            let providers = manager.extensions(&SYNTAX_PROVIDERS)?;
            let managers = manager.extensions(&OBJECT_MANAGERS)?;
            XRefSystem::new(&providers, managers)
        })
    }

    pub fn scanner(&self) -> &LinkScanner {
        &self.scanner
    }

    pub fn object_managers(&self) -> &[Arc<dyn ObjectManager>] {
        &self.managers
    }

    /// The facet's text changed: drop its links and parse them again.
    /// A link already present with the same target, context and relation
    /// keeps its original time and author. Returns the number of links.
    ///
    /// A facet forcing a relation is rejected with
    /// [`TracError::CycleDetected`], leaving the graph untouched, when one
    /// of its targets already leads back to the source.
    pub fn update_links(&self, cnx: &mut XrefConnection, facet: &Facet) -> Result<usize> {
        let links = self.scanner.scan(&facet.text);
        cnx.read(|graph| check_cycles(graph, facet, &links))?;
        Ok(cnx.write(|graph| replace_facet_links(graph, facet, links)))
    }

    /// Replace the outgoing `relation` of the source with one to the
    /// target. Rejected with [`TracError::CycleDetected`] when the target
    /// already leads back to the source through that relation.
    pub fn update_relation(&self, cnx: &mut XrefConnection, relation: Relation) -> Result<()> {
        if relation.relation.is_empty() {
            return Err(TracError::generic("Cross-reference", "No relation specified"));
        }
        let back = cnx.read(|graph| {
            find_path(graph, &relation.target, &relation.source, &relation.relation)
        });
        if let Some(back) = back {
            return Err(cycle_error(&relation.source, &back));
        }
        debug!(
            "+ {} --[{}]--> {}",
            relation.source, relation.relation, relation.target
        );
        cnx.write(|graph| {
            graph.remove_relation(&relation.source, &relation.relation);
            graph.add_edge(XrefEdge {
                source: relation.source,
                facet: relation.facet,
                context: relation.context,
                time: relation.time,
                author: relation.author,
                relation: relation.relation,
                target: relation.target,
            });
        });
        Ok(())
    }

    /// Edges pointing at `obj`.
    pub fn find_backlinks(
        &self,
        cnx: &XrefConnection,
        obj: &ObjectRef,
        relation: &RelationFilter,
        facet: Option<&str>,
    ) -> Vec<XrefEdge> {
        cnx.read(|graph| filtered(graph.edges_to(obj), relation, facet))
    }

    /// Edges originating from `obj`.
    pub fn find_links(
        &self,
        cnx: &XrefConnection,
        obj: &ObjectRef,
        relation: &RelationFilter,
        facet: Option<&str>,
    ) -> Vec<XrefEdge> {
        cnx.read(|graph| filtered(graph.edges_from(obj), relation, facet))
    }

    pub fn count_backlinks(
        &self,
        cnx: &XrefConnection,
        obj: &ObjectRef,
        relation: &RelationFilter,
        facet: Option<&str>,
    ) -> usize {
        self.find_backlinks(cnx, obj, relation, facet).len()
    }

    pub fn count_links(
        &self,
        cnx: &XrefConnection,
        obj: &ObjectRef,
        relation: &RelationFilter,
        facet: Option<&str>,
    ) -> usize {
        self.find_links(cnx, obj, relation, facet).len()
    }

    /// Number of `relation` edges from `obj`, to `other` when given.
    pub fn has_relation(
        &self,
        cnx: &XrefConnection,
        obj: &ObjectRef,
        relation: &str,
        other: Option<&ObjectRef>,
    ) -> usize {
        cnx.read(|graph| {
            graph
                .edges_from(obj)
                .into_iter()
                .filter(|edge| edge.relation == relation)
                .filter(|edge| other.is_none_or(|other| &edge.target == other))
                .count()
        })
    }

    /// Remove the outgoing edges of `obj`, only those of `relation` when
    /// given.
    pub fn delete_links(
        &self,
        cnx: &mut XrefConnection,
        obj: &ObjectRef,
        relation: Option<&str>,
    ) -> usize {
        debug!("- {} --[{}]--> *", obj, relation.unwrap_or("*"));
        cnx.write(|graph| match relation {
            Some(relation) => graph.remove_relation(obj, relation),
            None => graph.remove_where(obj, |_| true),
        })
    }

    /// Objects reachable from `start` through `relation`, in depth-first
    /// order starting with `start` itself.
    pub fn get_dag(
        &self,
        cnx: &XrefConnection,
        start: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<ObjectRef>> {
        cnx.read(|graph| walk_dag(graph, start, relation))
    }

    /// Replay every facet of every object manager. Changesets are left
    /// alone unless `do_changesets` is set. Every outgoing edge of the
    /// replayed object types is dropped first, so links from removed
    /// facets or objects do not survive. A facet whose relation would
    /// close a cycle is skipped. Returns the number of links.
    pub fn rebuild_cross_references(
        &self,
        cnx: &mut XrefConnection,
        do_changesets: bool,
    ) -> Result<usize> {
        let mut facets = Vec::new();
        let mut replayed: HashSet<&'static str> = HashSet::new();
        for manager in &self.managers {
            if !do_changesets && manager.object_types().contains(&CHANGESET) {
                continue;
            }
            replayed.extend(manager.object_types());
            facets.extend(manager.facets()?);
        }
        let parsed: Vec<(Facet, Vec<ScannedLink>)> = facets
            .into_par_iter()
            .map(|facet| {
                let links = self.scanner.scan(&facet.text);
                (facet, links)
            })
            .collect();

        let total = cnx.write(|graph| {
            let stale: HashSet<ObjectRef> = graph
                .all_edges()
                .filter(|edge| replayed.contains(edge.source.kind.as_str()))
                .map(|edge| edge.source.clone())
                .collect();
            for source in &stale {
                graph.remove_where(source, |_| true);
            }
            let mut total = 0;
            for (facet, links) in parsed {
                if let Err(e) = check_cycles(graph, &facet, &links) {
                    warn!("Skipping {} of {}: {}", facet.name, facet.source, e);
                    continue;
                }
                total += replace_facet_links(graph, &facet, links);
            }
            total
        });
        cnx.commit()?;
        info!("Rebuilt {} cross-references", total);
        Ok(total)
    }

    /// Objects nobody links to, wiki pages first, then tickets,
    /// milestones, reports and changesets.
    pub fn find_orphaned_objects(&self, cnx: &XrefConnection) -> Result<Vec<ObjectRef>> {
        let mut by_type: HashMap<String, Vec<ObjectRef>> = HashMap::new();
        for manager in &self.managers {
            for obj in manager.objects()? {
                by_type.entry(obj.kind.clone()).or_default().push(obj);
            }
        }
        Ok(cnx.read(|graph| {
            ORPHAN_TYPES
                .iter()
                .flat_map(|kind| by_type.remove(*kind).unwrap_or_default())
                .filter(|obj| !graph.has_incoming(obj))
                .collect()
        }))
    }

    /// Wiki pages that are linked to but do not exist, with the objects
    /// linking to them.
    pub fn find_missing_links(&self, cnx: &XrefConnection) -> Result<Vec<MissingLink>> {
        let mut referenced: BTreeMap<ObjectRef, Vec<ObjectRef>> = BTreeMap::new();
        cnx.read(|graph| {
            for edge in graph.all_edges().filter(|edge| edge.target.kind == WIKI) {
                let sources = referenced.entry(edge.target.clone()).or_default();
                if !sources.contains(&edge.source) {
                    sources.push(edge.source.clone());
                }
            }
        });
        let mut missing = Vec::new();
        for (target, mut sources) in referenced {
            if !self.exists(&target)? {
                sources.sort();
                missing.push(MissingLink { target, sources });
            }
        }
        Ok(missing)
    }

    /// Whether some object manager knows the object.
    pub fn exists(&self, obj: &ObjectRef) -> Result<bool> {
        for manager in &self.managers {
            if manager.object_types().contains(&obj.kind.as_str()) && manager.exists(obj)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn filtered(edges: Vec<&XrefEdge>, relation: &RelationFilter, facet: Option<&str>) -> Vec<XrefEdge> {
    edges
        .into_iter()
        .filter(|edge| relation.matches(&edge.relation))
        .filter(|edge| facet.is_none_or(|facet| edge.facet == facet))
        .cloned()
        .collect()
}

fn cycle_error(source: &ObjectRef, back: &[ObjectRef]) -> TracError {
    let mut path = vec![source.shortname()];
    path.extend(back.iter().map(ObjectRef::shortname));
    TracError::CycleDetected { path }
}

/// Fails when a relation forced by `facet` would close a cycle.
fn check_cycles(graph: &XrefGraph, facet: &Facet, links: &[ScannedLink]) -> Result<()> {
    if facet.relation.is_empty() {
        return Ok(());
    }
    for link in links {
        if let Some(back) = find_path(graph, &link.target, &facet.source, &facet.relation) {
            return Err(cycle_error(&facet.source, &back));
        }
    }
    Ok(())
}

fn replace_facet_links(graph: &mut XrefGraph, facet: &Facet, links: Vec<ScannedLink>) -> usize {
    let previous: HashMap<(ObjectRef, String, String), (DateTime<Utc>, String)> = graph
        .edges_from(&facet.source)
        .into_iter()
        .filter(|edge| edge.facet == facet.name)
        .map(|edge| {
            (
                (edge.target.clone(), edge.context.clone(), edge.relation.clone()),
                (edge.time, edge.author.clone()),
            )
        })
        .collect();
    graph.remove_facet(&facet.source, &facet.name);

    let count = links.len();
    for link in links {
        let key = (link.target, link.context, facet.relation.clone());
        let (time, author) = previous
            .get(&key)
            .cloned()
            .unwrap_or_else(|| (facet.time, facet.author.clone()));
        let (target, context, relation) = key;
        graph.add_edge(XrefEdge {
            source: facet.source.clone(),
            facet: facet.name.clone(),
            context,
            time,
            author,
            relation,
            target,
        });
    }
    count
}

/// Depth-first path from `from` to `to` along `relation` edges,
/// including both ends.
fn find_path(
    graph: &XrefGraph,
    from: &ObjectRef,
    to: &ObjectRef,
    relation: &str,
) -> Option<Vec<ObjectRef>> {
    let mut visited = HashSet::new();
    let mut path = vec![from.clone()];
    if search(graph, to, relation, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn search(
    graph: &XrefGraph,
    to: &ObjectRef,
    relation: &str,
    visited: &mut HashSet<ObjectRef>,
    path: &mut Vec<ObjectRef>,
) -> bool {
    let Some(current) = path.last().cloned() else {
        return false;
    };
    if &current == to {
        return true;
    }
    if !visited.insert(current.clone()) {
        return false;
    }
    for next in graph.targets(&current, relation) {
        path.push(next.clone());
        if search(graph, to, relation, visited, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn walk_dag(graph: &XrefGraph, start: &ObjectRef, relation: &str) -> Result<Vec<ObjectRef>> {
    let mut order = vec![start.clone()];
    let mut visited = HashSet::from([start.clone()]);
    let mut path = vec![start.clone()];
    walk(graph, relation, &mut visited, &mut order, &mut path)?;
    Ok(order)
}

/// Extend the walk from the last object of `path`, whose first object
/// is the start of the walk.
fn walk(
    graph: &XrefGraph,
    relation: &str,
    visited: &mut HashSet<ObjectRef>,
    order: &mut Vec<ObjectRef>,
    path: &mut Vec<ObjectRef>,
) -> Result<()> {
    let (Some(start), Some(current)) = (path.first().cloned(), path.last().cloned()) else {
        return Ok(());
    };
    for next in graph.targets(&current, relation) {
        if *next == start {
            let mut cycle: Vec<String> = path.iter().map(ObjectRef::shortname).collect();
            cycle.push(start.shortname());
            return Err(TracError::CycleDetected { path: cycle });
        }
        if !visited.insert(next.clone()) {
            continue;
        }
        order.push(next.clone());
        path.push(next.clone());
        walk(graph, relation, visited, order, path)?;
        path.pop();
    }
    Ok(())
}
