//! Trac cross-references: links between wiki pages, tickets, changesets
//! and other objects, found in wiki text or recorded as relations

pub mod graph;
pub mod model;
pub mod objects;
pub mod providers;
pub mod syntax;
pub mod system;


pub use graph::{XrefConnection, XrefDatabase, XrefGraph};
pub use model::{Facet, MissingLink, ObjectRef, RelationFilter, XrefEdge};
pub use objects::{
    ChangesetObjects, ContentObjects, ContentStore, INDEX_UPDATE_INTERVAL, ObjectManager,
    WikiPageIndex,
};
pub use syntax::{
    LinkResolver, LinkScanner, PAGE_NAME_RULE, ScannedLink, SyntaxRule, WikiSyntaxProvider,
};
pub use system::{
    OBJECT_MANAGERS, Relation, SYNTAX_PROVIDERS, XREF_SYSTEM, XREF_VIEW, XRefSystem,
};

use trac_core::{ComponentRegistry, Result};

/// Register the cross-reference system and the built-in syntax
/// providers. Object managers depend on environment resources and are
/// registered by the environment.
pub fn register_components(registry: &ComponentRegistry) -> Result<()> {
    providers::register(registry)?;
    registry.register(XRefSystem::descriptor())
}
