//! Trac Version Control: repository model, backends and the changeset engine

pub mod cache;
pub mod changeset;
pub mod diff;
pub mod memory;
pub mod mimeview;
pub mod model;
pub mod repository;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use cache::{CacheDatabase, CacheTables, CachedRepository, RevisionRow};
pub use changeset::{
    BROWSER_VIEW, CHANGESET_VIEW, ChangeEntry, ChangesetEngine, ChangesetQuery, ChangesetView,
    DiffLimits, DiffPlan, FILE_VIEW, NavLink, NodeInfo, PropChange, changeset_href,
};
pub use diff::{
    Block, BlockKind, BlockSide, DiffOptions, DiffPreferences, DiffStyle, Hunk, diff_blocks,
    get_diff_options, unified_diff,
};
pub use memory::{DumpOp, DumpRevision, MemoryRepository, RepositoryBuilder, RepositoryDump};
pub use mimeview::Mimeview;
pub use model::{
    ChangeKind, Changeset, ChangesetProperty, DIFF_CHANGES, Delta, DiffArgs, Node, NodeChange,
    NodeKind, Rev, encode_path, normalize_path,
};
pub use repository::Repository;
