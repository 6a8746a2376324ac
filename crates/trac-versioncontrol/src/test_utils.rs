//! Test utilities for the version control crate

use std::sync::Arc;

use crate::memory::{MemoryRepository, RepositoryBuilder};
use crate::repository::Repository;

/// Five revisions touching a trunk and a branch:
///
/// 1. import `a.txt`, `b.bin` and `README` under `/trunk`
/// 2. edit `a.txt`, set a property on `README`
/// 3. edit the binary, rewrite `README` with the same text
/// 4. branch `/trunk` to `/branches/stable`
/// 5. delete `/trunk/README`, add `/trunk/c.txt`
pub fn sample_repository() -> MemoryRepository {
    RepositoryBuilder::new("sample")
        .revision("alice", "Initial import", |tx| {
            tx.add_file("/trunk/a.txt", "one\ntwo\nthree\n")
                .add_file("/trunk/b.bin", b"\x00\x01\x02")
                .add_file("/trunk/README", "readme\n");
        })
        .revision("bob", "Fix #1", |tx| {
            tx.edit_file("/trunk/a.txt", "one\n2\nthree\n")
                .set_property("/trunk/README", "svn:keywords", "Id");
        })
        .revision("bob", "Touch files", |tx| {
            tx.edit_file("/trunk/b.bin", b"\x00\x03")
                .edit_file("/trunk/README", "readme\n");
        })
        .revision("carol", "Branch stable", |tx| {
            tx.copy("/trunk", None, "/branches/stable");
        })
        .revision("dave", "Replace README", |tx| {
            tx.delete("/trunk/README").add_file("/trunk/c.txt", "see a.txt\n");
        })
        .build()
        .unwrap()
}

pub fn shared_sample() -> Arc<dyn Repository> {
    Arc::new(sample_repository())
}

/// A repository with `count` revisions, each editing `/log.txt`.
pub fn long_history(count: u64) -> Arc<dyn Repository> {
    let mut builder = RepositoryBuilder::new("long").revision("alice", "start", |tx| {
        tx.add_file("/log.txt", "0\n");
    });
    for rev in 2..=count {
        builder = builder.revision("alice", &format!("entry {}", rev), |tx| {
            tx.edit_file("/log.txt", format!("{}\n", rev));
        });
    }
    Arc::new(builder.build().unwrap())
}
