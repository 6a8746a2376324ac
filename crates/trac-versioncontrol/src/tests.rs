//! Unit tests for the changeset engine

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use trac_core::{ConnectionPool, PermissionSet};

use crate::test_utils::{long_history, shared_sample};
use crate::*;

fn query(pairs: &[(&str, &str)]) -> ChangesetQuery {
    let args: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ChangesetQuery::from_args(&args)
}

fn all_perms() -> PermissionSet {
    [CHANGESET_VIEW, BROWSER_VIEW, FILE_VIEW].into_iter().collect()
}

fn engine() -> ChangesetEngine {
    ChangesetEngine::new(shared_sample())
}

#[test]
fn test_changeset_mode_uses_previous_revision() {
    let engine = ChangesetEngine::new(long_history(42));
    let plan = engine.prepare(&query(&[("new", "42")])).unwrap();
    assert!(plan.chgset);
    assert!(!plan.restricted);
    assert_eq!(
        plan.args,
        DiffArgs {
            old_path: "/".to_string(),
            old_rev: Some(41),
            new_path: "/".to_string(),
            new_rev: 42,
        }
    );
    assert_eq!(engine.title(&plan), "Changeset 42");
    assert_eq!(engine.filename(&plan), "changeset_r42");
}

#[test]
fn test_restricted_changeset() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[("new", "2"), ("new_path", "trunk")]))
        .unwrap();
    assert!(plan.chgset && plan.restricted);
    assert_eq!(plan.args.old_path, "/trunk");
    assert_eq!(plan.args.old_rev, Some(1));
    assert_eq!(engine.title(&plan), "Changeset 2 for /trunk");
    assert_eq!(engine.filename(&plan), "changeset_trunk_r2");
}

#[test]
fn test_same_path_diff_is_restricted() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[
            ("old", "2"),
            ("new", "5"),
            ("new_path", "/trunk/a.txt"),
        ]))
        .unwrap();
    assert!(!plan.chgset);
    assert!(plan.restricted);
    assert_eq!(engine.title(&plan), "Diff r2:5 for /trunk/a.txt");
    assert_eq!(engine.filename(&plan), "diff-trunk_a.txt-from-r2-to-r5");
}

#[test]
fn test_path_at_rev_arguments() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[
            ("old", "/branches/stable/a.txt@4"),
            ("new", "/trunk/a.txt@5"),
        ]))
        .unwrap();
    assert!(!plan.chgset && !plan.restricted);
    assert_eq!(
        engine.title(&plan),
        "Diff from /branches/stable/a.txt@4 to /trunk/a.txt@5"
    );
    assert_eq!(
        engine.filename(&plan),
        "diff-from-branches_stable_a.txt-r4-to-trunk_a.txt-r5"
    );

    let plan = engine
        .prepare(&query(&[
            ("old_path", "/"),
            ("old", "1"),
            ("new_path", "/trunk"),
            ("new", "5"),
        ]))
        .unwrap();
    assert_eq!(engine.filename(&plan), "trunk-r1");
}

#[test]
fn test_equal_pairs_collapse_to_changeset() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[
            ("old_path", "/trunk/a.txt"),
            ("old", "2"),
            ("new_path", "/trunk/a.txt"),
            ("new", "2"),
        ]))
        .unwrap();
    assert!(plan.chgset);
    assert_eq!(engine.title(&plan), "Changeset 2 for /trunk/a.txt");
}

#[test]
fn test_unknown_revision_is_not_found() {
    let err = engine().prepare(&query(&[("new", "99")])).unwrap_err();
    assert_eq!(err.status(), 404);
}

#[test]
fn test_unified_diff_output() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[("new", "2"), ("new_path", "/trunk/a.txt")]))
        .unwrap();
    let body = engine.render_unified(&plan, &DiffOptions::default()).unwrap();
    let expected = format!(
        "Index: /trunk/a.txt\r\n{}\r\n\
         --- /trunk/a.txt (revision 1)\r\n\
         +++ /trunk/a.txt (revision 2)\r\n\
         @@ -1,3 +1,3 @@\r\n one\r\n-two\r\n+2\r\n three\r\n",
        "=".repeat(67)
    );
    assert_eq!(String::from_utf8(body).unwrap(), expected);
}

#[test]
fn test_unified_diff_adds_and_deletes() {
    let engine = engine();
    let plan = engine.prepare(&query(&[("new", "5")])).unwrap();
    let body = String::from_utf8(engine.render_unified(&plan, &DiffOptions::default()).unwrap())
        .unwrap();
    assert!(body.contains("Index: /trunk/README\r\n"));
    assert!(body.contains("+++  (revision )\r\n"));
    assert!(body.contains("--- /trunk/c.txt (revision 5)\r\n+++ /trunk/c.txt (revision 5)\r\n"));
    assert!(!body.contains("b.bin"));
}

#[test]
fn test_unified_diff_reroots_deleted_paths() {
    let engine = engine();
    let plan = engine
        .prepare(&query(&[
            ("old_path", "/branches/stable"),
            ("old", "4"),
            ("new_path", "/trunk"),
            ("new", "5"),
        ]))
        .unwrap();
    let body = String::from_utf8(engine.render_unified(&plan, &DiffOptions::default()).unwrap())
        .unwrap();
    assert!(body.contains("Index: /trunk/README\r\n"));
    assert!(body.contains("--- /branches/stable/README (revision 4)\r\n"));
    assert!(!body.contains("a.txt"));
}

#[test]
fn test_zip_contains_new_files_only() {
    let engine = engine();
    let plan = engine.prepare(&query(&[("new", "5")])).unwrap();
    let bytes = engine.render_zip(&plan).unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive.by_index(0).unwrap().name(), "trunk/c.txt");

    // r3 edits b.bin and README; only the text file is archived
    let plan = engine.prepare(&query(&[("new", "3")])).unwrap();
    let bytes = engine.render_zip(&plan).unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert_eq!(names, vec!["trunk/README"]);
}

#[test]
fn test_content_changes_binary_and_equal() {
    let engine = engine();
    let repos = engine.repository();
    let old_bin = repos.get_node("/trunk/b.bin", Some(2)).unwrap();
    let new_bin = repos.get_node("/trunk/b.bin", Some(3)).unwrap();
    assert_eq!(
        engine.content_changes(&old_bin, &new_bin, &DiffOptions::default()),
        None
    );

    let old = repos.get_node("/trunk/README", Some(2)).unwrap();
    let new = repos.get_node("/trunk/README", Some(3)).unwrap();
    assert_eq!(
        engine.content_changes(&old, &new, &DiffOptions::default()),
        Some(Vec::new())
    );
}

#[test]
fn test_render_changes_with_diffs() {
    let engine = engine();
    let plan = engine.prepare(&query(&[("new", "2")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();

    assert!(view.show_diffs && view.has_diffs);
    assert_eq!(view.changeset.as_ref().map(|c| c.author.as_str()), Some("bob"));
    assert_eq!(view.changes.len(), 2);

    let a = view.changes[0].as_ref().unwrap();
    assert_eq!(a.new.as_ref().unwrap().path, "/trunk/a.txt");
    assert!(a.diffs.as_ref().is_some_and(|h| !h.is_empty()));

    let readme = view.changes[1].as_ref().unwrap();
    assert_eq!(
        readme.props,
        vec![PropChange {
            name: "svn:keywords".to_string(),
            old: None,
            new: Some("Id".to_string()),
        }]
    );
    assert_eq!(readme.diff_href, None);
}

#[test]
fn test_hidden_properties_are_dropped() {
    let engine = engine()
        .with_hidden_properties(&["svn:*".to_string()])
        .unwrap();
    let plan = engine.prepare(&query(&[("new", "2")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();
    assert!(view.changes[1].is_none());
}

#[test]
fn test_unchanged_edits_are_hidden() {
    let engine = engine();
    let plan = engine.prepare(&query(&[("new", "3")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();

    let binary = view.changes[0].as_ref().unwrap();
    assert_eq!(binary.diffs, None);
    assert!(view.changes[1].is_none());
    assert!(!view.has_diffs);
}

#[test]
fn test_diff_limits_link_to_diffs() {
    let engine = engine().with_limits(DiffLimits {
        max_diff_files: 1,
        max_diff_bytes: 0,
    });
    let plan = engine.prepare(&query(&[("new", "3")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();

    assert!(!view.show_diffs);
    let hrefs: Vec<_> = view
        .changes
        .iter()
        .map(|c| c.as_ref().and_then(|c| c.diff_href.clone()))
        .collect();
    assert_eq!(
        hrefs,
        vec![
            Some("/changeset/3/trunk/b.bin".to_string()),
            Some("/changeset/3/trunk/README".to_string()),
        ]
    );
}

#[test]
fn test_permissions_limit_the_view() {
    let engine = engine();
    let plan = engine.prepare(&query(&[("new", "2")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());

    let browse_only: PermissionSet = [CHANGESET_VIEW, BROWSER_VIEW].into_iter().collect();
    let view = engine.render_changes(&plan, &prefs, &browse_only).unwrap();
    assert!(!view.show_diffs);
    assert!(view.changes.iter().all(|c| c.as_ref().is_some_and(|c| c.props.is_empty())));

    let summary_only: PermissionSet = [CHANGESET_VIEW].into_iter().collect();
    let view = engine.render_changes(&plan, &prefs, &summary_only).unwrap();
    assert!(view.changes.is_empty());
    assert_eq!(view.title, "Changeset 2");
}

#[test]
fn test_navigation_links() {
    let engine = engine();
    let prefs = get_diff_options(&BTreeMap::new());

    let plan = engine.prepare(&query(&[("new", "2")])).unwrap();
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();
    let links: Vec<_> = view
        .links
        .iter()
        .map(|l| (l.rel.as_str(), l.href.as_str()))
        .collect();
    assert_eq!(
        links,
        vec![
            ("first", "/changeset/0"),
            ("prev", "/changeset/1"),
            ("last", "/changeset/5"),
            ("next", "/changeset/3"),
        ]
    );

    let plan = engine
        .prepare(&query(&[("new", "2"), ("new_path", "/trunk/a.txt")]))
        .unwrap();
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();
    assert_eq!(view.links.len(), 1);
    assert_eq!(view.links[0].href, "/changeset/1/trunk/a.txt");
    assert_eq!(view.links[0].title, "Changeset 1 for /trunk/a.txt");
}

#[test]
fn test_engine_over_cached_repository() {
    let cached = CachedRepository::new(
        shared_sample(),
        ConnectionPool::new(1, CacheDatabase::default()),
        None,
    );
    let engine = ChangesetEngine::new(Arc::new(cached));
    let plan = engine.prepare(&query(&[("new", "4")])).unwrap();
    let prefs = get_diff_options(&BTreeMap::new());
    let view = engine.render_changes(&plan, &prefs, &all_perms()).unwrap();
    assert_eq!(view.changeset.unwrap().message, "Branch stable");
    let kinds: Vec<_> = view
        .changes
        .iter()
        .flatten()
        .map(|c| (c.change, c.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (ChangeKind::Add, NodeKind::Directory),
            (ChangeKind::Copy, NodeKind::Directory),
        ]
    );
}

#[test]
fn test_changeset_href_encodes_paths() {
    assert_eq!(changeset_href(2, None, None), "/changeset/2");
    assert_eq!(
        changeset_href(3, Some("/a b"), Some((1, "/x&y"))),
        "/changeset/3/a%20b?old=1&old_path=/x%26y"
    );
    let href = changeset_href(4, Some("/trunk/é.txt"), None);
    assert_eq!(href, "/changeset/4/trunk/%C3%A9.txt");
    assert_eq!(urlencoding::decode(&href).unwrap(), "/changeset/4/trunk/é.txt");
}
