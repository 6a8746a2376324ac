//! Integration tests for Trac
//!
//! These tests build an environment directory on disk and drive it through
//! the library crates and the `trac` binary.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;
use trac_core::CONFIG_FILE;
use trac_versioncontrol::{ChangesetQuery, DiffOptions};
use trac_web::{Environment, Request, RequestDispatcher, XREF_FILE};
use trac_xref::objects::{ContentStore, Ticket, WikiPage};
use trac_xref::{ObjectRef, RelationFilter};

const DUMP: &str = r#"{
  "name": "project",
  "revisions": [
    {"author": "alice", "message": "Initial import, see WikiStart",
     "ops": [
       {"action": "add_dir", "path": "/trunk"},
       {"action": "add_file", "path": "/trunk/a.txt", "content": "one\ntwo\nthree\n"}
     ]},
    {"author": "bob", "message": "Fixes #1",
     "ops": [{"action": "edit_file", "path": "/trunk/a.txt", "content": "one\n2\nthree\n"}]}
  ]
}"#;

fn setup_env() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("repository.json"), DUMP).unwrap();
    let content = ContentStore {
        wiki: vec![WikiPage {
            name: "WikiStart".to_string(),
            text: "Start here, then read #1".to_string(),
            ..WikiPage::default()
        }],
        tickets: vec![Ticket {
            id: 1,
            summary: "Wrong number".to_string(),
            description: "Line two of a.txt".to_string(),
            ..Ticket::default()
        }],
        ..ContentStore::default()
    };
    content.save(&dir.path().join("objects.json")).unwrap();
    dir
}

fn trac(env_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trac"))
        .arg("--env")
        .arg(env_dir)
        .args(args)
        .env_remove("TRAC_LOG")
        .output()
        .expect("failed to run trac")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "trac failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ── Library ─────────────────────────────────────────────

#[test]
fn test_environment_serves_changesets() {
    let dir = setup_env();
    let env = Environment::open(dir.path()).unwrap();
    assert_eq!(env.sync().unwrap(), 3);
    assert_eq!(env.sync().unwrap(), 0);

    let req = Request::get("/changeset/2").with_perm(env.anonymous_permissions());
    let res = RequestDispatcher::new(&env).dispatch(req).unwrap();
    assert_eq!(res.status, 200);
    let page: Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(page["template"], "changeset.html");
    assert_eq!(page["data"]["title"], "Changeset 2");
}

#[test]
fn test_unified_diff_between_revisions() {
    let dir = setup_env();
    let env = Environment::open(dir.path()).unwrap();
    let engine = env.changeset_engine().unwrap();
    let plan = engine
        .prepare(&ChangesetQuery {
            old_path: Some("/trunk/a.txt".to_string()),
            old: Some("1".to_string()),
            new_path: Some("/trunk/a.txt".to_string()),
            new: Some("2".to_string()),
        })
        .unwrap();
    let body = String::from_utf8(engine.render_unified(&plan, &DiffOptions::default()).unwrap()).unwrap();
    assert!(body.starts_with("Index: /trunk/a.txt\r\n"));
    assert!(body.contains("--- /trunk/a.txt (revision 1)\r\n"));
    assert!(body.contains("+++ /trunk/a.txt (revision 2)\r\n"));
    assert!(body.contains("\r\n-two\r\n+2\r\n"));
}

#[test]
fn test_cross_references_survive_reopen() {
    let dir = setup_env();
    let recorded = {
        let env = Environment::open(dir.path()).unwrap();
        let xref = env.xref().unwrap();
        let total = {
            let cnx = env.xref_cnx().unwrap();
            let mut guard = cnx.lock();
            xref.rebuild_cross_references(&mut guard, true).unwrap()
        };
        env.save_xref().unwrap();
        total
    };
    assert!(dir.path().join(XREF_FILE).exists());
    assert_eq!(recorded, 3);

    let env = Environment::open(dir.path()).unwrap();
    let xref = env.xref().unwrap();
    let cnx = env.xref_cnx().unwrap();
    let guard = cnx.lock();
    let backlinks = xref.find_backlinks(
        &guard,
        &ObjectRef::new("ticket", "1"),
        &RelationFilter::Any,
        None,
    );
    let mut sources: Vec<String> = backlinks.iter().map(|edge| edge.source.shortname()).collect();
    sources.sort();
    assert_eq!(sources, vec!["[2]", "wiki:WikiStart"]);
}

// ── CLI ─────────────────────────────────────────────────

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(&trac(dir.path(), &["version"]));
    assert!(out.starts_with("Trac v"));
}

#[test]
fn test_cli_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    stdout(&trac(dir.path(), &["init"]));
    let written = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
    assert!(written.contains("[web]"));

    let again = trac(dir.path(), &["init"]);
    assert!(!again.status.success());
}

#[test]
fn test_cli_sync_and_diff() {
    let dir = setup_env();
    let out = stdout(&trac(dir.path(), &["sync"]));
    assert_eq!(out.trim(), "3 revision(s) added to the cache");

    let out = stdout(&trac(
        dir.path(),
        &["diff", "/trunk/a.txt", "1", "/trunk/a.txt", "2"],
    ));
    assert!(out.contains("-two\r\n+2\r\n"));
}

#[test]
fn test_cli_changeset_summary() {
    let dir = setup_env();
    let out = stdout(&trac(dir.path(), &["changeset", "1"]));
    assert!(out.starts_with("Changeset 1 by alice"));
    assert!(out.contains("    Initial import, see WikiStart"));
    assert!(out.contains("/trunk/a.txt"));
}

#[test]
fn test_cli_xref_round_trip() {
    let dir = setup_env();
    let out = stdout(&trac(dir.path(), &["xref", "rebuild"]));
    assert_eq!(out.trim(), "3 cross-reference(s) recorded");

    let out = stdout(&trac(dir.path(), &["xref", "links", "wiki", "WikiStart", "--back"]));
    assert!(out.starts_with("changeset:1\t-\t"));

    let out = stdout(&trac(dir.path(), &["xref", "orphans"]));
    assert!(out.starts_with("Orphaned objects:\n"));
    assert!(!out.contains("wiki:WikiStart"));
}
