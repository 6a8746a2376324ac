//! CLI command implementations

use std::io::Write;
use std::path::{Path, PathBuf};

use trac_core::Config;
use trac_versioncontrol::{ChangesetQuery, DiffOptions, Rev};
use trac_web::{Environment, ServerConfig, TracServer};
use trac_xref::{ObjectRef, RelationFilter};

fn open_env(env_dir: &Path) -> anyhow::Result<Environment> {
    Ok(Environment::open(env_dir)?)
}

pub async fn serve(env_dir: PathBuf, host: String, port: u16, open: bool) -> anyhow::Result<()> {
    tracing::info!("Starting Trac server on {}:{}", host, port);

    let env = tokio::task::spawn_blocking(move || -> anyhow::Result<Environment> {
        let env = open_env(&env_dir)?;
        let added = env.sync()?;
        tracing::info!("Revision cache holds {} new revision(s)", added);
        Ok(env)
    })
    .await??;

    let server = TracServer::new(env, ServerConfig { host, port });
    if open {
        let url = server.url();
        if let Err(e) = open::that(&url) {
            tracing::warn!("Cannot open browser at {}: {}", url, e);
        }
    }
    server.start().await
}

pub fn sync(env_dir: PathBuf) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let added = env.sync()?;
    println!("{} revision(s) added to the cache", added);
    Ok(())
}

pub fn diff(
    env_dir: PathBuf,
    old_path: String,
    old_rev: String,
    new_path: String,
    new_rev: String,
) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let engine = env.changeset_engine()?;
    let plan = engine.prepare(&ChangesetQuery {
        old_path: Some(old_path),
        old: Some(old_rev),
        new_path: Some(new_path),
        new: Some(new_rev),
    })?;
    let options = DiffOptions {
        tab_width: env.config().diff.tab_width,
        ..DiffOptions::default()
    };
    let body = engine.render_unified(&plan, &options)?;
    std::io::stdout().lock().write_all(&body)?;
    Ok(())
}

pub fn changeset(env_dir: PathBuf, rev: String) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let repos = env.repository();
    let rev: Rev = repos.normalize_rev(Some(&rev))?;
    let changeset = repos.get_changeset(rev)?;

    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "Changeset {} by {} on {}",
        changeset.rev,
        changeset.author,
        changeset.date.to_rfc3339()
    )?;
    for (name, value) in &changeset.properties {
        writeln!(out, "  {}: {}", name, value)?;
    }
    writeln!(out)?;
    for line in changeset.message.lines() {
        writeln!(out, "    {}", line)?;
    }
    writeln!(out)?;
    for change in &changeset.changes {
        match (&change.base_path, change.base_rev) {
            (Some(base), Some(base_rev)) if change.change.is_diff_change() && base != &change.path => {
                writeln!(
                    out,
                    "  {:<6} {:<4} {} (from {}@{})",
                    change.change.to_string(),
                    change.kind.to_string(),
                    change.path,
                    base,
                    base_rev
                )?;
            }
            _ => writeln!(
                out,
                "  {:<6} {:<4} {}",
                change.change.to_string(),
                change.kind.to_string(),
                change.path
            )?,
        }
    }
    Ok(())
}

pub fn xref_rebuild(env_dir: PathBuf, changesets: bool) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let xref = env.xref()?;
    let total = {
        let cnx = env.xref_cnx()?;
        let mut guard = cnx.lock();
        xref.rebuild_cross_references(&mut guard, changesets)?
    };
    env.save_xref()?;
    println!("{} cross-reference(s) recorded", total);
    Ok(())
}

pub fn xref_links(env_dir: PathBuf, kind: String, id: String, back: bool) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let xref = env.xref()?;
    let obj = ObjectRef::new(kind, id);
    let edges = {
        let cnx = env.xref_cnx()?;
        let guard = cnx.lock();
        if back {
            xref.find_backlinks(&guard, &obj, &RelationFilter::Any, None)
        } else {
            xref.find_links(&guard, &obj, &RelationFilter::Any, None)
        }
    };
    for edge in edges {
        let other = if back { &edge.source } else { &edge.target };
        let relation = if edge.is_relation() { edge.relation.as_str() } else { "-" };
        println!("{}\t{}\t{}\t{}", other, relation, edge.facet, edge.context);
    }
    Ok(())
}

pub fn xref_orphans(env_dir: PathBuf) -> anyhow::Result<()> {
    let env = open_env(&env_dir)?;
    let xref = env.xref()?;
    let (orphans, missing) = {
        let cnx = env.xref_cnx()?;
        let guard = cnx.lock();
        (xref.find_orphaned_objects(&guard)?, xref.find_missing_links(&guard)?)
    };
    println!("Orphaned objects:");
    for obj in orphans {
        println!("  {}", obj);
    }
    println!("Missing pages:");
    for link in missing {
        let sources: Vec<String> = link.sources.iter().map(ObjectRef::shortname).collect();
        println!("  {} <- {}", link.target.id, sources.join(", "));
    }
    Ok(())
}

/// Write a default `trac.toml` unless one exists.
pub fn init(env_dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&env_dir)?;
    let path = env_dir.join(trac_core::CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, Config::default().to_toml()?)?;
    println!("Wrote {}", path.display());
    Ok(())
}
