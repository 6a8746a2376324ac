//! Changeset and arbitrary diff rendering
//!
//! A request names up to two path@rev pairs. When both pairs are the same
//! (or the old one is omitted) the engine shows a revision's changeset,
//! optionally restricted to a path. Any other combination is an arbitrary
//! diff between the two trees.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

use chrono::{Datelike, Timelike};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::debug;
use trac_core::{Config, PermissionSet, Result, TracError};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::diff::{DiffOptions, DiffPreferences, Hunk, diff_blocks, unified_diff};
use crate::mimeview::Mimeview;
use crate::model::{
    ChangeKind, Changeset, ChangesetProperty, Delta, DiffArgs, Node, NodeKind, Rev, encode_path,
    join_path, relative_to,
};
use crate::repository::Repository;

pub const CHANGESET_VIEW: &str = "CHANGESET_VIEW";
pub const FILE_VIEW: &str = "FILE_VIEW";
pub const BROWSER_VIEW: &str = "BROWSER_VIEW";

/// Raw path@rev arguments of a changeset or diff request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetQuery {
    pub old_path: Option<String>,
    pub old: Option<String>,
    pub new_path: Option<String>,
    pub new: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl ChangesetQuery {
    /// Read `old_path`, `old`, `new_path` and `new`. An `old` or `new`
    /// value of the form `path@rev` sets both the path and the revision.
    pub fn from_args(args: &BTreeMap<String, String>) -> Self {
        let mut query = ChangesetQuery {
            old_path: non_empty(args.get("old_path")),
            old: non_empty(args.get("old")),
            new_path: non_empty(args.get("new_path")),
            new: non_empty(args.get("new")),
        };
        let split = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|v| v.rsplit_once('@'))
                .map(|(path, rev)| (path.to_string(), rev.to_string()))
        };
        if let Some((path, rev)) = split(&query.old) {
            query.old_path = Some(path);
            query.old = Some(rev).filter(|r| !r.is_empty());
        }
        if let Some((path, rev)) = split(&query.new) {
            query.new_path = Some(path);
            query.new = Some(rev).filter(|r| !r.is_empty());
        }
        query
    }
}

/// What is compared, after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPlan {
    /// Showing a single revision's changeset.
    pub chgset: bool,
    /// Changeset mode: only changes at, above or below `new_path`.
    /// Diff mode: both sides are the same path.
    pub restricted: bool,
    pub args: DiffArgs,
}

/// Size limits for showing diffs inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffLimits {
    /// 0 disables the limit.
    pub max_diff_files: usize,
    /// 0 disables the limit.
    pub max_diff_bytes: u64,
}

impl Default for DiffLimits {
    fn default() -> Self {
        DiffLimits {
            max_diff_files: 0,
            max_diff_bytes: 10_000_000,
        }
    }
}

/// A property that differs between both sides of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropChange {
    pub name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub path: String,
    pub rev: Rev,
    pub shortrev: String,
    pub href: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub change: ChangeKind,
    pub kind: NodeKind,
    pub old: Option<NodeInfo>,
    pub new: Option<NodeInfo>,
    pub props: Vec<PropChange>,
    /// `None` when the files cannot be compared.
    pub diffs: Option<Vec<Hunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_href: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavLink {
    pub rel: String,
    pub href: String,
    pub title: String,
}

/// Everything the changeset template shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangesetView {
    pub title: String,
    pub chgset: bool,
    pub restricted: bool,
    pub old_path: String,
    pub old_rev: Option<Rev>,
    pub new_path: String,
    pub new_rev: Rev,
    pub changeset: Option<Changeset>,
    pub changeset_properties: Vec<ChangesetProperty>,
    pub links: Vec<NavLink>,
    pub diff: DiffPreferences,
    pub wiki_format_messages: bool,
    pub show_diffs: bool,
    pub has_diffs: bool,
    /// One slot per change; `None` for unmodified entries hidden from the
    /// summary.
    pub changes: Vec<Option<ChangeEntry>>,
}

/// Link to a changeset, optionally restricted to a path and compared
/// against another path@rev.
pub fn changeset_href(rev: Rev, path: Option<&str>, old: Option<(Rev, &str)>) -> String {
    let mut href = format!("/changeset/{}", rev);
    if let Some(path) = path.filter(|p| *p != "/") {
        href.push_str(&encode_path(path));
    }
    if let Some((old_rev, old_path)) = old {
        href.push_str(&format!("?old={}&old_path={}", old_rev, encode_path(old_path)));
    }
    href
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| TracError::Config(format!("hide_properties: {}", e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| TracError::Config(format!("hide_properties: {}", e)))
}

/// A path as used in download names: `trunk/a.txt` becomes `trunk_a.txt`.
fn flat_path(path: &str) -> String {
    match path.trim_start_matches('/') {
        "" => "_".to_string(),
        rel => rel.replace('/', "_"),
    }
}

fn zip_error(e: zip::result::ZipError) -> TracError {
    TracError::Internal(format!("Unable to write zip archive: {}", e))
}

/// Computes and renders the differences named by a [`ChangesetQuery`].
pub struct ChangesetEngine {
    repos: Arc<dyn Repository>,
    mimeview: Mimeview,
    hidden_properties: GlobSet,
    limits: DiffLimits,
    tab_width: usize,
    wiki_format_messages: bool,
}

impl ChangesetEngine {
    pub fn new(repos: Arc<dyn Repository>) -> Self {
        ChangesetEngine {
            repos,
            mimeview: Mimeview::default(),
            hidden_properties: GlobSet::empty(),
            limits: DiffLimits::default(),
            tab_width: 8,
            wiki_format_messages: true,
        }
    }

    pub fn from_config(repos: Arc<dyn Repository>, config: &Config) -> Result<Self> {
        Ok(ChangesetEngine {
            repos,
            mimeview: Mimeview::new(&config.trac.default_charset),
            hidden_properties: build_globset(&config.browser.hide_properties)?,
            limits: DiffLimits {
                max_diff_files: config.changeset.max_diff_files,
                max_diff_bytes: config.changeset.max_diff_bytes,
            },
            tab_width: config.diff.tab_width,
            wiki_format_messages: config.changeset.wiki_format_messages,
        })
    }

    pub fn with_limits(mut self, limits: DiffLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_hidden_properties(mut self, patterns: &[String]) -> Result<Self> {
        self.hidden_properties = build_globset(patterns)?;
        Ok(self)
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repos
    }

    /// Normalize the query and decide between changeset and diff mode.
    pub fn prepare(&self, query: &ChangesetQuery) -> Result<DiffPlan> {
        let repos = &self.repos;
        let new_path = repos.normalize_path(query.new_path.as_deref());
        let new = repos.normalize_rev(query.new.as_deref())?;
        let old_path = repos.normalize_path(query.old_path.as_deref().or(Some(new_path.as_str())));
        let old = match query.old.as_deref() {
            Some(old) => repos.normalize_rev(Some(old))?,
            None => new,
        };

        if old_path == new_path && old == new {
            let restricted = new_path != "/";
            repos.get_node(&new_path, Some(new))?;
            let (old_path, old_rev) = match repos.previous_node(&new_path, new)? {
                Some((path, rev)) => (path, Some(rev)),
                None => (new_path.clone(), repos.previous_rev(new)),
            };
            return Ok(DiffPlan {
                chgset: true,
                restricted,
                args: DiffArgs {
                    old_path,
                    old_rev,
                    new_path,
                    new_rev: new,
                },
            });
        }

        Ok(DiffPlan {
            chgset: false,
            restricted: old_path == new_path,
            args: DiffArgs {
                old_path,
                old_rev: Some(old),
                new_path,
                new_rev: new,
            },
        })
    }

    fn changeset_title(plan: &DiffPlan, rev: Rev) -> String {
        if plan.restricted {
            format!("Changeset {} for {}", rev, plan.args.new_path)
        } else {
            format!("Changeset {}", rev)
        }
    }

    pub fn title(&self, plan: &DiffPlan) -> String {
        let args = &plan.args;
        if plan.chgset {
            return Self::changeset_title(plan, args.new_rev);
        }
        let old_rev = args
            .old_rev
            .map(|r| r.to_string())
            .unwrap_or_else(|| "latest".to_string());
        if args.old_path == args.new_path {
            format!("Diff r{}:{} for {}", old_rev, args.new_rev, args.new_path)
        } else {
            format!(
                "Diff from {}@{} to {}@{}",
                args.old_path, old_rev, args.new_path, args.new_rev
            )
        }
    }

    /// Base name of the downloaded diff or archive.
    pub fn filename(&self, plan: &DiffPlan) -> String {
        let args = &plan.args;
        let rpath = flat_path(&args.new_path);
        let old = args.old_rev.map(|r| r.to_string()).unwrap_or_default();
        match (plan.chgset, plan.restricted) {
            (true, true) => format!("changeset_{}_r{}", rpath, args.new_rev),
            (true, false) => format!("changeset_r{}", args.new_rev),
            (false, true) => format!("diff-{}-from-r{}-to-r{}", rpath, old, args.new_rev),
            (false, false) if args.old_path == "/" => format!("{}-r{}", rpath, old),
            (false, false) => format!(
                "diff-from-{}-r{}-to-{}-r{}",
                flat_path(&args.old_path),
                old,
                rpath,
                args.new_rev
            ),
        }
    }

    /// The changes listed by the changeset view. In changeset mode these
    /// come from the changeset itself, filtered to the restricted path.
    pub fn get_changes(&self, plan: &DiffPlan) -> Result<Vec<Delta>> {
        if !plan.chgset {
            return self.repos.get_changes(&plan.args);
        }
        let path = &plan.args.new_path;
        let rev = plan.args.new_rev;
        let changeset = self.repos.get_changeset(rev)?;

        let mut deltas = Vec::new();
        for change in changeset.changes {
            let npath = &change.path;
            if plan.restricted
                && relative_to(npath, path).is_none()
                && relative_to(path, npath).is_none()
            {
                continue;
            }
            let old = match (change.change, &change.base_path) {
                (ChangeKind::Add, _) => None,
                (_, Some(base_path)) => Some(self.repos.get_node(base_path, change.base_rev)?),
                (_, None) => None,
            };
            let new = match change.change {
                ChangeKind::Delete => None,
                _ => Some(self.repos.get_node(npath, Some(rev))?),
            };
            deltas.push(Delta {
                old,
                new,
                kind: change.kind,
                change: change.change,
            });
        }
        Ok(deltas)
    }

    fn decoded(&self, node: &Node) -> Option<String> {
        let content = node.content();
        if self.mimeview.is_binary(content) {
            return None;
        }
        Some(self.mimeview.to_unicode(content, node.content_type().as_deref()))
    }

    /// Hunks between two file revisions: `None` when either side is
    /// binary, empty when the text is identical.
    pub fn content_changes(&self, old: &Node, new: &Node, options: &DiffOptions) -> Option<Vec<Hunk>> {
        let old_text = self.decoded(old)?;
        let new_text = self.decoded(new)?;
        if old_text == new_text {
            return Some(Vec::new());
        }
        let options = DiffOptions {
            tab_width: self.tab_width,
            ..options.clone()
        };
        let old_lines: Vec<&str> = old_text.lines().collect();
        let new_lines: Vec<&str> = new_text.lines().collect();
        Some(diff_blocks(&old_lines, &new_lines, &options))
    }

    /// Added, removed and modified node properties, minus hidden ones.
    pub fn prop_changes(&self, old: &Node, new: &Node) -> Vec<PropChange> {
        let old_props = old.get_properties();
        let new_props = new.get_properties();
        if old_props == new_props {
            return Vec::new();
        }
        let mut changed: BTreeMap<&str, PropChange> = BTreeMap::new();
        for (name, value) in old_props {
            match new_props.get(name) {
                None => {
                    changed.insert(name, PropChange {
                        name: name.clone(),
                        old: Some(value.clone()),
                        new: None,
                    });
                }
                Some(new_value) if new_value != value => {
                    changed.insert(name, PropChange {
                        name: name.clone(),
                        old: Some(value.clone()),
                        new: Some(new_value.clone()),
                    });
                }
                Some(_) => {}
            }
        }
        for (name, value) in new_props {
            if !old_props.contains_key(name) {
                changed.insert(name, PropChange {
                    name: name.clone(),
                    old: None,
                    new: Some(value.clone()),
                });
            }
        }
        changed
            .into_values()
            .filter(|p| !self.hidden_properties.is_match(&p.name))
            .collect()
    }

    fn node_info(&self, node: &Node) -> NodeInfo {
        NodeInfo {
            path: node.path.clone(),
            rev: node.rev,
            shortrev: self.repos.short_rev(node.rev),
            href: format!("/browser{}?rev={}", encode_path(&node.created_path), node.created_rev),
            title: format!("Show revision {} of this file in browser", node.rev),
        }
    }

    fn navigation(&self, plan: &DiffPlan) -> Vec<NavLink> {
        let repos = &self.repos;
        let path = &plan.args.new_path;
        let rev = plan.args.new_rev;
        let mut links = Vec::new();
        let link = |rel: &str, href: String, title: String| NavLink {
            rel: rel.to_string(),
            href,
            title,
        };

        if rev != repos.oldest_rev() {
            if plan.restricted {
                if let Ok(Some((prev_path, prev_rev))) = repos.previous_node(path, rev) {
                    links.push(link(
                        "prev",
                        changeset_href(prev_rev, Some(&prev_path), None),
                        Self::changeset_title(plan, prev_rev),
                    ));
                }
            } else {
                let oldest = repos.oldest_rev();
                links.push(link(
                    "first",
                    changeset_href(oldest, None, None),
                    format!("Changeset {}", oldest),
                ));
                if let Some(prev_rev) = repos.previous_rev(rev) {
                    links.push(link(
                        "prev",
                        changeset_href(prev_rev, None, None),
                        Self::changeset_title(plan, prev_rev),
                    ));
                }
            }
        }

        let youngest = repos.youngest_rev();
        if rev != youngest {
            if plan.restricted {
                if let Some(next_rev) = repos.next_rev_for_path(rev, path) {
                    let href = if repos.has_node(path, Some(next_rev)) {
                        changeset_href(next_rev, Some(path), None)
                    } else {
                        changeset_href(next_rev, None, None)
                    };
                    links.push(link("next", href, Self::changeset_title(plan, next_rev)));
                }
            } else {
                links.push(link(
                    "last",
                    changeset_href(youngest, None, None),
                    format!("Changeset {}", youngest),
                ));
                if let Some(next_rev) = repos.next_rev(rev) {
                    links.push(link(
                        "next",
                        changeset_href(next_rev, None, None),
                        Self::changeset_title(plan, next_rev),
                    ));
                }
            }
        }
        links
    }

    fn show_diffs(&self, changes: &[Delta]) -> bool {
        let DiffLimits {
            max_diff_files,
            max_diff_bytes,
        } = self.limits;
        if max_diff_files == 0 && max_diff_bytes == 0 {
            return true;
        }
        let (mut files, mut bytes) = (0usize, 0u64);
        for delta in changes {
            if delta.change.is_diff_change() && delta.kind == NodeKind::File {
                files += 1;
                bytes += delta.old.as_ref().map_or(0, Node::content_length)
                    + delta.new.as_ref().map_or(0, Node::content_length);
            }
        }
        (max_diff_files == 0 || files <= max_diff_files)
            && (max_diff_bytes == 0 || bytes <= max_diff_bytes || files == 1)
    }

    /// Build the changeset view model. Diffs need `FILE_VIEW`; the change
    /// list needs `BROWSER_VIEW`.
    pub fn render_changes(
        &self,
        plan: &DiffPlan,
        prefs: &DiffPreferences,
        perms: &PermissionSet,
    ) -> Result<ChangesetView> {
        let args = &plan.args;
        let changeset = if plan.chgset {
            Some(self.repos.get_changeset(args.new_rev)?)
        } else {
            None
        };
        let mut view = ChangesetView {
            title: self.title(plan),
            chgset: plan.chgset,
            restricted: plan.restricted,
            old_path: args.old_path.clone(),
            old_rev: args.old_rev,
            new_path: args.new_path.clone(),
            new_rev: args.new_rev,
            changeset_properties: changeset
                .as_ref()
                .map(Changeset::get_properties)
                .unwrap_or_default(),
            changeset,
            links: if plan.chgset {
                self.navigation(plan)
            } else {
                Vec::new()
            },
            diff: prefs.clone(),
            wiki_format_messages: self.wiki_format_messages,
            show_diffs: false,
            has_diffs: false,
            changes: Vec::new(),
        };

        if !perms.has(BROWSER_VIEW) {
            return Ok(view);
        }

        let changes = self.get_changes(plan)?;
        let file_view = perms.has(FILE_VIEW);
        let show_diffs = file_view && self.show_diffs(&changes);
        view.show_diffs = show_diffs;

        for delta in &changes {
            let mut props = Vec::new();
            let mut diffs = Some(Vec::new());
            let mut show_entry = delta.change != ChangeKind::Edit;

            if let (true, true, Some(old), Some(new)) =
                (delta.change.is_diff_change(), file_view, &delta.old, &delta.new)
            {
                props = self.prop_changes(old, new);
                if !props.is_empty() {
                    show_entry = true;
                }
                if delta.kind == NodeKind::File && show_diffs {
                    diffs = self.content_changes(old, new, &prefs.diff);
                    match &diffs {
                        Some(hunks) if hunks.is_empty() => {}
                        Some(_) => {
                            view.has_diffs = true;
                            show_entry = true;
                        }
                        None => show_entry = true,
                    }
                }
            }

            if !(show_entry || !show_diffs) {
                view.changes.push(None);
                continue;
            }
            let diff_href = match (&delta.old, &delta.new) {
                (Some(old), Some(new)) if delta.change.is_diff_change() && !show_diffs => {
                    Some(if plan.chgset {
                        changeset_href(new.rev, Some(&new.path), None)
                    } else {
                        changeset_href(
                            new.created_rev,
                            Some(&new.created_path),
                            Some((old.created_rev, &old.created_path)),
                        )
                    })
                }
                _ => None,
            };
            view.changes.push(Some(ChangeEntry {
                change: delta.change,
                kind: delta.kind,
                old: delta.old.as_ref().map(|n| self.node_info(n)),
                new: delta.new.as_ref().map(|n| self.node_info(n)),
                props,
                diffs,
                diff_href,
            }));
        }
        debug!(
            "Rendered {} change(s) for {} (diffs shown: {})",
            view.changes.len(),
            view.title,
            show_diffs
        );
        Ok(view)
    }

    /// Unified diff of every text file change, CRLF terminated.
    pub fn render_unified(&self, plan: &DiffPlan, options: &DiffOptions) -> Result<Vec<u8>> {
        const CRLF: &str = "\r\n";
        let args = &plan.args;
        let options = DiffOptions {
            context: options.context.or(Some(crate::diff::DEFAULT_CONTEXT)),
            ..options.clone()
        };
        let mut out = String::new();

        for delta in self.repos.get_changes(args)? {
            if delta.kind == NodeKind::Directory {
                continue;
            }
            let mut old_content = String::new();
            let mut new_content = String::new();
            let mut old_info: Option<(String, String)> = None;
            let mut new_info: Option<(String, String)> = None;

            if let Some(old) = &delta.old {
                let Some(text) = self.decoded(old) else {
                    continue;
                };
                old_content = text;
                old_info = Some((old.path.clone(), old.rev.to_string()));
            }
            let index_path = match &delta.new {
                Some(new) => {
                    let Some(text) = self.decoded(new) else {
                        continue;
                    };
                    new_content = text;
                    new_info = Some((new.path.clone(), new.rev.to_string()));
                    new.path.clone()
                }
                None => {
                    let old_path = delta.old.as_ref().map(|n| n.path.as_str()).unwrap_or_default();
                    let rel = relative_to(old_path, &args.old_path).unwrap_or(old_path);
                    join_path(&args.new_path, rel)
                }
            };

            if old_content == new_content {
                continue;
            }
            // An add is shown against its own new side.
            let old_info = old_info.or_else(|| new_info.clone()).unwrap_or_default();
            let new_info = new_info.unwrap_or_default();
            out.push_str(&format!("Index: {}{}", index_path, CRLF));
            out.push_str(&"=".repeat(67));
            out.push_str(CRLF);
            out.push_str(&format!("--- {} (revision {}){}", old_info.0, old_info.1, CRLF));
            out.push_str(&format!("+++ {} (revision {}){}", new_info.0, new_info.1, CRLF));
            let old_lines: Vec<&str> = old_content.lines().collect();
            let new_lines: Vec<&str> = new_content.lines().collect();
            for line in unified_diff(&old_lines, &new_lines, &options) {
                out.push_str(&line);
                out.push_str(CRLF);
            }
        }
        Ok(out.into_bytes())
    }

    /// Zip archive of the new content of every added or modified text
    /// file. Binary files are left out.
    pub fn render_zip(&self, plan: &DiffPlan) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for delta in self.repos.get_changes(&plan.args)? {
            if delta.kind != NodeKind::File || delta.change == ChangeKind::Delete {
                continue;
            }
            let Some(node) = delta.new else {
                continue;
            };
            if self.mimeview.is_binary(node.content()) {
                continue;
            }
            let modified = node.last_modified;
            let mtime = zip::DateTime::from_date_and_time(
                modified.year().clamp(1980, 2107) as u16,
                modified.month() as u8,
                modified.day() as u8,
                modified.hour() as u8,
                modified.minute() as u8,
                modified.second() as u8,
            )
            .unwrap_or_default();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(mtime);
            writer
                .start_file(node.path.trim_start_matches('/').to_string(), options)
                .map_err(zip_error)?;
            writer.write_all(node.content())?;
        }
        let cursor = writer.finish().map_err(zip_error)?;
        Ok(cursor.into_inner())
    }
}
