//! `/changeset` and `/diff`

use regex::Regex;
use serde_json::{Value, json};
use trac_core::Result;
use trac_versioncontrol::{
    CHANGESET_VIEW, ChangesetQuery, DiffPlan, FILE_VIEW, changeset_href, get_diff_options,
};

use crate::dispatcher::{Flow, RequestProcessor};
use crate::environment::Environment;
use crate::processors::route;
use crate::request::{Request, Response};

/// `/changeset/<rev>/<path>`, optionally against `old`/`old_path`.
pub struct ChangesetPlugin {
    route: Regex,
}

impl ChangesetPlugin {
    pub fn new() -> Result<Self> {
        Ok(ChangesetPlugin {
            route: route(r"^/changeset(?:/([^/]+))?(/.*)?$")?,
        })
    }
}

impl RequestProcessor for ChangesetPlugin {
    fn match_request(&self, req: &mut Request) -> bool {
        let Some(caps) = self.route.captures(&req.path_info) else {
            return false;
        };
        let new = caps.get(1).map(|m| m.as_str().to_string());
        let new_path = caps.get(2).map(|m| m.as_str().to_string());
        if let Some(new) = new {
            req.args.insert("new".to_string(), new);
        }
        if let Some(new_path) = new_path {
            req.args.insert("new_path".to_string(), new_path);
        }
        true
    }

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
        render_diff(env, req, res)
    }
}

/// `/diff/<path>`: `rev` shows the changeset restricted to the path,
/// `old`/`new` compare two revisions of it.
pub struct DiffPlugin {
    route: Regex,
}

impl DiffPlugin {
    pub fn new() -> Result<Self> {
        Ok(DiffPlugin {
            route: route(r"^/diff(/.*)?$")?,
        })
    }
}

impl RequestProcessor for DiffPlugin {
    fn match_request(&self, req: &mut Request) -> bool {
        let Some(caps) = self.route.captures(&req.path_info) else {
            return false;
        };
        let path = caps.get(1).map_or("/", |m| m.as_str()).to_string();
        req.args.insert("new_path".to_string(), path);
        if !req.args.contains_key("new") {
            if let Some(rev) = req.args.get("rev").cloned() {
                req.args.insert("new".to_string(), rev);
            }
        }
        true
    }

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
        render_diff(env, req, res)
    }
}

/// Canonical location of a plan.
fn plan_href(plan: &DiffPlan) -> String {
    let args = &plan.args;
    let old = args
        .old_rev
        .filter(|_| !plan.chgset)
        .map(|rev| (rev, args.old_path.as_str()));
    changeset_href(args.new_rev, Some(&args.new_path), old)
}

fn with_format(href: &str, format: &str) -> String {
    let sep = if href.contains('?') { '&' } else { '?' };
    format!("{}{}format={}", href, sep, format)
}

fn render_diff(env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
    req.perm.require(CHANGESET_VIEW)?;
    let engine = env.changeset_engine()?;
    let plan = engine.prepare(&ChangesetQuery::from_args(&req.args))?;
    let prefs = get_diff_options(&req.args);

    if req.args.contains_key("update") {
        res.redirect(&plan_href(&plan));
        return Ok(Flow::Done);
    }

    match req.arg("format") {
        Some("diff") => {
            req.perm.require(FILE_VIEW)?;
            let body = engine.render_unified(&plan, &prefs.diff)?;
            res.send("text/plain;charset=utf-8", body);
            let filename = urlencoding::encode(&engine.filename(&plan)).into_owned();
            res.set_header(
                "Content-Disposition",
                format!("inline;filename={}.diff", filename),
            );
            Ok(Flow::Done)
        }
        Some("zip") => {
            req.perm.require(FILE_VIEW)?;
            let body = engine.render_zip(&plan)?;
            res.send("application/zip", body);
            let filename = urlencoding::encode(&engine.filename(&plan)).into_owned();
            res.set_header(
                "Content-Disposition",
                format!("attachment;filename={}.zip", filename),
            );
            Ok(Flow::Done)
        }
        _ => {
            let view = engine.render_changes(&plan, &prefs, &req.perm)?;
            let mut data = serde_json::to_value(&view)?;
            if req.perm.has(FILE_VIEW) {
                let href = plan_href(&plan);
                let alternate = json!([
                    {
                        "title": "Unified Diff",
                        "href": with_format(&href, "diff"),
                        "type": "text/plain",
                    },
                    {
                        "title": "Zip Archive",
                        "href": with_format(&href, "zip"),
                        "type": "application/zip",
                    },
                ]);
                if let Value::Object(map) = &mut data {
                    map.insert("alternate".to_string(), alternate);
                }
            }
            res.render(env.renderer(), "changeset.html", &data)?;
            Ok(Flow::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_route_arguments() {
        let plugin = ChangesetPlugin::new().unwrap();
        let mut req = Request::get("/changeset/3/trunk/a.txt");
        assert!(plugin.match_request(&mut req));
        assert_eq!(req.arg("new"), Some("3"));
        assert_eq!(req.arg("new_path"), Some("/trunk/a.txt"));

        let mut bare = Request::get("/changeset");
        assert!(plugin.match_request(&mut bare));
        assert!(bare.args.is_empty());
        assert!(!plugin.match_request(&mut Request::get("/changesets")));
    }

    #[test]
    fn test_diff_route_uses_rev() {
        let plugin = DiffPlugin::new().unwrap();
        let mut req = Request::get("/diff/trunk").with_arg("rev", "2");
        assert!(plugin.match_request(&mut req));
        assert_eq!(req.arg("new_path"), Some("/trunk"));
        assert_eq!(req.arg("new"), Some("2"));

        let mut root = Request::get("/diff").with_arg("old", "1").with_arg("new", "3");
        assert!(plugin.match_request(&mut root));
        assert_eq!(root.arg("new_path"), Some("/"));
        assert_eq!(root.arg("new"), Some("3"));
    }

    #[test]
    fn test_format_links() {
        assert_eq!(with_format("/changeset/2", "diff"), "/changeset/2?format=diff");
        assert_eq!(
            with_format("/changeset/3/trunk?old=1&old_path=/trunk", "zip"),
            "/changeset/3/trunk?old=1&old_path=/trunk&format=zip"
        );
    }
}
