//! `/anydiff`: the form for comparing two arbitrary path@rev pairs

use regex::Regex;
use serde_json::json;
use trac_core::Result;
use trac_versioncontrol::{CHANGESET_VIEW, Repository, Rev};

use crate::dispatcher::{Flow, RequestProcessor};
use crate::environment::Environment;
use crate::processors::route;
use crate::request::{Request, Response};

pub struct AnydiffPlugin {
    route: Regex,
}

impl AnydiffPlugin {
    pub fn new() -> Result<Self> {
        Ok(AnydiffPlugin {
            route: route(r"^/anydiff/?$")?,
        })
    }
}

fn optional_rev(repos: &dyn Repository, rev: Option<&str>) -> Result<Option<Rev>> {
    match rev.map(str::trim) {
        None | Some("") => Ok(None),
        rev => repos.normalize_rev(rev).map(Some),
    }
}

/// Entries of the directory named by `q` whose name starts with the rest
/// of `q`. Directories carry a trailing slash.
fn suggestions(repos: &dyn Repository, q: &str, rev: Option<Rev>) -> Result<Vec<String>> {
    let q = if q.starts_with('/') {
        q.to_string()
    } else {
        format!("/{}", q)
    };
    let (dir, prefix) = match q.rfind('/') {
        Some(0) => ("/", &q[1..]),
        Some(i) => (&q[..i], &q[i + 1..]),
        None => ("/", q.as_str()),
    };
    if !repos.has_node(dir, rev) {
        return Ok(Vec::new());
    }
    Ok(repos
        .get_entries(dir, rev)?
        .into_iter()
        .filter(|node| node.name().starts_with(prefix))
        .map(|node| {
            if node.is_dir() {
                format!("{}/", node.path)
            } else {
                node.path
            }
        })
        .collect())
}

impl RequestProcessor for AnydiffPlugin {
    fn match_request(&self, req: &mut Request) -> bool {
        self.route.is_match(&req.path_info)
    }

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
        req.perm.require(CHANGESET_VIEW)?;
        let repos = env.repository();

        if req.is_xhr() {
            if let Some(q) = req.arg("q") {
                let rev = optional_rev(repos.as_ref(), req.arg("rev"))?;
                res.send_json(&suggestions(repos.as_ref(), q, rev)?)?;
                return Ok(Flow::Done);
            }
        }

        let data = json!({
            "old_path": repos.normalize_path(req.arg("old_path")),
            "old_rev": optional_rev(repos.as_ref(), req.arg("old_rev"))?,
            "new_path": repos.normalize_path(req.arg("new_path")),
            "new_rev": optional_rev(repos.as_ref(), req.arg("new_rev"))?,
            "changeset_href": "/changeset",
        });
        res.render(env.renderer(), "diff_form.html", &data)?;
        Ok(Flow::Continue)
    }
}
