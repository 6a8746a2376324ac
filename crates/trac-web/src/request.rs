//! Request and response model handed to processors and filters

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use trac_core::{PermissionSet, Result};

use crate::template::TemplateRenderer;

pub const ANONYMOUS: &str = "anonymous";

/// A request as seen by the dispatcher. Header names are stored
/// lowercased; arguments are already decoded.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path_info: String,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub authname: String,
    pub perm: PermissionSet,
    pub received: Instant,
}

impl Request {
    pub fn new(method: impl Into<String>, path_info: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            path_info: path_info.into(),
            args: BTreeMap::new(),
            headers: BTreeMap::new(),
            authname: ANONYMOUS.to_string(),
            perm: PermissionSet::new(),
            received: Instant::now(),
        }
    }

    pub fn get(path_info: impl Into<String>) -> Self {
        Self::new("GET", path_info)
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_perm(mut self, perm: PermissionSet) -> Self {
        self.perm = perm;
        self
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_xhr(&self) -> bool {
        self.header("X-Requested-With") == Some("XMLHttpRequest")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl Response {
    /// Set a header, replacing any previous value of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn send(&mut self, content_type: &str, body: Vec<u8>) {
        self.set_header("Content-Type", content_type);
        self.set_header("Content-Length", body.len().to_string());
        self.body = body;
    }

    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send("application/json", body);
        Ok(())
    }

    /// Render `template` with `data` through the environment's renderer.
    pub fn render(
        &mut self,
        renderer: &dyn TemplateRenderer,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let (content_type, body) = renderer.render(template, data)?;
        self.send(&content_type, body);
        Ok(())
    }

    pub fn redirect(&mut self, href: &str) {
        self.status = 303;
        self.set_header("Location", href);
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_ignore_case() {
        let req = Request::get("/anydiff").with_header("X-Requested-With", "XMLHttpRequest");
        assert!(req.is_xhr());
        assert_eq!(req.header("x-requested-with"), Some("XMLHttpRequest"));

        let mut res = Response::default();
        res.set_header("Content-Type", "text/plain");
        res.set_header("content-type", "application/zip");
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.header("CONTENT-TYPE"), Some("application/zip"));
    }

    #[test]
    fn test_redirect_clears_body() {
        let mut res = Response::default();
        res.send("text/plain", b"hello".to_vec());
        res.redirect("/changeset/2");
        assert_eq!(res.status, 303);
        assert_eq!(res.header("Location"), Some("/changeset/2"));
        assert!(res.body.is_empty());
    }
}
