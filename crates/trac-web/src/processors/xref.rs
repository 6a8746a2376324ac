//! `/xref/<type>/<id>` and `/orphans`

use regex::Regex;
use serde_json::{Value, json};
use trac_core::Result;
use trac_xref::{ObjectRef, RelationFilter, XREF_VIEW, XrefEdge};

use crate::dispatcher::{Flow, RequestProcessor};
use crate::environment::Environment;
use crate::processors::route;
use crate::request::{Request, Response};

fn object_json(obj: &ObjectRef) -> Value {
    json!({
        "type": obj.kind,
        "id": obj.id,
        "name": obj.name(),
        "shortname": obj.shortname(),
        "href": obj.href(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Back,
    Forward,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Back => "back",
            Direction::Forward => "forward",
        }
    }

    /// The object at the far end of the edge.
    fn other(self, edge: &XrefEdge) -> &ObjectRef {
        match self {
            Direction::Back => &edge.source,
            Direction::Forward => &edge.target,
        }
    }
}

fn quote_csv(field: &str, sep: char) -> String {
    if field.contains([sep, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_delimited(rows: &[(Direction, &XrefEdge)], sep: char) -> Vec<u8> {
    let mut out = String::new();
    let header = [
        "direction", "type", "id", "relation", "facet", "time", "author", "context",
    ];
    out.push_str(&header.join(&sep.to_string()));
    out.push_str("\r\n");
    for (direction, edge) in rows {
        let other = direction.other(edge);
        let time = edge.time.to_rfc3339();
        let fields = [
            direction.as_str(),
            other.kind.as_str(),
            other.id.as_str(),
            edge.relation.as_str(),
            edge.facet.as_str(),
            time.as_str(),
            edge.author.as_str(),
            edge.context.as_str(),
        ];
        let line: Vec<String> = fields.iter().map(|f| quote_csv(f, sep)).collect();
        out.push_str(&line.join(&sep.to_string()));
        out.push_str("\r\n");
    }
    out.into_bytes()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_rss(obj: &ObjectRef, rows: &[(Direction, &XrefEdge)]) -> Vec<u8> {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<rss version=\"2.0\">\n<channel>\n");
    out.push_str(&format!(
        "<title>Cross-references of {}</title>\n<link>{}</link>\n",
        escape_xml(&obj.name()),
        escape_xml(&format!("/xref/{}/{}", obj.kind, obj.id))
    ));
    for (direction, edge) in rows {
        let other = direction.other(edge);
        let relation = if edge.is_relation() { edge.relation.as_str() } else { "links" };
        out.push_str("<item>\n");
        out.push_str(&format!(
            "<title>{} ({})</title>\n<link>{}</link>\n<description>{}</description>\n",
            escape_xml(&other.name()),
            escape_xml(relation),
            escape_xml(&other.href()),
            escape_xml(&edge.context)
        ));
        out.push_str(&format!(
            "<author>{}</author>\n<pubDate>{}</pubDate>\n",
            escape_xml(&edge.author),
            edge.time.to_rfc2822()
        ));
        out.push_str("</item>\n");
    }
    out.push_str("</channel>\n</rss>\n");
    out.into_bytes()
}

/// Links from and to one object. `direction` narrows to `back` or
/// `forward`; `relation` to one relation name.
pub struct XrefPlugin {
    route: Regex,
}

impl XrefPlugin {
    pub fn new() -> Result<Self> {
        Ok(XrefPlugin {
            route: route(r"^/xref/([^/]+)/(.+)$")?,
        })
    }
}

impl RequestProcessor for XrefPlugin {
    fn match_request(&self, req: &mut Request) -> bool {
        let Some(caps) = self.route.captures(&req.path_info) else {
            return false;
        };
        let kind = caps[1].to_string();
        let id = caps[2].to_string();
        req.args.insert("type".to_string(), kind);
        req.args.insert("id".to_string(), id);
        true
    }

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
        req.perm.require(XREF_VIEW)?;
        let obj = ObjectRef::new(
            req.arg("type").unwrap_or_default(),
            req.arg("id").unwrap_or_default(),
        );
        let relation = RelationFilter::from(req.arg("relation"));
        let directions: &[Direction] = match req.arg("direction") {
            Some("back") => &[Direction::Back],
            Some("forward") => &[Direction::Forward],
            _ => &[Direction::Back, Direction::Forward],
        };

        let xref = env.xref()?;
        let cnx = env.xref_cnx()?;
        let (backlinks, links) = {
            let guard = cnx.lock();
            let backlinks = if directions.contains(&Direction::Back) {
                xref.find_backlinks(&guard, &obj, &relation, None)
            } else {
                Vec::new()
            };
            let links = if directions.contains(&Direction::Forward) {
                xref.find_links(&guard, &obj, &relation, None)
            } else {
                Vec::new()
            };
            (backlinks, links)
        };
        let rows: Vec<(Direction, &XrefEdge)> = backlinks
            .iter()
            .map(|edge| (Direction::Back, edge))
            .chain(links.iter().map(|edge| (Direction::Forward, edge)))
            .collect();

        match req.arg("format") {
            Some("csv") => {
                res.send("text/csv;charset=utf-8", write_delimited(&rows, ','));
                Ok(Flow::Done)
            }
            Some("tab") => {
                res.send(
                    "text/tab-separated-values;charset=utf-8",
                    write_delimited(&rows, '\t'),
                );
                Ok(Flow::Done)
            }
            Some("rss") => {
                res.send("application/rss+xml", write_rss(&obj, &rows));
                Ok(Flow::Done)
            }
            _ => {
                let edges = |direction: Direction, edges: &[XrefEdge]| -> Vec<Value> {
                    edges
                        .iter()
                        .map(|edge| {
                            json!({
                                "object": object_json(direction.other(edge)),
                                "facet": edge.facet,
                                "context": edge.context,
                                "relation": edge.relation,
                                "time": edge.time,
                                "author": edge.author,
                            })
                        })
                        .collect()
                };
                let data = json!({
                    "object": object_json(&obj),
                    "exists": xref.exists(&obj)?,
                    "backlinks": edges(Direction::Back, &backlinks),
                    "links": edges(Direction::Forward, &links),
                });
                res.render(env.renderer(), "xref.html", &data)?;
                Ok(Flow::Continue)
            }
        }
    }
}

/// Objects nobody links to and wiki pages linked to but missing.
pub struct OrphansPlugin {
    route: Regex,
}

impl OrphansPlugin {
    pub fn new() -> Result<Self> {
        Ok(OrphansPlugin {
            route: route(r"^/orphans/?$")?,
        })
    }
}

impl RequestProcessor for OrphansPlugin {
    fn match_request(&self, req: &mut Request) -> bool {
        self.route.is_match(&req.path_info)
    }

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response) -> Result<Flow> {
        req.perm.require(XREF_VIEW)?;
        let xref = env.xref()?;
        let cnx = env.xref_cnx()?;
        let (orphans, missing) = {
            let guard = cnx.lock();
            (
                xref.find_orphaned_objects(&guard)?,
                xref.find_missing_links(&guard)?,
            )
        };
        let data = json!({
            "orphans": orphans.iter().map(object_json).collect::<Vec<_>>(),
            "missing": missing
                .iter()
                .map(|link| json!({
                    "target": object_json(&link.target),
                    "sources": link.sources.iter().map(object_json).collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>(),
        });
        res.render(env.renderer(), "orphans.html", &data)?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn edge(context: &str) -> XrefEdge {
        XrefEdge {
            source: ObjectRef::ticket(1),
            facet: "description".to_string(),
            context: context.to_string(),
            time: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            author: "alice".to_string(),
            relation: String::new(),
            target: ObjectRef::wiki("WikiStart"),
        }
    }

    #[test]
    fn test_route_splits_type_and_id() {
        let plugin = XrefPlugin::new().unwrap();
        let mut req = Request::get("/xref/source/trunk/README");
        assert!(plugin.match_request(&mut req));
        assert_eq!(req.arg("type"), Some("source"));
        assert_eq!(req.arg("id"), Some("trunk/README"));
        assert!(!plugin.match_request(&mut Request::get("/xref/ticket")));
    }

    #[test]
    fn test_csv_quotes_fields() {
        let quoted = edge("see \"WikiStart\", then");
        let body = write_delimited(&[(Direction::Back, &quoted)], ',');
        let text = String::from_utf8(body).unwrap().replace("\r\n", "\n");
        insta::assert_snapshot!(text, @r###"
        direction,type,id,relation,facet,time,author,context
        back,ticket,1,,description,1970-01-01T00:00:00+00:00,alice,"see ""WikiStart"", then"
        "###);
    }

    #[test]
    fn test_rss_escapes_markup() {
        let body = write_rss(&ObjectRef::wiki("WikiStart"), &[(Direction::Back, &edge("<b>"))]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("<title>Ticket #1 (links)</title>"));
        assert!(text.contains("<description>&lt;b&gt;</description>"));
        assert!(text.contains("<link>/ticket/1</link>"));
    }
}
