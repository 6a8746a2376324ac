//! Link scanning over wiki text
//!
//! Syntax providers contribute regex rules (`#1`, `[42]`, CamelCase, ...)
//! and namespace resolvers (`ticket:`, `source:`, ...). The scanner runs
//! every rule over the text and keeps the leftmost non-overlapping
//! matches, earlier rules winning ties.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use regex::{Captures, Regex};
use tracing::{debug, warn};
use trac_core::{Result, TracError};

use crate::model::ObjectRef;

/// Name of the CamelCase page name rule; only one provider may contribute it.
pub const PAGE_NAME_RULE: &str = "wikipagename";

/// Characters of context kept on each side of a link.
pub const CONTEXT_CHARS: usize = 40;

/// Turns the target of a `ns:target` link into an object.
pub type LinkResolver = Arc<dyn Fn(&str, &str) -> Option<ObjectRef> + Send + Sync>;

type RuleResolver = Arc<dyn Fn(&Captures<'_>) -> Option<ObjectRef> + Send + Sync>;

/// Extra check on a match, given the whole text and the match span.
/// Stands in for the look-around assertions `regex` does not support.
pub type Boundary = fn(&str, Range<usize>) -> bool;

/// One wiki syntax rule.
#[derive(Clone)]
pub struct SyntaxRule {
    name: String,
    regex: Regex,
    boundary: Option<Boundary>,
    resolve: RuleResolver,
}

impl SyntaxRule {
    pub fn new<F>(name: impl Into<String>, pattern: &str, resolve: F) -> Result<Self>
    where
        F: Fn(&Captures<'_>) -> Option<ObjectRef> + Send + Sync + 'static,
    {
        let name = name.into();
        let regex = Regex::new(pattern)
            .map_err(|e| TracError::Internal(format!("Invalid wiki syntax rule {name}: {e}")))?;
        Ok(SyntaxRule {
            name,
            regex,
            boundary: None,
            resolve: Arc::new(resolve),
        })
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SyntaxRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxRule")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// Match must not follow a letter, digit or underscore.
pub fn word_start(text: &str, span: Range<usize>) -> bool {
    text[..span.start]
        .chars()
        .next_back()
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
}

/// Match must not be followed by a letter, digit or underscore.
pub fn word_end(text: &str, span: Range<usize>) -> bool {
    text[span.end..]
        .chars()
        .next()
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
}

pub fn word_bounded(text: &str, span: Range<usize>) -> bool {
    word_start(text, span.clone()) && word_end(text, span)
}

/// Contributes link syntax to the scanner. Implemented by components
/// extending `XRefSystem.syntax_providers`.
pub trait WikiSyntaxProvider: Send + Sync {
    fn wiki_syntax(&self) -> Result<Vec<SyntaxRule>> {
        Ok(Vec::new())
    }

    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        Vec::new()
    }

    /// Whether this provider recognizes bare wiki page names.
    fn provides_page_names(&self) -> bool {
        false
    }
}

/// A link found in wiki text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedLink {
    pub target: ObjectRef,
    pub context: String,
    pub span: Range<usize>,
}

/// Compiled set of rules from every syntax provider.
#[derive(Debug, Clone)]
pub struct LinkScanner {
    rules: Vec<SyntaxRule>,
}

impl LinkScanner {
    pub fn new(providers: &[Arc<dyn WikiSyntaxProvider>]) -> Result<Self> {
        let mut resolvers: HashMap<String, LinkResolver> = HashMap::new();
        for provider in providers {
            for (ns, resolver) in provider.link_resolvers() {
                resolvers.insert(ns, resolver);
            }
        }
        let resolvers = Arc::new(resolvers);

        let mut rules = namespace_rules(&resolvers)?;
        let mut page_names = false;
        for provider in providers {
            let mut syntax = provider.wiki_syntax()?;
            if provider.provides_page_names() {
                if page_names {
                    warn!("More than one wiki page name syntax provider, ignoring the extra ones");
                    syntax.retain(|rule| rule.name() != PAGE_NAME_RULE);
                }
                page_names = true;
            }
            rules.extend(syntax);
        }
        debug!(
            "Link scanner ready with {} rules and {} namespaces",
            rules.len(),
            resolvers.len()
        );
        Ok(LinkScanner { rules })
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(SyntaxRule::name).collect()
    }

    /// All links of `text`, in order of appearance. Escaped links (`!#1`)
    /// and links to unknown namespaces are skipped.
    pub fn scan(&self, text: &str) -> Vec<ScannedLink> {
        let mut candidates: Vec<(usize, usize, Captures<'_>)> = Vec::new();
        for (order, rule) in self.rules.iter().enumerate() {
            for caps in rule.regex.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                let span = whole.range();
                let body = if whole.as_str().starts_with('!') {
                    span.start + 1..span.end
                } else {
                    span.clone()
                };
                if rule.boundary.is_none_or(|accept| accept(text, body)) {
                    candidates.push((span.start, order, caps));
                }
            }
        }
        candidates.sort_by_key(|(start, order, _)| (*start, *order));

        let mut links = Vec::new();
        let mut cursor = 0;
        for (start, order, caps) in candidates {
            if start < cursor {
                continue;
            }
            let Some(whole) = caps.get(0) else { continue };
            cursor = whole.end();
            if whole.as_str().starts_with('!') {
                continue;
            }
            if let Some(target) = (self.rules[order].resolve)(&caps) {
                links.push(ScannedLink {
                    target,
                    context: extract_context(text, whole.range()),
                    span: whole.range(),
                });
            }
        }
        links
    }
}

/// `ns:target` and `[ns:target label]` links, dispatched to resolvers.
fn namespace_rules(resolvers: &Arc<HashMap<String, LinkResolver>>) -> Result<Vec<SyntaxRule>> {
    let lhref = {
        let resolvers = Arc::clone(resolvers);
        SyntaxRule::new(
            "lhref",
            r#"!?\[(?P<ns>[A-Za-z][\w+-]*):(?P<target>"[^"]+"|[^\s\]]+)(?:\s+[^\]]*)?\]"#,
            move |caps| resolve_namespace(&resolvers, caps),
        )?
    };
    let shref = {
        let resolvers = Arc::clone(resolvers);
        SyntaxRule::new(
            "shref",
            r#"!?(?P<ns>[A-Za-z][\w+-]*):(?P<target>"[^"]+"|[^\s\]\)|]*[^\s.,;:!?'"\]\)|])"#,
            move |caps| resolve_namespace(&resolvers, caps),
        )?
        .with_boundary(word_start)
    };
    Ok(vec![lhref, shref])
}

fn resolve_namespace(
    resolvers: &HashMap<String, LinkResolver>,
    caps: &Captures<'_>,
) -> Option<ObjectRef> {
    let ns = caps.name("ns")?.as_str();
    let target = caps.name("target")?.as_str().trim_matches('"');
    let resolver = resolvers.get(ns)?;
    resolver(ns, target)
}

/// Up to [`CONTEXT_CHARS`] characters on each side of `span`, with
/// `...` marking a truncated side.
pub fn extract_context(text: &str, span: Range<usize>) -> String {
    let (from, lead) = match text[..span.start].char_indices().rev().nth(CONTEXT_CHARS - 1) {
        Some((idx, _)) if idx > 0 => (idx, "..."),
        _ => (0, ""),
    };
    let (to, tail) = match text[span.end..].char_indices().nth(CONTEXT_CHARS) {
        Some((idx, _)) => (span.end + idx, "..."),
        None => (text.len(), ""),
    };
    format!("{lead}{}{tail}", &text[from..to])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_truncated_on_both_sides() {
        let text = format!("{}#1{}", "a".repeat(50), "b".repeat(50));
        let context = extract_context(&text, 50..52);
        assert_eq!(context, format!("...{}#1{}...", "a".repeat(40), "b".repeat(40)));

        assert_eq!(extract_context("see #1 here", 4..6), "see #1 here");
    }

    #[test]
    fn test_context_respects_char_boundaries() {
        let text = format!("{}#1", "é".repeat(45));
        let start = text.len() - 2;
        let context = extract_context(&text, start..text.len());
        assert_eq!(context, format!("...{}#1", "é".repeat(40)));
    }

    #[test]
    fn test_boundaries() {
        assert!(word_start("see r42", 4..7));
        assert!(!word_start("bar42", 2..5));
        assert!(word_end("r42.", 0..3));
        assert!(!word_end("r42abc", 0..3));
        assert!(word_bounded("r1", 0..2));
    }
}
