//! Built-in wiki syntax providers

use std::ops::Range;
use std::sync::Arc;

use trac_core::{ComponentDescriptor, ComponentRegistry, Result};

use crate::model::{CHANGESET, MILESTONE, ObjectRef, REPORT, SOURCE, TICKET, WIKI};
use crate::syntax::{LinkResolver, PAGE_NAME_RULE, SyntaxRule, WikiSyntaxProvider, word_bounded};
use crate::system::SYNTAX_PROVIDERS;

fn numeric(kind: &'static str) -> LinkResolver {
    Arc::new(move |_ns, target| {
        let id = target.trim_start_matches(['#', 'r']);
        id.parse::<u64>().ok().map(|n| ObjectRef::new(kind, n.to_string()))
    })
}

/// `#1` and `ticket:1`.
#[derive(Debug, Default)]
pub struct TicketSyntax;

impl WikiSyntaxProvider for TicketSyntax {
    fn wiki_syntax(&self) -> Result<Vec<SyntaxRule>> {
        Ok(vec![SyntaxRule::new("ticket", r"!?#(?P<id>\d+)", |caps| {
            Some(ObjectRef::new(TICKET, caps.name("id")?.as_str()))
        })?])
    }

    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        vec![(TICKET.to_string(), numeric(TICKET))]
    }
}

/// `[42]`, `r42` and `changeset:42`.
#[derive(Debug, Default)]
pub struct ChangesetSyntax;

impl WikiSyntaxProvider for ChangesetSyntax {
    fn wiki_syntax(&self) -> Result<Vec<SyntaxRule>> {
        Ok(vec![
            SyntaxRule::new("changeset", r"!?\[(?P<rev>\d+)\]", |caps| {
                Some(ObjectRef::new(CHANGESET, caps.name("rev")?.as_str()))
            })?,
            SyntaxRule::new("revision", r"!?r(?P<rev>\d+)", |caps| {
                Some(ObjectRef::new(CHANGESET, caps.name("rev")?.as_str()))
            })?
            .with_boundary(word_bounded),
        ])
    }

    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        vec![(CHANGESET.to_string(), numeric(CHANGESET))]
    }
}

/// `{3}` and `report:3`.
#[derive(Debug, Default)]
pub struct ReportSyntax;

impl WikiSyntaxProvider for ReportSyntax {
    fn wiki_syntax(&self) -> Result<Vec<SyntaxRule>> {
        Ok(vec![SyntaxRule::new("report", r"!?\{(?P<id>\d+)\}", |caps| {
            Some(ObjectRef::new(REPORT, caps.name("id")?.as_str()))
        })?])
    }

    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        vec![(REPORT.to_string(), numeric(REPORT))]
    }
}

#[derive(Debug, Default)]
pub struct MilestoneSyntax;

impl WikiSyntaxProvider for MilestoneSyntax {
    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        let resolver: LinkResolver = Arc::new(|_ns, target| {
            (!target.is_empty()).then(|| ObjectRef::new(MILESTONE, target))
        });
        vec![(MILESTONE.to_string(), resolver)]
    }
}

/// `source:/trunk/README@42`, with `browser:` and `repos:` aliases.
#[derive(Debug, Default)]
pub struct SourceSyntax;

impl WikiSyntaxProvider for SourceSyntax {
    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        let resolver: LinkResolver = Arc::new(|_ns, target| {
            let path = target.split(['@', '#']).next().unwrap_or_default();
            let obj = ObjectRef::new(SOURCE, path);
            (!obj.id.is_empty()).then_some(obj)
        });
        ["source", "browser", "repos"]
            .into_iter()
            .map(|ns| (ns.to_string(), Arc::clone(&resolver)))
            .collect()
    }
}

/// CamelCase page names and `wiki:PageName`.
#[derive(Debug, Default)]
pub struct WikiSyntax;

const PAGE_NAME: &str = r"!?[A-Z][a-z]+(?:[A-Z][a-z]*[a-z/])+(?:#[A-Za-z0-9]+)?";

fn page_name_boundary(text: &str, span: Range<usize>) -> bool {
    let before_ok = text[..span.start]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_ascii_alphabetic());
    let mut after = text[span.end..].chars();
    let after_ok = match after.next() {
        None => true,
        Some(':') => after.next().is_none_or(char::is_whitespace),
        Some(c) => c.is_whitespace() || ".,;!?)}]".contains(c),
    };
    before_ok && after_ok
}

fn page(target: &str) -> Option<ObjectRef> {
    let name = target.split(['#', '?']).next().unwrap_or_default();
    (!name.is_empty()).then(|| ObjectRef::wiki(name))
}

impl WikiSyntaxProvider for WikiSyntax {
    fn wiki_syntax(&self) -> Result<Vec<SyntaxRule>> {
        Ok(vec![
            SyntaxRule::new(PAGE_NAME_RULE, PAGE_NAME, |caps| {
                page(caps.get(0)?.as_str())
            })?
            .with_boundary(page_name_boundary),
        ])
    }

    fn link_resolvers(&self) -> Vec<(String, LinkResolver)> {
        let resolver: LinkResolver = Arc::new(|_ns, target| page(target));
        vec![(WIKI.to_string(), resolver)]
    }

    fn provides_page_names(&self) -> bool {
        true
    }
}

/// Register the built-in providers as components extending
/// `XRefSystem.syntax_providers`.
pub fn register(registry: &ComponentRegistry) -> Result<()> {
    registry.register(
        ComponentDescriptor::<TicketSyntax>::with_default("TicketSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    registry.register(
        ComponentDescriptor::<ChangesetSyntax>::with_default("ChangesetSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    registry.register(
        ComponentDescriptor::<ReportSyntax>::with_default("ReportSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    registry.register(
        ComponentDescriptor::<MilestoneSyntax>::with_default("MilestoneSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    registry.register(
        ComponentDescriptor::<SourceSyntax>::with_default("SourceSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    registry.register(
        ComponentDescriptor::<WikiSyntax>::with_default("WikiSyntax")
            .implements::<dyn WikiSyntaxProvider>(|c| c)
            .extends(&SYNTAX_PROVIDERS),
    )?;
    Ok(())
}

/// The built-in providers, in registration order.
pub fn builtin() -> Vec<Arc<dyn WikiSyntaxProvider>> {
    vec![
        Arc::new(TicketSyntax),
        Arc::new(ChangesetSyntax),
        Arc::new(ReportSyntax),
        Arc::new(MilestoneSyntax),
        Arc::new(SourceSyntax),
        Arc::new(WikiSyntax),
    ]
}
