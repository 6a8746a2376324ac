//! Request dispatching
//!
//! Processors and filters are plugins. The dispatcher runs the enabled
//! filters around the single processor matching the request path.

use std::sync::Arc;

use tracing::{debug, warn};
use trac_core::{PluginExtensionPoint, Result, TracError};

use crate::environment::Environment;
use crate::request::{Request, Response};

pub const PROCESSORS: PluginExtensionPoint<dyn RequestProcessor> =
    PluginExtensionPoint::new("dispatcher", "processors");

pub const FILTERS: PluginExtensionPoint<dyn RequestFilter> =
    PluginExtensionPoint::new("dispatcher", "filters");

/// How a processor finished. Both variants are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The response was prepared normally.
    Continue,
    /// The response is complete; nothing else should touch the body.
    Done,
}

/// What the after-filters are told about the processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Normal,
    EarlyExit,
}

impl From<Flow> for Completion {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::Continue => Completion::Normal,
            Flow::Done => Completion::EarlyExit,
        }
    }
}

pub trait RequestProcessor: Send + Sync {
    /// Whether this processor handles the request. May store arguments
    /// extracted from the path.
    fn match_request(&self, req: &mut Request) -> bool;

    fn process_request(&self, env: &Environment, req: &Request, res: &mut Response)
    -> Result<Flow>;
}

pub trait RequestFilter: Send + Sync {
    fn before(&self, _env: &Environment, _req: &mut Request, _res: &mut Response) -> Result<()> {
        Ok(())
    }

    fn after(
        &self,
        _env: &Environment,
        _req: &Request,
        _res: &mut Response,
        _completion: &Completion,
    ) {
    }
}

pub struct RequestDispatcher<'a> {
    env: &'a Environment,
}

impl<'a> RequestDispatcher<'a> {
    pub fn new(env: &'a Environment) -> Self {
        RequestDispatcher { env }
    }

    /// Filters listed in `[web] filters`, in that order.
    fn enabled_filters(&self) -> Result<Vec<Arc<dyn RequestFilter>>> {
        let enabled = &self.env.config().web.filters;
        let proxy = self.env.plugins().extensions(&FILTERS);
        for name in enabled {
            if !proxy.ids().contains(name) {
                warn!("Request filter \"{}\" is enabled but not registered", name);
            }
        }
        let position = |id: &str| enabled.iter().position(|name| name == id);
        proxy
            .constrain(|id| position(id).is_some())
            .order(|a, b| position(a).cmp(&position(b)))
            .collect()
    }

    fn select(&self, req: &Request) -> Result<(Arc<dyn RequestProcessor>, Request)> {
        let processors = self.env.plugins().extensions(&PROCESSORS);

        if req.path_info.is_empty() || req.path_info == "/" {
            let default = self.env.config().web.default.as_deref().ok_or_else(|| {
                TracError::Internal("No default handler configured".to_string())
            })?;
            // A default naming no enabled processor matches nothing.
            let processor = processors.get(default)?.ok_or_else(|| TracError::NoProcessor {
                path: req.path_info.clone(),
            })?;
            return Ok((processor, req.clone()));
        }

        let mut matched = Vec::new();
        for (id, processor) in processors.named()? {
            let mut candidate = req.clone();
            if processor.match_request(&mut candidate) {
                matched.push((id, processor, candidate));
            }
        }
        match matched.len() {
            0 => Err(TracError::NoProcessor {
                path: req.path_info.clone(),
            }),
            1 => {
                let (id, processor, candidate) = matched.remove(0);
                debug!("{} handled by {}", req.path_info, id);
                Ok((processor, candidate))
            }
            _ => Err(TracError::AmbiguousRoute {
                path: req.path_info.clone(),
                processors: matched.into_iter().map(|(id, _, _)| id).collect(),
            }),
        }
    }

    /// Run the filters and the matching processor. Errors propagate
    /// without running the after-filters.
    pub fn dispatch(&self, mut req: Request) -> Result<Response> {
        let mut res = Response::default();
        let filters = self.enabled_filters()?;
        for filter in &filters {
            filter.before(self.env, &mut req, &mut res)?;
        }

        let (processor, req) = self.select(&req)?;
        let flow = processor.process_request(self.env, &req, &mut res)?;

        let completion = Completion::from(flow);
        for filter in filters.iter().rev() {
            filter.after(self.env, &req, &mut res, &completion);
        }
        Ok(res)
    }
}
