//! Built-in request processors and filters

pub mod anydiff;
pub mod changeset;
pub mod timing;
pub mod xref;

use regex::Regex;
use trac_core::{PluginDescriptor, PluginRegistry, Result, TracError};

use crate::dispatcher::{FILTERS, PROCESSORS, RequestFilter, RequestProcessor};

pub use anydiff::AnydiffPlugin;
pub use changeset::{ChangesetPlugin, DiffPlugin};
pub use timing::TimingPlugin;
pub use xref::{OrphansPlugin, XrefPlugin};

pub(crate) fn route(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| TracError::Internal(format!("Invalid route {}: {}", pattern, e)))
}

fn processor<P>(class_name: &str, factory: fn() -> Result<P>) -> PluginDescriptor<P>
where
    P: RequestProcessor + 'static,
{
    PluginDescriptor::new(class_name, factory)
        .implements::<dyn RequestProcessor>(|p| p)
        .extends(&PROCESSORS)
}

/// Register the processors and filters shipped with the web front end.
pub fn register(registry: &PluginRegistry) -> Result<()> {
    registry.register(processor("ChangesetPlugin", ChangesetPlugin::new))?;
    registry.register(processor("DiffPlugin", DiffPlugin::new))?;
    registry.register(processor("AnydiffPlugin", AnydiffPlugin::new))?;
    registry.register(processor("XrefPlugin", XrefPlugin::new))?;
    registry.register(processor("OrphansPlugin", OrphansPlugin::new))?;
    registry.register(
        PluginDescriptor::<TimingPlugin>::with_default("TimingPlugin")
            .implements::<dyn RequestFilter>(|p| p)
            .extends(&FILTERS),
    )?;
    Ok(())
}
