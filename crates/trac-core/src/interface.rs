//! Type-erased interface casts shared by the component and plugin registries

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

/// A live component or plugin instance, as stored in a manager.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Caster = Arc<dyn Fn(Instance) -> Option<Box<dyn Any>> + Send + Sync>;

/// Maps interface types to the cast that turns an erased instance into
/// `Arc<dyn Interface>`.
#[derive(Clone, Default)]
pub(crate) struct InterfaceTable {
    casters: HashMap<TypeId, (&'static str, Caster)>,
}

impl InterfaceTable {
    pub(crate) fn insert<C, I>(&mut self, cast: fn(Arc<C>) -> Arc<I>)
    where
        C: Any + Send + Sync,
        I: ?Sized + 'static,
    {
        let caster: Caster = Arc::new(move |instance: Instance| {
            instance
                .downcast::<C>()
                .ok()
                .map(|concrete| Box::new(cast(concrete)) as Box<dyn Any>)
        });
        self.casters
            .insert(TypeId::of::<I>(), (type_name::<I>(), caster));
    }

    pub(crate) fn cast<I: ?Sized + 'static>(&self, instance: &Instance) -> Option<Arc<I>> {
        let (_, caster) = self.casters.get(&TypeId::of::<I>())?;
        caster(Arc::clone(instance))?
            .downcast::<Arc<I>>()
            .ok()
            .map(|boxed| *boxed)
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.casters.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for InterfaceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
