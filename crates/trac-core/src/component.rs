//! Component registry and per-environment component managers
//!
//! Components are registered explicitly through [`ComponentDescriptor`]s at
//! process start. A [`ComponentManager`] lazily instantiates each component
//! once and resolves typed [`ExtensionPoint`]s to the singleton instances
//! of every component extending them, in registration order.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, TracError};
use crate::interface::{Instance, InterfaceTable};

type Factory = Arc<dyn Fn(&ComponentManager) -> Result<Instance> + Send + Sync>;

/// Called once per component, right after its first instantiation.
pub type ActivationHook = Arc<dyn Fn(&str, &Instance) + Send + Sync>;

/// Identifies an extension point: the declaring component and the
/// attribute name it was declared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionPointKey {
    pub component: String,
    pub name: String,
}

impl ExtensionPointKey {
    pub fn new(component: impl Into<String>, name: impl Into<String>) -> Self {
        ExtensionPointKey {
            component: component.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ExtensionPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.name)
    }
}

/// A typed extension point declared by a component.
pub struct ExtensionPoint<I: ?Sized> {
    component: &'static str,
    name: &'static str,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized> ExtensionPoint<I> {
    pub const fn new(component: &'static str, name: &'static str) -> Self {
        ExtensionPoint {
            component,
            name,
            _interface: PhantomData,
        }
    }

    pub fn key(&self) -> ExtensionPointKey {
        ExtensionPointKey::new(self.component, self.name)
    }

    /// Resolve this point against a manager.
    pub fn extensions(&self, manager: &ComponentManager) -> Result<Vec<Arc<I>>>
    where
        I: 'static,
    {
        manager.extensions(self)
    }
}

impl<I: ?Sized> fmt::Display for ExtensionPoint<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ExtensionPoint {} declared by {}>",
            type_name::<I>(),
            self.component
        )
    }
}

/// Everything the registry needs to know about one component type.
pub struct ComponentDescriptor<C> {
    name: String,
    factory: Factory,
    interfaces: InterfaceTable,
    extends: Vec<ExtensionPointKey>,
    _component: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> ComponentDescriptor<C> {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ComponentManager) -> Result<C> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |manager: &ComponentManager| {
            factory(manager).map(|component| Arc::new(component) as Instance)
        });
        ComponentDescriptor {
            name: name.into(),
            factory,
            interfaces: InterfaceTable::default(),
            extends: Vec::new(),
            _component: PhantomData,
        }
    }

    /// Declare that the component can be used through interface `I`.
    pub fn implements<I: ?Sized + 'static>(mut self, cast: fn(Arc<C>) -> Arc<I>) -> Self {
        self.interfaces.insert::<C, I>(cast);
        self
    }

    /// Declare that the component extends the given extension point.
    pub fn extends<I: ?Sized>(mut self, point: &ExtensionPoint<I>) -> Self {
        self.extends.push(point.key());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C: Any + Send + Sync + Default> ComponentDescriptor<C> {
    /// Descriptor for a component built with its no-argument constructor.
    pub fn with_default(name: impl Into<String>) -> Self {
        Self::new(name, |_| Ok(C::default()))
    }
}

struct ComponentEntry {
    name: String,
    type_name: &'static str,
    factory: Factory,
    interfaces: InterfaceTable,
}

#[derive(Default)]
struct RegistryTables {
    components: HashMap<String, Arc<ComponentEntry>>,
    extension_points: HashMap<ExtensionPointKey, Vec<String>>,
    order: Vec<String>,
}

/// Process-wide table of component types and extension point wiring.
///
/// Shared by every manager through an `Arc`; written during start-up and
/// read-only once frozen.
#[derive(Default)]
pub struct ComponentRegistry {
    tables: RwLock<RegistryTables>,
    frozen: AtomicBool,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. A name registered twice keeps its latest
    /// descriptor.
    pub fn register<C: Any + Send + Sync>(&self, descriptor: ComponentDescriptor<C>) -> Result<()> {
        if self.is_frozen() {
            return Err(TracError::RegistryFrozen {
                name: descriptor.name,
            });
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let name = descriptor.name.clone();

        if tables.components.contains_key(&name) {
            debug!("Replacing component registration for {}", name);
            for extenders in tables.extension_points.values_mut() {
                extenders.retain(|n| n != &name);
            }
        } else {
            tables.order.push(name.clone());
        }

        for key in descriptor.extends {
            tables
                .extension_points
                .entry(key)
                .or_default()
                .push(name.clone());
        }

        tables.components.insert(
            name.clone(),
            Arc::new(ComponentEntry {
                name,
                type_name: type_name::<C>(),
                factory: descriptor.factory,
                interfaces: descriptor.interfaces,
            }),
        );
        Ok(())
    }

    /// Stop accepting registrations.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read().components.contains_key(name)
    }

    /// Names of the components extending `key`, in registration order.
    pub fn extenders(&self, key: &ExtensionPointKey) -> Vec<String> {
        self.read()
            .extension_points
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Every registered component name, in registration order.
    pub fn component_names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Interfaces a component was registered with.
    pub fn interfaces_of(&self, name: &str) -> Vec<&'static str> {
        self.entry(name)
            .map(|entry| entry.interfaces.names())
            .unwrap_or_default()
    }

    fn entry(&self, name: &str) -> Option<Arc<ComponentEntry>> {
        self.read().components.get(name).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryTables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        f.debug_struct("ComponentRegistry")
            .field("components", &tables.order)
            .field("extension_points", &tables.extension_points.len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// Keeps the pool of active components for one environment.
pub struct ComponentManager {
    registry: Arc<ComponentRegistry>,
    components: DashMap<String, Instance>,
    hooks: RwLock<Vec<ActivationHook>>,
}

impl ComponentManager {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        ComponentManager {
            registry,
            components: DashMap::new(),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Whether the named component has already been activated here.
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Number of activated components.
    pub fn active_count(&self) -> usize {
        self.components.len()
    }

    /// Register a hook run after each component's first instantiation.
    pub fn on_activate(&self, hook: ActivationHook) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    /// Return the singleton instance of the named component, creating it on
    /// first access.
    pub fn get(&self, name: &str) -> Result<Instance> {
        if let Some(component) = self.components.get(name) {
            return Ok(Arc::clone(component.value()));
        }

        let entry = self
            .registry
            .entry(name)
            .ok_or_else(|| TracError::ComponentNotRegistered {
                name: name.to_string(),
            })?;

        let created = (entry.factory)(self).map_err(|e| TracError::Instantiate {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        // Another thread may have won the race; its instance is the singleton.
        let mut activated = false;
        let component = Arc::clone(
            self.components
                .entry(entry.name.clone())
                .or_insert_with(|| {
                    activated = true;
                    created
                })
                .value(),
        );

        if activated {
            debug!("Activated component {} ({})", entry.name, entry.type_name);
            let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner()).clone();
            for hook in hooks {
                hook(&entry.name, &component);
            }
        }

        Ok(component)
    }

    /// Typed lookup of a component by name.
    pub fn component<C: Any + Send + Sync>(&self, name: &str) -> Result<Arc<C>> {
        self.get(name)?
            .downcast::<C>()
            .map_err(|_| TracError::InterfaceMismatch {
                name: name.to_string(),
                interface: type_name::<C>().to_string(),
            })
    }

    /// Look up a component through one of its declared interfaces.
    pub fn interface<I: ?Sized + 'static>(&self, name: &str) -> Result<Arc<I>> {
        let instance = self.get(name)?;
        self.registry
            .entry(name)
            .and_then(|entry| entry.interfaces.cast::<I>(&instance))
            .ok_or_else(|| TracError::InterfaceMismatch {
                name: name.to_string(),
                interface: type_name::<I>().to_string(),
            })
    }

    /// Resolve an extension point. The registry is re-walked on every call.
    pub fn extensions<I: ?Sized + 'static>(&self, point: &ExtensionPoint<I>) -> Result<Vec<Arc<I>>> {
        self.registry
            .extenders(&point.key())
            .iter()
            .map(|name| self.interface::<I>(name))
            .collect()
    }
}

impl fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("active", &self.components.len())
            .finish()
    }
}
