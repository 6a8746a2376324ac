//! String-keyed plugin registry
//!
//! Plugins are identified by an id derived from their class name and
//! extend dotted extension point ids such as `dispatcher.processors`.
//! Extensions are reached through an [`ExtensionsProxy`], which can be
//! filtered, sorted and reversed before any plugin is instantiated.

use std::any::{Any, type_name};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, TracError};
use crate::interface::{Instance, InterfaceTable};

type Factory = Arc<dyn Fn() -> Result<Instance> + Send + Sync>;

/// Observer notified right after a plugin is activated for the first time.
pub trait PluginActivationListener: Send + Sync {
    fn plugin_activated(&self, id: &str, plugin: &Instance);
}

/// Extension point every activation listener extends.
pub const ACTIVATION_LISTENERS: PluginExtensionPoint<dyn PluginActivationListener> =
    PluginExtensionPoint::new("plugin", "activation_listeners");

/// Derive a plugin id from its class name: `ChangesetPlugin` → `changeset`.
pub fn plugin_id_for(class_name: &str) -> String {
    class_name
        .strip_suffix("Plugin")
        .unwrap_or(class_name)
        .to_lowercase()
}

/// A typed extension point declared by a plugin, addressed as
/// `"<plugin>.<name>"`.
pub struct PluginExtensionPoint<I: ?Sized> {
    plugin: &'static str,
    name: &'static str,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized> PluginExtensionPoint<I> {
    pub const fn new(plugin: &'static str, name: &'static str) -> Self {
        PluginExtensionPoint {
            plugin,
            name,
            _interface: PhantomData,
        }
    }

    pub fn id(&self) -> String {
        format!("{}.{}", self.plugin, self.name)
    }
}

impl<I: ?Sized> fmt::Debug for PluginExtensionPoint<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin, self.name)
    }
}

pub struct PluginDescriptor<P> {
    id: String,
    class_name: String,
    factory: Factory,
    interfaces: InterfaceTable,
    extends: Vec<String>,
    _plugin: PhantomData<fn() -> P>,
}

impl<P: Any + Send + Sync> PluginDescriptor<P> {
    pub fn new<F>(class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<P> + Send + Sync + 'static,
    {
        let class_name = class_name.into();
        PluginDescriptor {
            id: plugin_id_for(&class_name),
            class_name,
            factory: Arc::new(move || factory().map(|plugin| Arc::new(plugin) as Instance)),
            interfaces: InterfaceTable::default(),
            extends: Vec::new(),
            _plugin: PhantomData,
        }
    }

    /// Override the id derived from the class name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn implements<I: ?Sized + 'static>(mut self, cast: fn(Arc<P>) -> Arc<I>) -> Self {
        self.interfaces.insert::<P, I>(cast);
        self
    }

    pub fn extends<I: ?Sized>(mut self, point: &PluginExtensionPoint<I>) -> Self {
        self.extends.push(point.id());
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.id
    }
}

impl<P: Any + Send + Sync + Default> PluginDescriptor<P> {
    pub fn with_default(class_name: impl Into<String>) -> Self {
        Self::new(class_name, || Ok(P::default()))
    }
}

struct PluginEntry {
    class_name: String,
    factory: Factory,
    interfaces: InterfaceTable,
}

#[derive(Default)]
struct PluginTables {
    plugins: HashMap<String, Arc<PluginEntry>>,
    extension_points: HashMap<String, Vec<String>>,
}

/// Process-wide plugin table, frozen once start-up registration is done.
#[derive(Default)]
pub struct PluginRegistry {
    tables: RwLock<PluginTables>,
    frozen: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Any + Send + Sync>(&self, descriptor: PluginDescriptor<P>) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(TracError::RegistryFrozen {
                name: descriptor.id,
            });
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let id = descriptor.id;
        if tables.plugins.contains_key(&id) {
            for ids in tables.extension_points.values_mut() {
                ids.retain(|existing| existing != &id);
            }
        }
        for point in descriptor.extends {
            tables
                .extension_points
                .entry(point)
                .or_default()
                .push(id.clone());
        }
        tables.plugins.insert(
            id,
            Arc::new(PluginEntry {
                class_name: descriptor.class_name,
                factory: descriptor.factory,
                interfaces: descriptor.interfaces,
            }),
        );
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Ids of the plugins extending `point`, in registration order.
    pub fn plugins_extending(&self, point: &str) -> Vec<String> {
        self.read()
            .extension_points
            .get(point)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.read().plugins.contains_key(id)
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn entry(&self, id: &str) -> Option<Arc<PluginEntry>> {
        self.read().plugins.get(id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PluginTables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}

/// Keeps track of active plugins and instantiates them on demand.
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    active: DashMap<String, Instance>,
}

impl PluginManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        PluginManager {
            registry,
            active: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Return a plugin by id, activating it on first use. Activation
    /// listeners run after the plugin is recorded as active.
    pub fn plugin(&self, id: &str) -> Result<Instance> {
        if let Some(plugin) = self.active.get(id) {
            return Ok(Arc::clone(plugin.value()));
        }

        let entry = self
            .registry
            .entry(id)
            .ok_or_else(|| TracError::NoSuchPlugin { id: id.to_string() })?;
        let created = (entry.factory)().map_err(|e| TracError::Instantiate {
            name: id.to_string(),
            reason: e.to_string(),
        })?;

        let mut activated = false;
        let plugin = Arc::clone(
            self.active
                .entry(id.to_string())
                .or_insert_with(|| {
                    activated = true;
                    created
                })
                .value(),
        );

        if activated {
            debug!("Activated plugin {} ({})", id, entry.class_name);
            for listener in self.extensions(&ACTIVATION_LISTENERS).iter() {
                listener?.plugin_activated(id, &plugin);
            }
        }
        Ok(plugin)
    }

    /// View a plugin through one of its declared interfaces.
    pub fn plugin_as<I: ?Sized + 'static>(&self, id: &str) -> Result<Arc<I>> {
        let plugin = self.plugin(id)?;
        self.registry
            .entry(id)
            .and_then(|entry| entry.interfaces.cast::<I>(&plugin))
            .ok_or_else(|| TracError::InterfaceMismatch {
                name: id.to_string(),
                interface: type_name::<I>().to_string(),
            })
    }

    pub fn extensions<I: ?Sized + 'static>(
        &self,
        point: &PluginExtensionPoint<I>,
    ) -> ExtensionsProxy<'_, I> {
        ExtensionsProxy {
            manager: self,
            ids: self.registry.plugins_extending(&point.id()),
            _interface: PhantomData,
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("active", &self.active.len())
            .finish()
    }
}

/// The plugins extending one point. Narrowing operations return a new
/// proxy; plugins are only instantiated when iterated or fetched.
pub struct ExtensionsProxy<'a, I: ?Sized> {
    manager: &'a PluginManager,
    ids: Vec<String>,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<'a, I: ?Sized + 'static> ExtensionsProxy<'a, I> {
    fn with_ids(&self, ids: Vec<String>) -> Self {
        ExtensionsProxy {
            manager: self.manager,
            ids,
            _interface: PhantomData,
        }
    }

    pub fn constrain(&self, mut keep: impl FnMut(&str) -> bool) -> Self {
        self.with_ids(self.ids.iter().filter(|id| keep(id)).cloned().collect())
    }

    pub fn order(&self, mut cmp: impl FnMut(&str, &str) -> CmpOrdering) -> Self {
        let mut ids = self.ids.clone();
        ids.sort_by(|a, b| cmp(a, b));
        self.with_ids(ids)
    }

    pub fn reverse(&self) -> Self {
        let mut ids = self.ids.clone();
        ids.reverse();
        self.with_ids(ids)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Fetch one extension; `Ok(None)` if `id` is not part of this proxy.
    pub fn get(&self, id: &str) -> Result<Option<Arc<I>>> {
        if !self.ids.iter().any(|candidate| candidate == id) {
            return Ok(None);
        }
        self.manager.plugin_as::<I>(id).map(Some)
    }

    /// Single-pass iterator activating each plugin as it is reached.
    pub fn iter(&self) -> Extensions<'_, I> {
        Extensions {
            manager: self.manager,
            ids: self.ids.iter(),
            _interface: PhantomData,
        }
    }

    pub fn collect(&self) -> Result<Vec<Arc<I>>> {
        self.iter().collect()
    }

    /// Pair every extension with its plugin id.
    pub fn named(&self) -> Result<Vec<(String, Arc<I>)>> {
        self.ids
            .iter()
            .map(|id| Ok((id.clone(), self.manager.plugin_as::<I>(id)?)))
            .collect()
    }
}

pub struct Extensions<'a, I: ?Sized> {
    manager: &'a PluginManager,
    ids: std::slice::Iter<'a, String>,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized + 'static> Iterator for Extensions<'_, I> {
    type Item = Result<Arc<I>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(self.manager.plugin_as::<I>(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}
