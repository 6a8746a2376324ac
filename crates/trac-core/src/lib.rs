//! Trac Core: component registry, plugins, configuration and pooling

pub mod component;
pub mod config;
pub mod db;
pub mod error;
mod interface;
pub mod perm;
pub mod plugin;

#[cfg(test)]
pub mod tests;

pub use component::{
    ActivationHook, ComponentDescriptor, ComponentManager, ComponentRegistry, ExtensionPoint,
    ExtensionPointKey,
};
pub use config::{CONFIG_FILE, Config};
pub use db::{
    Connection, ConnectionPool, DatabaseBackend, MemoryConnection, MemoryDatabase,
    PooledConnection,
};
pub use error::{Result, TracError};
pub use interface::Instance;
pub use perm::PermissionSet;
pub use plugin::{
    ACTIVATION_LISTENERS, ExtensionsProxy, PluginActivationListener, PluginDescriptor,
    PluginExtensionPoint, PluginManager, PluginRegistry,
};
