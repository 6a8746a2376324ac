//! Unit tests for the registries

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::*;

trait Observer: Send + Sync {
    fn name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
struct Alpha;

impl Observer for Alpha {
    fn name(&self) -> &'static str {
        "alpha"
    }
}

#[derive(Default)]
struct Beta;

impl Observer for Beta {
    fn name(&self) -> &'static str {
        "beta"
    }
}

#[derive(Default)]
struct Subject;

const OBSERVERS: ExtensionPoint<dyn Observer> = ExtensionPoint::new("Subject", "observers");

fn sample_registry() -> Arc<ComponentRegistry> {
    let registry = Arc::new(ComponentRegistry::new());
    registry
        .register(ComponentDescriptor::<Subject>::with_default("Subject"))
        .unwrap();
    registry
        .register(
            ComponentDescriptor::<Beta>::with_default("Beta")
                .implements::<dyn Observer>(|c| c)
                .extends(&OBSERVERS),
        )
        .unwrap();
    registry
        .register(
            ComponentDescriptor::<Alpha>::with_default("Alpha")
                .implements::<dyn Observer>(|c| c)
                .extends(&OBSERVERS),
        )
        .unwrap();
    registry
}

#[test]
fn test_component_is_singleton_per_manager() {
    let registry = sample_registry();
    let manager = ComponentManager::new(Arc::clone(&registry));

    let first = manager.component::<Subject>("Subject").unwrap();
    let second = manager.component::<Subject>("Subject").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = ComponentManager::new(registry);
    let foreign = other.component::<Subject>("Subject").unwrap();
    assert!(!Arc::ptr_eq(&first, &foreign));
}

#[test]
fn test_extensions_follow_registration_order() {
    let manager = ComponentManager::new(sample_registry());
    let names: Vec<_> = manager
        .extensions(&OBSERVERS)
        .unwrap()
        .iter()
        .map(|o| o.name())
        .collect();
    assert_eq!(names, vec!["beta", "alpha"]);
}

#[test]
fn test_extensions_are_the_named_singletons() {
    let manager = ComponentManager::new(sample_registry());
    let extensions = OBSERVERS.extensions(&manager).unwrap();
    let beta = manager.interface::<dyn Observer>("Beta").unwrap();
    assert!(Arc::ptr_eq(&extensions[0], &beta));

    let concrete = manager.component::<Beta>("Beta").unwrap();
    let erased = manager.get("Beta").unwrap();
    assert!(Arc::ptr_eq(&(concrete as Instance), &erased));
}

#[test]
fn test_late_registration_is_visible_without_invalidation() {
    #[derive(Default)]
    struct Gamma;
    impl Observer for Gamma {
        fn name(&self) -> &'static str {
            "gamma"
        }
    }

    let registry = sample_registry();
    let manager = ComponentManager::new(Arc::clone(&registry));
    assert_eq!(manager.extensions(&OBSERVERS).unwrap().len(), 2);

    registry
        .register(
            ComponentDescriptor::<Gamma>::with_default("Gamma")
                .implements::<dyn Observer>(|c| c)
                .extends(&OBSERVERS),
        )
        .unwrap();
    let names: Vec<_> = manager
        .extensions(&OBSERVERS)
        .unwrap()
        .iter()
        .map(|o| o.name())
        .collect();
    assert_eq!(names, vec!["beta", "alpha", "gamma"]);
}

#[test]
fn test_unknown_component_is_not_registered() {
    let manager = ComponentManager::new(sample_registry());
    let err = manager.get("Missing").unwrap_err();
    assert!(matches!(err, TracError::ComponentNotRegistered { .. }));
    assert_eq!(err.to_string(), "Component \"Missing\" not registered");
}

#[test]
fn test_failing_constructor_reports_instantiate() {
    struct Broken;
    let registry = Arc::new(ComponentRegistry::new());
    registry
        .register(ComponentDescriptor::<Broken>::new("Broken", |_| {
            Err(TracError::Config("missing option".to_string()))
        }))
        .unwrap();
    let manager = ComponentManager::new(registry);
    let err = manager.get("Broken").unwrap_err();
    assert!(err.to_string().starts_with("Unable to instantiate component \"Broken\""));
    assert!(!manager.contains("Broken"));
}

#[test]
fn test_wrong_interface_is_mismatch() {
    let manager = ComponentManager::new(sample_registry());
    let err = manager.interface::<dyn Observer>("Subject").unwrap_err();
    assert!(matches!(err, TracError::InterfaceMismatch { .. }));
}

#[test]
fn test_factory_may_resolve_other_components() {
    struct Consumer {
        observers: usize,
    }
    let registry = sample_registry();
    registry
        .register(ComponentDescriptor::new("Consumer", |manager: &ComponentManager| {
            Ok(Consumer {
                observers: manager.extensions(&OBSERVERS)?.len(),
            })
        }))
        .unwrap();
    let manager = ComponentManager::new(registry);
    assert_eq!(manager.component::<Consumer>("Consumer").unwrap().observers, 2);
    assert!(manager.contains("Alpha"));
}

#[test]
fn test_activation_hook_runs_once() {
    let manager = ComponentManager::new(sample_registry());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.on_activate(Arc::new(move |name: &str, _: &Instance| {
        sink.lock().unwrap().push(name.to_string())
    }));

    manager.get("Subject").unwrap();
    manager.get("Subject").unwrap();
    manager.get("Alpha").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["Subject", "Alpha"]);
}

#[test]
fn test_concurrent_lookups_share_one_instance() {
    let manager = Arc::new(ComponentManager::new(sample_registry()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.component::<Alpha>("Alpha").unwrap())
        })
        .collect();
    let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(manager.active_count(), 1);
}

// ── Plugins ─────────────────────────────────────────────

trait Step: Send + Sync {
    fn label(&self) -> String;
}

struct Numbered(&'static str);

impl Step for Numbered {
    fn label(&self) -> String {
        self.0.to_string()
    }
}

const STEPS: PluginExtensionPoint<dyn Step> = PluginExtensionPoint::new("pipeline", "steps");

#[derive(Default)]
struct Recorder {
    activated: Mutex<Vec<String>>,
}

impl PluginActivationListener for Recorder {
    fn plugin_activated(&self, id: &str, _plugin: &Instance) {
        self.activated.lock().unwrap().push(id.to_string());
    }
}

fn plugin_registry() -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    for class in ["CompilePlugin", "LinkPlugin", "TestPlugin"] {
        let label = class.trim_end_matches("Plugin");
        registry
            .register(
                PluginDescriptor::new(class, move || Ok(Numbered(label)))
                    .implements::<dyn Step>(|p| p)
                    .extends(&STEPS),
            )
            .unwrap();
    }
    registry
        .register(
            PluginDescriptor::<Recorder>::with_default("RecorderPlugin")
                .implements::<dyn PluginActivationListener>(|p| p)
                .extends(&ACTIVATION_LISTENERS),
        )
        .unwrap();
    registry
}

fn labels(proxy: &ExtensionsProxy<'_, dyn Step>) -> Vec<String> {
    proxy.iter().map(|step| step.unwrap().label()).collect()
}

#[test]
fn test_proxy_constrain_order_reverse() {
    let manager = PluginManager::new(plugin_registry());
    let steps = manager.extensions(&STEPS);
    assert_eq!(steps.ids(), ["compile", "link", "test"]);

    let constrained = steps.constrain(|id| id != "link");
    assert_eq!(labels(&constrained), vec!["Compile", "Test"]);

    let ordered = steps.order(|a, b| b.cmp(a));
    assert_eq!(ordered.ids(), ["test", "link", "compile"]);

    let reversed = steps.constrain(|id| id != "test").reverse();
    assert_eq!(labels(&reversed), vec!["Link", "Compile"]);

    // Narrowing never touches the original proxy.
    assert_eq!(steps.len(), 3);
}

#[test]
fn test_proxy_get_outside_ids_is_none() {
    let manager = PluginManager::new(plugin_registry());
    let steps = manager.extensions(&STEPS).constrain(|id| id == "link");
    assert!(steps.get("compile").unwrap().is_none());
    assert_eq!(steps.get("link").unwrap().unwrap().label(), "Link");
    assert!(!manager.is_active("compile"));
}

#[test]
fn test_unknown_plugin_id() {
    let manager = PluginManager::new(plugin_registry());
    let err = manager.plugin("nope").unwrap_err();
    assert_eq!(err.to_string(), "No plugin with ID \"nope\" registered");
}

#[test]
fn test_activation_listeners_see_each_plugin_once() {
    let manager = PluginManager::new(plugin_registry());
    manager.plugin("compile").unwrap();
    manager.plugin("compile").unwrap();
    manager.plugin("test").unwrap();

    let recorder = manager.plugin("recorder").unwrap().downcast::<Recorder>().unwrap();
    let activated = recorder.activated.lock().unwrap().clone();
    assert_eq!(activated, vec!["recorder", "compile", "test"]);
}

#[test]
fn test_plugin_counter_survives_many_lookups() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);
    let registry = Arc::new(PluginRegistry::new());
    registry
        .register(PluginDescriptor::new("CountingPlugin", || {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
    let manager = PluginManager::new(registry);
    for _ in 0..5 {
        manager.plugin("counting").unwrap();
    }
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
}
