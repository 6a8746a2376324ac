//! The Trac environment: configuration, registries, repository and
//! databases shared by every request

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use trac_core::{
    ComponentDescriptor, ComponentManager, ComponentRegistry, Config, ConnectionPool,
    PermissionSet, PluginManager, PluginRegistry, PooledConnection, Result,
};
use trac_versioncontrol::{
    CacheDatabase, CachedRepository, ChangesetEngine, MemoryRepository, Mimeview, Repository,
    RepositoryBuilder,
};
use trac_xref::{
    ChangesetObjects, ContentObjects, ContentStore, ObjectManager, OBJECT_MANAGERS, XREF_SYSTEM,
    XRefSystem, XrefDatabase, XrefGraph,
};

use crate::processors;
use crate::template::{JsonRenderer, TemplateRenderer};

/// Saved cross-reference graph inside the environment directory.
pub const XREF_FILE: &str = "xref.json";

type PluginSetup = Box<dyn FnOnce(&PluginRegistry) -> Result<()>>;

pub struct Environment {
    path: Option<PathBuf>,
    config: Config,
    components: ComponentManager,
    plugins: PluginManager,
    repository: Arc<CachedRepository>,
    xref_db: ConnectionPool<XrefDatabase>,
    mimeview: Mimeview,
    renderer: Arc<dyn TemplateRenderer>,
}

impl Environment {
    /// Open the environment stored in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let config = Config::load_from_env(dir)?;
        let repository = match &config.trac.repository {
            Some(file) if dir.join(file).exists() => MemoryRepository::load(&dir.join(file))?,
            Some(file) => {
                warn!(
                    "Repository dump {} not found, serving an empty repository",
                    dir.join(file).display()
                );
                RepositoryBuilder::new("default").build()?
            }
            None => RepositoryBuilder::new("default").build()?,
        };
        let graph = XrefGraph::load(&dir.join(XREF_FILE))?;
        let content = config.objects.content.as_ref().map(|file| dir.join(file));

        let mut builder = Environment::builder()
            .config(config)
            .repository(Arc::new(repository))
            .xref_graph(graph);
        builder.path = Some(dir.to_path_buf());
        builder.content = content.map(ContentSource::File);
        let env = builder.build()?;
        info!("Opened environment at {}", dir.display());
        Ok(env)
    }

    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn components(&self) -> &ComponentManager {
        &self.components
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// The cached repository facade.
    pub fn repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repository) as Arc<dyn Repository>
    }

    /// Bring the revision cache up to date with the backend.
    pub fn sync(&self) -> Result<usize> {
        self.repository.sync()
    }

    pub fn changeset_engine(&self) -> Result<ChangesetEngine> {
        ChangesetEngine::from_config(self.repository(), &self.config)
    }

    pub fn mimeview(&self) -> &Mimeview {
        &self.mimeview
    }

    pub fn renderer(&self) -> &dyn TemplateRenderer {
        self.renderer.as_ref()
    }

    /// Actions granted to unauthenticated requests.
    pub fn anonymous_permissions(&self) -> PermissionSet {
        self.config.permissions.anonymous.iter().cloned().collect()
    }

    pub fn xref(&self) -> Result<Arc<XRefSystem>> {
        self.components.component::<XRefSystem>(XREF_SYSTEM)
    }

    pub fn xref_cnx(&self) -> Result<PooledConnection<XrefDatabase>> {
        self.xref_db.get_cnx(self.config.db_timeout())
    }

    /// Write the committed cross-reference graph to the environment
    /// directory. In-memory environments keep it in memory only.
    pub fn save_xref(&self) -> Result<()> {
        if let Some(path) = &self.path {
            self.xref_db.backend().snapshot().save(&path.join(XREF_FILE))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.path)
            .field("repository", &self.repository.name())
            .field("components", &self.components)
            .field("plugins", &self.plugins)
            .finish()
    }
}

enum ContentSource {
    File(PathBuf),
    Memory(ContentStore),
}

/// Assembles an [`Environment`], in memory unless opened from a directory.
#[derive(Default)]
pub struct EnvironmentBuilder {
    path: Option<PathBuf>,
    config: Config,
    repository: Option<Arc<dyn Repository>>,
    content: Option<ContentSource>,
    graph: XrefGraph,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    plugin_setup: Vec<PluginSetup>,
}

impl EnvironmentBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Wiki pages, tickets, milestones and reports held in memory.
    pub fn content(mut self, content: ContentStore) -> Self {
        self.content = Some(ContentSource::Memory(content));
        self
    }

    pub fn xref_graph(mut self, graph: XrefGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Register additional plugins next to the built-in processors.
    pub fn plugins(mut self, setup: impl FnOnce(&PluginRegistry) -> Result<()> + 'static) -> Self {
        self.plugin_setup.push(Box::new(setup));
        self
    }

    pub fn build(self) -> Result<Environment> {
        let config = self.config;
        let backend = match self.repository {
            Some(repository) => repository,
            None => Arc::new(RepositoryBuilder::new("default").build()?),
        };
        let pool_size = config.database.pool_size;
        let repository = Arc::new(CachedRepository::new(
            backend,
            ConnectionPool::new(pool_size, CacheDatabase::default()),
            config.db_timeout(),
        ));

        let components = ComponentRegistry::new();
        trac_xref::register_components(&components)?;
        components.register(ChangesetObjects::descriptor(
            Arc::clone(&repository) as Arc<dyn Repository>
        ))?;
        match self.content {
            Some(ContentSource::File(path)) => components.register(ContentObjects::descriptor(path))?,
            Some(ContentSource::Memory(store)) => components.register(
                ComponentDescriptor::new("ContentObjects", move |_| {
                    Ok(ContentObjects::in_memory(store.clone()))
                })
                .implements::<dyn ObjectManager>(|c| c)
                .extends(&OBJECT_MANAGERS),
            )?,
            None => {}
        }
        components.freeze();

        let plugins = PluginRegistry::new();
        processors::register(&plugins)?;
        for setup in self.plugin_setup {
            setup(&plugins)?;
        }
        plugins.freeze();

        Ok(Environment {
            path: self.path,
            mimeview: Mimeview::new(&config.trac.default_charset),
            xref_db: ConnectionPool::new(pool_size, XrefDatabase::new(self.graph)),
            config,
            components: ComponentManager::new(Arc::new(components)),
            plugins: PluginManager::new(Arc::new(plugins)),
            repository,
            renderer: self.renderer.unwrap_or_else(|| Arc::new(JsonRenderer)),
        })
    }
}
