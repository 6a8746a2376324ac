//! Trac web front end: environment, request dispatching, processors and
//! the HTTP server

pub mod dispatcher;
pub mod environment;
pub mod handlers;
pub mod processors;
pub mod request;
pub mod router;
pub mod template;


use std::sync::Arc;

use tracing::info;

pub use dispatcher::{
    Completion, FILTERS, Flow, PROCESSORS, RequestDispatcher, RequestFilter, RequestProcessor,
};
pub use environment::{Environment, EnvironmentBuilder, XREF_FILE};
pub use request::{Request, Response};
pub use router::create_router;
pub use template::{JsonRenderer, TemplateRenderer};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// State shared by every handler.
#[derive(Debug)]
pub struct ServerState {
    pub env: Arc<Environment>,
}

impl ServerState {
    pub fn new(env: Environment) -> Self {
        ServerState { env: Arc::new(env) }
    }
}

pub struct TracServer {
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl TracServer {
    pub fn new(env: Environment, config: ServerConfig) -> Self {
        TracServer {
            state: Arc::new(ServerState::new(env)),
            config,
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.port)
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Listening on {}", self.url());
        axum::serve(listener, create_router(self.state)).await?;
        Ok(())
    }
}
