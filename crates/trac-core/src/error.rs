//! Error taxonomy shared by every Trac crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TracError>;

/// Errors surfaced by the component layer, the engines and the dispatcher.
#[derive(Debug, Error)]
pub enum TracError {
    /// A changeset, node, ticket or page does not exist.
    #[error("{message}")]
    NotFound { title: String, message: String },

    /// The request lacks the named capability.
    #[error("{action} privileges are required to perform this operation")]
    PermissionDenied { action: String },

    #[error("No handler matched request to {path}")]
    NoProcessor { path: String },

    #[error("More than one handler matched the request to {path} ({})", .processors.join(", "))]
    AmbiguousRoute { path: String, processors: Vec<String> },

    #[error("Component \"{name}\" not registered")]
    ComponentNotRegistered { name: String },

    #[error("Unable to instantiate component \"{name}\" ({reason})")]
    Instantiate { name: String, reason: String },

    #[error("No plugin with ID \"{id}\" registered")]
    NoSuchPlugin { id: String },

    #[error("Cannot register \"{name}\": the registry is frozen")]
    RegistryFrozen { name: String },

    #[error("Component \"{name}\" does not provide {interface}")]
    InterfaceMismatch { name: String, interface: String },

    /// Adding a relation would close a loop; `path` is the full cycle.
    #[error("{}", cycle_message(.path))]
    CycleDetected { path: Vec<String> },

    #[error("Unable to get database connection within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Internal(String),

    #[error("{message}")]
    Generic { title: String, message: String },
}

fn cycle_message(path: &[String]) -> String {
    match path {
        [first, second, ..] => format!(
            "Adding relation {} → {} would create a cycle, because of the following relation(s): {}",
            first,
            second,
            path[1..].join(" → ")
        ),
        _ => format!("Cycle detected: {}", path.join(" → ")),
    }
}

impl TracError {
    pub fn not_found(title: impl Into<String>, message: impl Into<String>) -> Self {
        TracError::NotFound {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn generic(title: impl Into<String>, message: impl Into<String>) -> Self {
        TracError::Generic {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(action: impl Into<String>) -> Self {
        TracError::PermissionDenied {
            action: action.into(),
        }
    }

    /// HTTP status code used when the error reaches the web boundary.
    pub fn status(&self) -> u16 {
        match self {
            TracError::NotFound { .. } | TracError::NoProcessor { .. } => 404,
            TracError::PermissionDenied { .. } => 403,
            TracError::CycleDetected { .. } | TracError::Generic { .. } => 400,
            TracError::Timeout { .. } => 503,
            _ => 500,
        }
    }

    /// Short title for error pages.
    pub fn title(&self) -> String {
        match self {
            TracError::NotFound { title, .. } | TracError::Generic { title, .. } => title.clone(),
            TracError::PermissionDenied { .. } => "Permission Denied".to_string(),
            TracError::NoProcessor { .. } => "Not Found".to_string(),
            TracError::CycleDetected { .. } => "Cycle Detected".to_string(),
            TracError::Timeout { .. } => "Service Unavailable".to_string(),
            _ => "Internal Error".to_string(),
        }
    }
}

impl From<serde_json::Error> for TracError {
    fn from(e: serde_json::Error) -> Self {
        TracError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TracError {
    fn from(e: toml::de::Error) -> Self {
        TracError::Config(e.to_string())
    }
}
