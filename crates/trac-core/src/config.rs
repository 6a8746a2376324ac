//! Environment configuration loaded from `trac.toml`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TracError};

/// Configuration file name inside an environment directory.
pub const CONFIG_FILE: &str = "trac.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub trac: TracSection,
    pub web: WebSection,
    pub changeset: ChangesetSection,
    pub diff: DiffSection,
    pub browser: BrowserSection,
    pub database: DatabaseSection,
    pub permissions: PermissionsSection,
    pub objects: ObjectsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TracSection {
    /// Repository dump loaded into the in-memory backend, relative to the
    /// environment directory.
    pub repository: Option<PathBuf>,
    pub default_charset: String,
}

impl Default for TracSection {
    fn default() -> Self {
        TracSection {
            repository: Some(PathBuf::from("repository.json")),
            default_charset: "iso-8859-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSection {
    /// Id of the processor serving `/`.
    pub default: Option<String>,
    /// Enabled request filters, in execution order.
    pub filters: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        WebSection {
            default: Some("changeset".to_string()),
            filters: vec!["timing".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChangesetSection {
    /// Maximum number of files with inline diffs; 0 means unlimited.
    pub max_diff_files: usize,
    /// Maximum total size of old and new content with inline diffs.
    pub max_diff_bytes: u64,
    pub wiki_format_messages: bool,
}

impl Default for ChangesetSection {
    fn default() -> Self {
        ChangesetSection {
            max_diff_files: 0,
            max_diff_bytes: 10_000_000,
            wiki_format_messages: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiffSection {
    pub tab_width: usize,
}

impl Default for DiffSection {
    fn default() -> Self {
        DiffSection { tab_width: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserSection {
    /// Glob patterns of node properties never shown.
    pub hide_properties: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        BrowserSection {
            hide_properties: vec!["svk:merge".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSection {
    pub pool_size: usize,
    /// Seconds to wait for a free connection; 0 waits forever.
    pub timeout: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        DatabaseSection {
            pool_size: 5,
            timeout: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PermissionsSection {
    pub anonymous: Vec<String>,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        PermissionsSection {
            anonymous: ["CHANGESET_VIEW", "FILE_VIEW", "BROWSER_VIEW", "XREF_VIEW"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObjectsSection {
    /// JSON file holding wiki pages, tickets, milestones and reports.
    pub content: Option<PathBuf>,
}

impl Default for ObjectsSection {
    fn default() -> Self {
        ObjectsSection {
            content: Some(PathBuf::from("objects.json")),
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    /// Load `trac.toml` from an environment directory.
    pub fn load_from_env(env_dir: &Path) -> Result<Self> {
        Self::load(&env_dir.join(CONFIG_FILE))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TracError::Config(e.to_string()))
    }

    /// Database wait deadline, `None` meaning no deadline.
    pub fn db_timeout(&self) -> Option<std::time::Duration> {
        match self.database.timeout {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

impl FromStr for Config {
    type Err = TracError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = "[web]\ndefault = \"xref\"\n[changeset]\nmax_diff_files = 3\n"
            .parse()
            .unwrap();
        assert_eq!(config.web.default.as_deref(), Some("xref"));
        assert_eq!(config.web.filters, vec!["timing".to_string()]);
        assert_eq!(config.changeset.max_diff_files, 3);
        assert_eq!(config.changeset.max_diff_bytes, 10_000_000);
        assert_eq!(config.diff.tab_width, 8);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config: Config = "[mystery]\nvalue = 1\n[trac]\nfoo = \"bar\"\n".parse().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_env(dir.path()).unwrap();
        assert_eq!(config.database.pool_size, 5);
        assert_eq!(config.db_timeout(), Some(std::time::Duration::from_secs(20)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = "[web\n".parse::<Config>().unwrap_err();
        assert!(matches!(err, TracError::Config(_)));
    }
}
