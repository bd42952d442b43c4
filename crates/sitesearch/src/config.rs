//! Configuration handling for sitesearch.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sitesearch_core::{RecursiveUpdateTrigger, SiteConfiguration, DEFAULT_ALLOWED_PAGE_TYPES};
use sitesearch_index::IndexQueueConfig;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Index queue configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Sites and their indexing configurations
    #[serde(default)]
    pub sites: Vec<SiteConfiguration>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index queue tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Page types that may be indexed
    #[serde(default = "default_allowed_page_types")]
    pub allowed_page_types: Vec<i64>,

    /// Queue records stored outside a site root for sites listing their page
    #[serde(default = "default_track_records_outside_siteroot")]
    pub track_records_outside_siteroot: bool,

    /// Requeue rules added to the built-in ones
    #[serde(default)]
    pub requeue_triggers: Vec<RecursiveUpdateTrigger>,

    /// Garbage rules added to the built-in ones
    #[serde(default)]
    pub garbage_triggers: Vec<RecursiveUpdateTrigger>,
}

fn default_allowed_page_types() -> Vec<i64> {
    DEFAULT_ALLOWED_PAGE_TYPES.to_vec()
}

fn default_track_records_outside_siteroot() -> bool {
    true
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            allowed_page_types: default_allowed_page_types(),
            track_records_outside_siteroot: default_track_records_outside_siteroot(),
            requeue_triggers: Vec::new(),
            garbage_triggers: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the configuration from the default location.
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load the configuration from `path`, or from the default location.
    pub fn load_from(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let Some(path) = path.or_else(Self::config_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the index queue cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut roots = BTreeSet::new();
        for site in &self.sites {
            site.validate()?;
            if !roots.insert(site.root_page_id) {
                anyhow::bail!("Site root page {} is configured twice", site.root_page_id);
            }
        }
        for trigger in self
            .indexing
            .requeue_triggers
            .iter()
            .chain(&self.indexing.garbage_triggers)
        {
            trigger.validate()?;
        }
        Ok(())
    }

    /// Index queue configuration: built-in triggers plus configured ones.
    pub fn index_queue_config(&self) -> IndexQueueConfig {
        let mut config = IndexQueueConfig {
            allowed_page_types: self.indexing.allowed_page_types.clone(),
            track_records_outside_siteroot: self.indexing.track_records_outside_siteroot,
            ..IndexQueueConfig::default()
        };
        config
            .requeue_triggers
            .extend(self.indexing.requeue_triggers.iter().cloned());
        config
            .garbage_triggers
            .extend(self.indexing.garbage_triggers.iter().cloned());
        config
    }

    /// Default config file path.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Sample configuration file.
    pub fn sample_toml() -> &'static str {
        SAMPLE_TOML
    }
}

const SAMPLE_TOML: &str = r#"# sitesearch configuration

[indexing]
allowed_page_types = [1, 7]
track_records_outside_siteroot = true

# Requeue the subtree when a page leaves the "members" area
# [[indexing.requeue_triggers]]
# name = "members area opened"
# change_set = { fe_group = "0" }

[[sites]]
root_page_id = 1
domain = "example.org"
encryption_key = "change-me"

[sites.languages]
default_language_id = 0
available = [0, 1]

[[sites.indexing]]
name = "pages"

[[sites.indexing]]
name = "news"
table = "tx_news"
priority = 10
additional_where = "type = 0"

[logging]
level = "info"
"#;

/// Get the XDG config directory for sitesearch.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("SITESEARCH_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "sitesearch").map(|dirs| dirs.config_dir().to_path_buf())
}
