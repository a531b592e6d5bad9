//! Configuration management with layered hierarchy
//!
//! Sources, lowest to highest priority: built-in defaults, the global user
//! config, the local `dsml.yaml` (or an explicit `--config` file),
//! `DSML_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DATABASE: &str = "dsml.db";
pub const DEFAULT_FLUSH_EVERY: usize = 53;
pub const LOCAL_CONFIG_FILE: &str = "dsml.yaml";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(code(dsml::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(code(dsml::config::parse), help("check the YAML syntax and field names"))]
    Parse { path: PathBuf, message: String },

    #[error("invalid value {value:?} for {name}")]
    #[diagnostic(code(dsml::config::value))]
    InvalidValue { name: String, value: String },
}

/// Table names used by the dataset schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableNames {
    pub features: String,
    pub feature_parameters: String,
    pub samples: String,
    pub values: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            features: "features".to_string(),
            feature_parameters: "feature_parameters".to_string(),
            samples: "samples".to_string(),
            values: "values".to_string(),
        }
    }
}

/// Per-table overrides as they appear in a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TablesConfig {
    pub features: Option<String>,
    pub feature_parameters: Option<String>,
    pub samples: Option<String>,
    pub values: Option<String>,
}

impl TablesConfig {
    fn merge(&mut self, other: TablesConfig) {
        if other.features.is_some() {
            self.features = other.features;
        }
        if other.feature_parameters.is_some() {
            self.feature_parameters = other.feature_parameters;
        }
        if other.samples.is_some() {
            self.samples = other.samples;
        }
        if other.values.is_some() {
            self.values = other.values;
        }
    }
}

/// DSML configuration with layered hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database file
    pub database: Option<PathBuf>,

    /// Samples scanned between two flushes
    pub flush_every: Option<usize>,

    /// Log filter, `tracing_subscriber::EnvFilter` syntax
    pub log: Option<String>,

    pub tables: TablesConfig,
}

impl Config {
    /// Load configuration from all file and environment sources
    ///
    /// `local` replaces the default `./dsml.yaml`; unlike the default it
    /// must exist.
    pub fn load(local: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Global user config (~/.config/dsml/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.merge(Self::from_file(&global_path)?);
            }
        }

        match local {
            Some(path) => config.merge(Self::from_file(path)?),
            None => {
                let path = Path::new(LOCAL_CONFIG_FILE);
                if path.exists() {
                    config.merge(Self::from_file(path)?);
                }
            }
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Get the path to the global config file
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dsml")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &contents)
    }

    fn from_yaml(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `DSML_DATABASE`, `DSML_FLUSH_EVERY` and `DSML_LOG`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(database) = var("DSML_DATABASE") {
            self.database = Some(PathBuf::from(database));
        }
        if let Some(raw) = var("DSML_FLUSH_EVERY") {
            self.flush_every = Some(parse_flush_every("DSML_FLUSH_EVERY", &raw)?);
        }
        if let Some(log) = var("DSML_LOG") {
            self.log = Some(log);
        }
        Ok(())
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        if other.database.is_some() {
            self.database = other.database;
        }
        if other.flush_every.is_some() {
            self.flush_every = other.flush_every;
        }
        if other.log.is_some() {
            self.log = other.log;
        }
        self.tables.merge(other.tables);
    }

    pub fn database(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    pub fn flush_every(&self) -> usize {
        match self.flush_every {
            Some(n) if n > 0 => n,
            _ => DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn table_names(&self) -> TableNames {
        let defaults = TableNames::default();
        let t = &self.tables;
        TableNames {
            features: t.features.clone().unwrap_or(defaults.features),
            feature_parameters: t
                .feature_parameters
                .clone()
                .unwrap_or(defaults.feature_parameters),
            samples: t.samples.clone().unwrap_or(defaults.samples),
            values: t.values.clone().unwrap_or(defaults.values),
        }
    }
}

/// Flush intervals must be positive
pub fn parse_flush_every(name: &str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}
