//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Stackshift has two configuration scopes:
//! - **Global**: User-level settings
//! - **Project**: Overrides for one infrastructure project
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Project config file
//! 4. Explicit options passed to an operation (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$STACKSHIFT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/stackshift/config.toml`
//! 3. `~/.stackshift/config.toml` (canonical write location)
//!
//! # Project Config Location
//!
//! `<project>/stackshift.toml`
//!
//! # Example
//!
//! ```no_run
//! use stackshift::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/path/to/project"))).unwrap();
//! let config = result.config;
//!
//! println!("Toolkit stack: {}", config.toolkit_stack_name());
//! println!("Deployment method: {}", config.deployment_method());
//! ```

pub mod schema;

pub use schema::{BootstrapConfig, ConfigFile, WaitConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Name of the bootstrap stack when nothing overrides it.
pub const DEFAULT_TOOLKIT_STACK_NAME: &str = "CDKToolkit";

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = "stackshift.toml";

/// Configured defaults for deploy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployDefaults {
    /// Deploy with update-stack instead of a change set
    pub direct: bool,
    pub rollback: bool,
    pub use_previous_parameters: bool,
    pub ci: bool,
}

impl Default for DeployDefaults {
    fn default() -> Self {
        Self {
            direct: false,
            rollback: true,
            use_previous_parameters: true,
            ci: false,
        }
    }
}

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence automatically: project config overrides
/// global config, which overrides defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: ConfigFile,
    pub project: Option<ConfigFile>,
    global_path: Option<PathBuf>,
    project_path: Option<PathBuf>,
    merged: ConfigFile,
}

impl Config {
    /// Build a config from already-parsed scopes.
    pub fn from_files(global: ConfigFile, project: Option<ConfigFile>) -> Self {
        let merged = match &project {
            Some(p) => global.merged_with(p),
            None => global.clone(),
        };
        Self {
            global,
            project,
            global_path: None,
            project_path: None,
            merged,
        }
    }

    /// Load configuration from default locations.
    ///
    /// If `project_dir` is provided, also loads `<project_dir>/stackshift.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or fail
    /// validation. Missing config files are not an error (defaults are used).
    pub fn load(project_dir: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let (global, global_path) = Self::load_global()?;

        let (project, project_path) = match project_dir {
            Some(dir) => {
                let path = dir.join(PROJECT_CONFIG_FILE);
                if path.exists() {
                    (Some(Self::read_config(&path)?), Some(path))
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };

        global.validate()?;
        if let Some(ref p) = project {
            p.validate()?;
        }

        let mut config = Self::from_files(global, project);
        config.global_path = global_path;
        config.project_path = project_path;

        tracing::debug!(
            global = ?config.global_path,
            project = ?config.project_path,
            "loaded configuration"
        );

        Ok(ConfigLoadResult { config })
    }

    /// Load global configuration from standard locations.
    fn load_global() -> Result<(ConfigFile, Option<PathBuf>), ConfigError> {
        // 1. Check $STACKSHIFT_CONFIG
        if let Ok(path) = std::env::var("STACKSHIFT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        // 2. Check $XDG_CONFIG_HOME/stackshift/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("stackshift/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        // 3. Check ~/.stackshift/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".stackshift/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((ConfigFile::default(), None))
    }

    fn read_config(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the canonical path for global config.
    ///
    /// Returns `~/.stackshift/config.toml`.
    pub fn global_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".stackshift/config.toml"))
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Name of the bootstrap stack.
    ///
    /// Defaults to `CDKToolkit`.
    pub fn toolkit_stack_name(&self) -> &str {
        self.merged
            .toolkit_stack_name
            .as_deref()
            .unwrap_or(DEFAULT_TOOLKIT_STACK_NAME)
    }

    /// Whether a toolkit stack name was configured explicitly.
    pub fn toolkit_stack_name_override(&self) -> Option<&str> {
        self.merged.toolkit_stack_name.as_deref()
    }

    /// Deployment method.
    ///
    /// Defaults to `"change-set"`.
    pub fn deployment_method(&self) -> &str {
        self.merged
            .deployment_method
            .as_deref()
            .unwrap_or("change-set")
    }

    /// Defaults to `true`.
    pub fn rollback(&self) -> bool {
        self.merged.rollback.unwrap_or(true)
    }

    /// Defaults to `true`.
    pub fn use_previous_parameters(&self) -> bool {
        self.merged.use_previous_parameters.unwrap_or(true)
    }

    /// Defaults to `false`.
    pub fn ci(&self) -> bool {
        self.merged.ci.unwrap_or(false)
    }

    /// Delay between status polls. Defaults to 5 seconds.
    pub fn poll_interval(&self) -> Duration {
        self.merged
            .wait
            .as_ref()
            .and_then(|w| w.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Maximum time to wait for the service. Unbounded when unset.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.merged
            .wait
            .as_ref()
            .and_then(|w| w.timeout_secs)
            .map(Duration::from_secs)
    }

    /// Defaults for deploy operations.
    pub fn deploy_defaults(&self) -> DeployDefaults {
        DeployDefaults {
            direct: self.deployment_method() == "direct",
            rollback: self.rollback(),
            use_previous_parameters: self.use_previous_parameters(),
            ci: self.ci(),
        }
    }

    /// Bootstrap defaults.
    pub fn bootstrap(&self) -> BootstrapConfig {
        self.merged.bootstrap.clone().unwrap_or_default()
    }

    /// Get the path to the loaded global config file.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the path to the loaded project config file.
    pub fn project_config_loaded_from(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_files() {
        let config = Config::from_files(ConfigFile::default(), None);

        assert_eq!(config.toolkit_stack_name(), "CDKToolkit");
        assert!(config.toolkit_stack_name_override().is_none());
        assert_eq!(config.deployment_method(), "change-set");
        assert!(config.rollback());
        assert!(config.use_previous_parameters());
        assert!(!config.ci());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(config.wait_timeout().is_none());
    }

    #[test]
    fn load_project_config() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(PROJECT_CONFIG_FILE),
            r#"
            toolkit_stack_name = "ProjectToolkit"
            rollback = false

            [wait]
            poll_interval_ms = 10
            timeout_secs = 30
            "#,
        )
        .unwrap();

        let result = Config::load(Some(temp.path())).unwrap();
        let config = result.config;

        assert_eq!(config.toolkit_stack_name(), "ProjectToolkit");
        assert!(!config.rollback());
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.wait_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.project_config_loaded_from(),
            Some(temp.path().join(PROJECT_CONFIG_FILE).as_path())
        );
    }

    #[test]
    fn project_overrides_global() {
        let global = ConfigFile {
            toolkit_stack_name: Some("GlobalToolkit".into()),
            deployment_method: Some("direct".into()),
            ..Default::default()
        };
        let project = ConfigFile {
            toolkit_stack_name: Some("ProjectToolkit".into()),
            ..Default::default()
        };

        let config = Config::from_files(global, Some(project));
        assert_eq!(config.toolkit_stack_name(), "ProjectToolkit");
        assert_eq!(config.deployment_method(), "direct");
        assert!(config.deploy_defaults().direct);
    }

    #[test]
    fn deploy_defaults_match_accessors() {
        let config = Config::from_files(ConfigFile::default(), None);
        assert_eq!(config.deploy_defaults(), DeployDefaults::default());
    }

    #[test]
    fn unknown_fields_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(PROJECT_CONFIG_FILE),
            r#"
            rollback = true
            unknown_field = true
            "#,
        )
        .unwrap();

        let result = Config::load(Some(temp.path()));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn invalid_method_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(PROJECT_CONFIG_FILE),
            "deployment_method = \"yolo\"",
        )
        .unwrap();

        let result = Config::load(Some(temp.path()));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
