//! Loads the harness configuration.
//!
//! The configuration is a JSON file listing the tests to run, where their
//! scripts live, and how to reach the external services that results are
//! reported to. A handful of values can be overridden from the environment;
//! see [`env_vars`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// The default name of the configuration file, looked up in the working
/// directory.
pub const DEFAULT_CONFIG_FILE_NAME: &str = ".patchwork-ci.json";

/// The name of the directory, next to the configuration file, which holds
/// test scripts unless `scripts_dir` is set.
pub const DEFAULT_SCRIPTS_DIR_NAME: &str = "scripts";

/// Error type.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file at {}: {source}", .path.display())]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("could not parse config file at {}: {source}", .path.display())]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("test definition #{index} has an empty name")]
    EmptyTestName { index: usize },

    #[error("test name {name:?} contains a path separator")]
    PathSeparatorInTestName { name: String },

    #[error("test {name:?} is defined more than once")]
    DuplicateTestName { name: String },

    #[error("test {name:?} has no script")]
    EmptyScript { name: String },
}

/// Result type.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One entry in the ordered list of tests to run against each patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Short identifier, used in check names and artifact labels.
    pub name: String,

    /// Human-readable description, posted alongside the check.
    pub description: String,

    /// The script file name, relative to the scripts directory.
    pub script: PathBuf,
}

/// Bounded retry policy for calls to external services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub attempts: u32,

    /// Delay before the second attempt. Each later delay doubles.
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// How to reach the Patchwork instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchworkConfig {
    /// Base URL, e.g. `https://patchwork.kernel.org`.
    pub url: String,

    /// The Patchwork project name.
    #[serde(default)]
    pub project: Option<String>,

    /// Name of the environment variable holding the API token.
    #[serde(default = "default_patchwork_token_env")]
    pub token_env: String,
}

fn default_patchwork_token_env() -> String {
    "PATCHWORK_TOKEN".to_string()
}

/// How to reach GitHub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    /// The `owner/name` of the repository which pull requests are opened
    /// against.
    pub repo: String,

    /// Name of the environment variable holding the API token, forwarded to
    /// `gh` as `GH_TOKEN`.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// The harness configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The source directory tests run in when no worktree is given.
    pub source_dir: PathBuf,

    /// Where test scripts live. Relative paths are resolved against the
    /// directory containing the configuration file.
    pub scripts_dir: Option<PathBuf>,

    /// Suppress all external side effects (check posts, artifact uploads, PR
    /// comments).
    pub dry_run: bool,

    /// Hard limit on the run time of a single test script.
    pub test_timeout_secs: u64,

    /// Hard limit on a single call to an external service.
    pub api_timeout_secs: u64,

    /// Retry policy for external calls.
    pub retry: RetryConfig,

    /// Where to post checks.
    pub patchwork: Option<PatchworkConfig>,

    /// Where to upload artifacts and comment on pull requests.
    pub github: Option<GithubConfig>,

    /// The tests to run against each patch, in order.
    pub tests: Vec<TestDefinition>,

    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            scripts_dir: None,
            dry_run: false,
            test_timeout_secs: 60 * 60,
            api_timeout_secs: 60,
            retry: Default::default(),
            patchwork: None,
            github: None,
            tests: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Read the configuration from `path`, apply environment overrides, and
    /// validate it.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            source,
            path: path.to_owned(),
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::from_json(&contents, &base_dir).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                source,
                path: path.to_owned(),
            },
            err => err,
        })?;
        config.apply_env_overrides();
        debug!(?config, "Loaded config");
        Ok(config)
    }

    /// Parse and validate the configuration from a JSON string. Relative
    /// paths are resolved against `base_dir`. Environment overrides are not
    /// applied.
    pub fn from_json(contents: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                source,
                path: base_dir.join(DEFAULT_CONFIG_FILE_NAME),
            })?;
        config.base_dir = base_dir.to_owned();
        if config.source_dir.is_relative() {
            config.source_dir = base_dir.join(&config.source_dir);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            if test.name.trim().is_empty() {
                return Err(ConfigError::EmptyTestName { index });
            }
            // The name ends up in artifact file names.
            if test.name.chars().any(|c| c == '/' || c == '\\') {
                return Err(ConfigError::PathSeparatorInTestName {
                    name: test.name.clone(),
                });
            }
            if test.script.as_os_str().is_empty() {
                return Err(ConfigError::EmptyScript {
                    name: test.name.clone(),
                });
            }
            if !seen.insert(test.name.as_str()) {
                return Err(ConfigError::DuplicateTestName {
                    name: test.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apply the overrides from [`env_vars`].
    pub fn apply_env_overrides(&mut self) {
        if env_vars::get_dry_run() {
            self.dry_run = true;
        }
        if let Some(source_dir) = env_vars::get_source_dir() {
            self.source_dir = source_dir;
        }
    }

    /// The directory holding test scripts.
    pub fn get_scripts_dir(&self) -> PathBuf {
        match &self.scripts_dir {
            Some(scripts_dir) if scripts_dir.is_absolute() => scripts_dir.clone(),
            Some(scripts_dir) => self.base_dir.join(scripts_dir),
            None => self.base_dir.join(DEFAULT_SCRIPTS_DIR_NAME),
        }
    }

    /// The timeout for a single test script.
    pub fn get_test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// The timeout for a single external call.
    pub fn get_api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Environment variables which override the configuration file.
pub mod env_vars {
    use std::path::PathBuf;

    use tracing::instrument;

    use crate::util::parse_env_flag;

    /// If set to a truthy value, forces dry-run mode.
    pub const PWCI_DRY_RUN: &str = "PWCI_DRY_RUN";

    /// If set, overrides `source_dir`.
    pub const PWCI_SOURCE_DIR: &str = "PWCI_SOURCE_DIR";

    /// Whether dry-run mode is forced from the environment.
    #[instrument]
    pub fn get_dry_run() -> bool {
        match std::env::var(PWCI_DRY_RUN) {
            Ok(value) => parse_env_flag(&value),
            Err(_) => false,
        }
    }

    /// The source directory override, if any.
    #[instrument]
    pub fn get_source_dir() -> Option<PathBuf> {
        std::env::var_os(PWCI_SOURCE_DIR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}
