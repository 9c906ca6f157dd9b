use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use crate::config::language::{
    Capability, CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, Language, LanguageKind,
    RunConfig, UnknownLanguage,
};
use crate::types::{MountConfig, ResourceLimits};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codebox.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which mechanism confines the submitted program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Private temp directory, rlimits and a dedicated process group
    #[default]
    Process,
    /// IOI Isolate boxes (namespaces, cgroups, no network)
    Isolate,
}

/// Config for codebox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Sandbox backend used for every compile and run step
    #[serde(default)]
    pub isolation: Isolation,

    /// Directory under which process-backend workspaces are created
    /// (the system temp directory if not specified)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of workspaces alive at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Run time limit in seconds for requests that do not carry one
    #[serde(default = "default_time_limit")]
    pub default_time_limit: f64,

    /// Requested time limits above this many seconds are clamped
    #[serde(default = "default_max_time_limit")]
    pub max_time_limit: f64,

    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Use cgroup memory limiting instead of RLIMIT_AS (isolate backend).
    ///
    /// When enabled, isolate uses `--cg` and `--cg-mem` which limit actual memory
    /// usage (RSS) rather than virtual address space.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// First isolate box id handed out by the box pool
    #[serde(default)]
    pub first_box_id: u32,

    /// Global directory mounts applied to all isolate invocations
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Resource limits applied to every run step
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Resource limits applied to every compile step
    #[serde(default = "default_compile_limits")]
    pub compile_limits: ResourceLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            isolation: Isolation::default(),
            workspace_root: None,
            max_concurrency: default_max_concurrency(),
            default_time_limit: default_time_limit(),
            max_time_limit: default_max_time_limit(),
            isolate_path: None,
            cgroup: false,
            cg_root: default_cg_root(),
            first_box_id: 0,
            sandbox_mounts: Vec::new(),
            default_limits: ResourceLimits::default(),
            compile_limits: default_compile_limits(),
            languages: HashMap::new(),
        }
    }

    /// Get the toolchain configuration for a language
    pub fn language(&self, kind: LanguageKind) -> Result<&Language, ConfigError> {
        self.languages
            .get(kind.id())
            .ok_or_else(|| ConfigError::LanguageNotFound(kind.id().to_owned()))
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }

    /// Directory that holds process-backend workspaces
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Limits for the run step of a language
    pub fn run_limits(&self, language: &Language) -> ResourceLimits {
        match language.run.limits {
            Some(ref limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }

    /// Limits for the compile step of a language
    pub fn compile_limits_for(&self, compile: &CompileConfig) -> ResourceLimits {
        match compile.limits {
            Some(ref limits) => self.compile_limits.with_overrides(limits),
            None => self.compile_limits.clone(),
        }
    }

    /// Clamp a requested run time limit to `max_time_limit`
    pub fn clamp_time_limit(&self, requested: Duration) -> Duration {
        let max = Duration::from_secs_f64(self.max_time_limit);
        if requested > max {
            warn!(
                requested = requested.as_secs_f64(),
                max = self.max_time_limit,
                "time limit clamped"
            );
            max
        } else {
            requested
        }
    }

    /// Time limit for requests that do not specify one
    pub fn default_run_time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.default_time_limit)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_time_limit() -> f64 {
    5.0
}

fn default_max_time_limit() -> f64 {
    60.0
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

fn default_compile_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Some(30.0),
        wall_time_limit: Some(60.0),
        memory_limit: Some(512 * ResourceLimits::MB),
        stack_limit: None,
        max_processes: Some(10),
        max_output: Some(64 * ResourceLimits::MB),
        max_open_files: Some(256),
        extra_time: Some(1.0),
    }
}
