use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{MountConfig, ResourceLimits};

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// The closed set of languages the pipeline can dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKind {
    Python,
    Cpp,
    Java,
}

/// What a language needs before its program can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The interpreter runs the staged source directly
    Interpreted,
    /// A toolchain turns the staged source into an artifact first
    Compiled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language '{0}' (expected one of: python, cpp, java)")]
pub struct UnknownLanguage(pub String);

impl LanguageKind {
    pub const ALL: [LanguageKind; 3] = [LanguageKind::Python, LanguageKind::Cpp, LanguageKind::Java];

    /// Identifier used in requests and as the key in `[languages.*]`
    pub fn id(&self) -> &'static str {
        match self {
            LanguageKind::Python => "python",
            LanguageKind::Cpp => "cpp",
            LanguageKind::Java => "java",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            LanguageKind::Python => Capability::Interpreted,
            LanguageKind::Cpp | LanguageKind::Java => Capability::Compiled,
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.capability() == Capability::Compiled
    }
}

impl FromStr for LanguageKind {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(LanguageKind::Python),
            "cpp" | "c++" => Ok(LanguageKind::Cpp),
            "java" => Ok(LanguageKind::Java),
            _ => Err(UnknownLanguage(s.to_owned())),
        }
    }
}

impl std::fmt::Display for LanguageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Toolchain configuration for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,
}

impl Language {
    /// Check if the language has a compile step
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the source file name for this language
    ///
    /// Compiled languages may require a specific name (Java wants the file
    /// to match the public class), so it comes from the compile section.
    pub fn source_name(&self) -> String {
        if let Some(ref compile) = self.compile {
            compile.source_name.clone()
        } else {
            format!("main.{}", self.extension)
        }
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str, binary: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", binary)
                    .replace("{binary}", binary)
            })
            .collect()
    }
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        if extension.contains(INVALID_FILE_EXT_CHARS) {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}
    pub command: Vec<String>,

    /// Source file name in the workspace (e.g., "main.cpp")
    pub source_name: String,

    /// Artifact the compiler leaves in the workspace (e.g., "main", "Main.class")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides `compile_limits`)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Default PATH for sandbox execution
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}
    pub command: Vec<String>,

    /// Environment variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Directory mounts (isolate backend only)
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// PATH environment variable for the program, also used to find the toolchain
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides `default_limits`)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}
