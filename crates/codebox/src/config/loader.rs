//! Configuration file loading for codebox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, Environment, File, FileFormat};
use tracing::debug;

use crate::config::{Config, ConfigError, EXAMPLE_CONFIG, LanguageKind};

/// Prefix for environment overrides, e.g. `CODEBOX_MAX_CONCURRENCY=4`
/// or `CODEBOX_DEFAULT_LIMITS__MEMORY_LIMIT=131072`
const ENV_PREFIX: &str = "CODEBOX";

impl Config {
    /// Load configuration from a file
    ///
    /// Languages the file does not define are taken from the embedded defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder().add_source(File::from(path.as_ref()));
        Self::build(builder, true)
    }

    /// Parse configuration from a TOML string
    ///
    /// Only the languages present in `content` are configured.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let builder =
            ConfigBuilder::builder().add_source(File::from_str(content, FileFormat::Toml));
        Self::build(builder, false)
    }

    /// Load configuration from a file (or the embedded defaults) with
    /// `CODEBOX_*` environment variables layered on top
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => ConfigBuilder::builder().add_source(File::from(path)),
            None => ConfigBuilder::builder()
                .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml)),
        };
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::build(builder, path.is_some())
    }

    fn build(builder: Builder<DefaultState>, fill_defaults: bool) -> Result<Self, ConfigError> {
        let mut config: Config = builder.build()?.try_deserialize()?;
        if fill_defaults {
            config.fill_default_languages();
        }
        config.validate()?;
        Ok(config)
    }

    /// Add embedded language definitions for kinds the config leaves out
    fn fill_default_languages(&mut self) {
        let missing: Vec<LanguageKind> = LanguageKind::ALL
            .into_iter()
            .filter(|kind| !self.languages.contains_key(kind.id()))
            .collect();
        if missing.is_empty() {
            return;
        }

        let Ok(defaults) = Config::parse_toml(EXAMPLE_CONFIG) else {
            return;
        };
        for kind in missing {
            if let Some(lang) = defaults.languages.get(kind.id()) {
                debug!(language = %kind, "using embedded language definition");
                self.languages.insert(kind.id().to_owned(), lang.clone());
            }
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_owned(),
            ));
        }
        for (field, value) in [
            ("default_time_limit", self.default_time_limit),
            ("max_time_limit", self.max_time_limit),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a positive number of seconds"
                )));
            }
        }
        if self.default_time_limit > self.max_time_limit {
            return Err(ConfigError::Invalid(
                "default_time_limit exceeds max_time_limit".to_owned(),
            ));
        }

        for (id, lang) in &self.languages {
            let kind: LanguageKind = id
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("[languages.{id}]: {e}")))?;
            if kind.id() != id {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' must be keyed as '{}'",
                    kind.id()
                )));
            }
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if lang.is_compiled() != kind.is_compiled() {
                let expected = if kind.is_compiled() {
                    "requires"
                } else {
                    "must not have"
                };
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' {expected} a compile section"
                )));
            }
            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if compile.source_name.is_empty() || compile.output_name.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' needs source_name and output_name"
                    )));
                }
            }
        }

        Ok(())
    }
}
