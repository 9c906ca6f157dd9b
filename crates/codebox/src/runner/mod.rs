//! Language runners
//!
//! One runner per capability set: [`InterpretedRunner`] runs the staged
//! source directly, [`CompiledRunner`] compiles it into a
//! [`CompiledArtifact`] first. [`LanguageRunner`] selects between them from a
//! [`LanguageKind`].

use std::time::Duration;

use thiserror::Error;

pub use crate::runner::compiled::{CompileFailure, CompiledArtifact, CompiledRunner};
pub use crate::runner::interpreted::InterpretedRunner;

mod compiled;
mod interpreted;

use crate::config::{Capability, Config, ConfigError, Language, LanguageKind, RunConfig};
use crate::sandbox::{Invocation, SandboxError};
use crate::types::{MountConfig, ResourceLimits};

/// Errors from the compile step
#[derive(Debug, Error)]
pub enum CompileError {
    /// The toolchain rejected the source (or ran out of time doing so)
    #[error("{}", .0.summary())]
    Rejected(CompileFailure),

    /// The compiler succeeded but the expected entry point is missing
    #[error("compilation did not produce '{0}'")]
    MissingArtifact(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// A runner for one language, chosen by its capability
#[derive(Debug, Clone)]
pub enum LanguageRunner<'c> {
    Interpreted(InterpretedRunner<'c>),
    Compiled(CompiledRunner<'c>),
}

impl<'c> LanguageRunner<'c> {
    /// Build the runner for a language from its configuration
    pub fn new(kind: LanguageKind, config: &'c Config) -> Result<Self, ConfigError> {
        let language = config.language(kind)?;
        let run = RunStep::new(language, config);
        match kind.capability() {
            Capability::Interpreted => Ok(Self::Interpreted(InterpretedRunner::new(
                kind, language, run,
            ))),
            Capability::Compiled => {
                let compile = language.compile.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!("language '{kind}' has no compile section"))
                })?;
                Ok(Self::Compiled(CompiledRunner::new(
                    kind,
                    compile,
                    config.compile_limits_for(compile),
                    config.sandbox_mounts.clone(),
                    run,
                )))
            }
        }
    }

    pub fn kind(&self) -> LanguageKind {
        match self {
            Self::Interpreted(runner) => runner.kind(),
            Self::Compiled(runner) => runner.kind(),
        }
    }

    /// File name the source is staged under
    pub fn source_name(&self) -> String {
        match self {
            Self::Interpreted(runner) => runner.source_name(),
            Self::Compiled(runner) => runner.source_name().to_owned(),
        }
    }
}

/// Everything needed to turn a run command into an [`Invocation`]
#[derive(Debug, Clone)]
pub(crate) struct RunStep<'c> {
    config: &'c RunConfig,
    limits: ResourceLimits,
    mounts: Vec<MountConfig>,
}

impl<'c> RunStep<'c> {
    fn new(language: &'c Language, config: &Config) -> Self {
        let mounts = config
            .sandbox_mounts
            .iter()
            .chain(&language.run.mounts)
            .cloned()
            .collect();
        Self {
            config: &language.run,
            limits: config.run_limits(language),
            mounts,
        }
    }

    fn invocation(
        &self,
        source: &str,
        binary: &str,
        time_limit: Duration,
        stdin: Option<&str>,
    ) -> Invocation {
        Invocation {
            command: Language::expand_command(&self.config.command, source, binary),
            env: self.config.env.clone(),
            path: self.config.path.clone(),
            limits: self.limits.clone(),
            wall_time: time_limit,
            stdin: Some(stdin.unwrap_or_default().as_bytes().to_vec()),
            mounts: self.mounts.clone(),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.config.path
    }
}
