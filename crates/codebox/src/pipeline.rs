//! Request execution
//!
//! [`Pipeline::execute`] takes an [`ExecutionRequest`] through workspace
//! acquisition, staging, the optional compile step and the run step, and
//! always hands back an [`ExecutionResult`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError, LanguageKind, UnknownLanguage};
use crate::runner::{CompileError, CompileFailure, LanguageRunner};
use crate::sandbox::{ProcessOutput, SandboxError, Workspace, WorkspaceManager};
use crate::types::{ExecutionRequest, ExecutionResult, ExecutionStatus, LimitExceeded};

/// Failures that are not the submitted program's fault
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    UnknownLanguage(#[from] UnknownLanguage),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Runs execution requests against a shared configuration
///
/// Cloning is cheap; clones share the configuration and the workspace
/// manager, so the concurrency limit holds across all of them.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    workspaces: WorkspaceManager,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let workspaces = WorkspaceManager::new(&config);
        Self {
            config: Arc::new(config),
            workspaces,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute one request
    ///
    /// Never fails: environment problems come back as
    /// [`ExecutionStatus::InternalError`] with a descriptive message.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let span = info_span!(
            "execute",
            request_id = %Uuid::new_v4(),
            language = request.language(),
        );
        async {
            let result = match self.try_execute(&request).await {
                Ok(result) => result,
                Err(err) => {
                    error!(target: "codebox::internal", error = %err, "execution failed");
                    ExecutionResult::internal_error(err.to_string())
                }
            };
            info!(
                status = %result.status,
                wall_time = ?result.wall_time,
                truncated = result.is_truncated(),
                "execution finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn try_execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        let kind: LanguageKind = request.language().parse()?;
        let runner = LanguageRunner::new(kind, &self.config)?;
        let time_limit = self.config.clamp_time_limit(request.time_limit());

        let workspace = self.workspaces.acquire().await?;
        let outcome = run_in(&runner, &workspace, request, time_limit).await;
        if let Err(err) = self.workspaces.release(workspace).await {
            warn!(error = %err, "failed to release workspace");
        }
        outcome
    }
}

async fn run_in(
    runner: &LanguageRunner<'_>,
    workspace: &Workspace,
    request: &ExecutionRequest,
    time_limit: Duration,
) -> Result<ExecutionResult, PipelineError> {
    let output = match runner {
        LanguageRunner::Interpreted(runner) => {
            let source = runner.stage(workspace, request.source_code()).await?;
            runner.run(&source, time_limit, request.stdin()).await?
        }
        LanguageRunner::Compiled(runner) => {
            let source = runner.stage(workspace, request.source_code()).await?;
            let artifact = match runner.compile(&source).await {
                Ok(artifact) => artifact,
                Err(CompileError::Rejected(failure)) => return Ok(compile_failed(failure)),
                Err(CompileError::MissingArtifact(name)) => return Ok(missing_artifact(&name)),
                Err(CompileError::Sandbox(err)) => return Err(err.into()),
            };
            runner.run(&artifact, time_limit, request.stdin()).await?
        }
    };
    Ok(finished(output, time_limit))
}

fn compile_failed(failure: CompileFailure) -> ExecutionResult {
    let message = failure.summary();
    let truncated = failure.diagnostics.is_truncated();
    ExecutionResult {
        message: Some(message),
        ..ExecutionResult::compile_error(
            failure.diagnostics.into_string_lossy(),
            truncated,
            failure.wall_time,
        )
    }
}

/// The compiler was happy but left no entry point, e.g. a Java source
/// without a `Main` class
fn missing_artifact(name: &str) -> ExecutionResult {
    ExecutionResult {
        message: Some(format!("compilation did not produce '{name}'")),
        ..ExecutionResult::compile_error(String::new(), false, Duration::ZERO)
    }
}

fn finished(output: ProcessOutput, time_limit: Duration) -> ExecutionResult {
    let status = ExecutionStatus::from_termination(output.termination, output.limit_exceeded);
    let limit_exceeded = match (status, output.limit_exceeded) {
        (ExecutionStatus::Timeout, LimitExceeded::NotExceeded) => LimitExceeded::WallTime,
        (_, limit) => limit,
    };
    let message = (status == ExecutionStatus::Timeout)
        .then(|| format!("time limit of {}s exceeded", time_limit.as_secs_f64()));

    ExecutionResult {
        status,
        stdout_truncated: output.stdout.is_truncated(),
        stderr_truncated: output.stderr.is_truncated(),
        stdout: output.stdout.into_string_lossy(),
        stderr: output.stderr.into_string_lossy(),
        limit_exceeded,
        exit_code: output.exit_code,
        signal: output.signal,
        wall_time: output.wall_time,
        message,
    }
}
