use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{CompileConfig, Language, LanguageKind};
use crate::runner::{CompileError, RunStep};
use crate::sandbox::{
    CapturedOutput, Invocation, ProcessOutput, SandboxError, SourceFile, Workspace,
};
use crate::types::{MountConfig, ResourceLimits, Termination};

/// Wall clock budget for a compile step without `wall_time_limit`
const DEFAULT_COMPILE_WALL_TIME: Duration = Duration::from_secs(60);

/// Runner for languages that compile into an artifact before running
#[derive(Debug, Clone)]
pub struct CompiledRunner<'c> {
    kind: LanguageKind,
    compile: &'c CompileConfig,
    limits: ResourceLimits,
    mounts: Vec<MountConfig>,
    run: RunStep<'c>,
}

/// The compiler's output left in the workspace, ready to run
#[derive(Debug, Clone)]
pub struct CompiledArtifact<'ws> {
    workspace: &'ws Workspace,
    source: String,
    name: String,
}

impl<'ws> CompiledArtifact<'ws> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace(&self) -> &'ws Workspace {
        self.workspace
    }
}

/// A compile step that did not succeed
#[derive(Debug, Clone)]
pub struct CompileFailure {
    /// Compiler stderr, or its stdout when stderr was empty
    pub diagnostics: CapturedOutput,
    pub termination: Termination,
    pub wall_time: Duration,
    /// Wall clock budget the compile step ran under
    pub limit: Duration,
}

impl CompileFailure {
    fn from_output(output: ProcessOutput, limit: Duration) -> Self {
        let diagnostics = if output.stderr.is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Self {
            diagnostics,
            termination: output.termination,
            wall_time: output.wall_time,
            limit,
        }
    }

    /// One line describing how the compiler ended
    pub fn summary(&self) -> String {
        match self.termination {
            Termination::Exited(code) => format!("compiler exited with code {code}"),
            Termination::Signaled(signal) => format!("compiler killed by signal {signal}"),
            Termination::TimedOut => format!(
                "compilation exceeded the {}s time limit",
                self.limit.as_secs_f64()
            ),
        }
    }
}

impl<'c> CompiledRunner<'c> {
    pub(crate) fn new(
        kind: LanguageKind,
        compile: &'c CompileConfig,
        limits: ResourceLimits,
        mounts: Vec<MountConfig>,
        run: RunStep<'c>,
    ) -> Self {
        Self {
            kind,
            compile,
            limits,
            mounts,
            run,
        }
    }

    pub fn kind(&self) -> LanguageKind {
        self.kind
    }

    pub fn source_name(&self) -> &str {
        &self.compile.source_name
    }

    /// Write the submitted source into the workspace
    pub async fn stage<'ws>(
        &self,
        workspace: &'ws Workspace,
        source_code: &str,
    ) -> Result<SourceFile<'ws>, SandboxError> {
        workspace
            .stage(self.source_name(), source_code.as_bytes())
            .await
    }

    fn wall_time(&self) -> Duration {
        self.limits
            .wall_time_limit
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(DEFAULT_COMPILE_WALL_TIME)
    }

    /// Run the toolchain on the staged source
    ///
    /// Succeeds only when the compiler exits with code 0 and leaves its
    /// artifact in the workspace.
    #[instrument(skip(self, source), fields(language = %self.kind, source = source.name()))]
    pub async fn compile<'ws>(
        &self,
        source: &SourceFile<'ws>,
    ) -> Result<CompiledArtifact<'ws>, CompileError> {
        let output_name = &self.compile.output_name;
        let wall_time = self.wall_time();
        let invocation = Invocation {
            command: Language::expand_command(&self.compile.command, source.name(), output_name),
            env: self.compile.env.clone(),
            path: self.run.path().to_owned(),
            limits: self.limits.clone(),
            wall_time,
            stdin: None,
            mounts: self.mounts.clone(),
        };

        let workspace = source.workspace();
        let output = workspace.run(&invocation).await?;
        debug!(
            termination = ?output.termination,
            wall_time = ?output.wall_time,
            "compilation finished"
        );

        if !output.success() {
            return Err(CompileError::Rejected(CompileFailure::from_output(
                output, wall_time,
            )));
        }
        if !workspace.contains(output_name).await {
            return Err(CompileError::MissingArtifact(output_name.clone()));
        }

        Ok(CompiledArtifact {
            workspace,
            source: source.name().to_owned(),
            name: output_name.clone(),
        })
    }

    /// Run a compiled artifact
    #[instrument(skip(self, artifact, stdin), fields(language = %self.kind, artifact = artifact.name()))]
    pub async fn run(
        &self,
        artifact: &CompiledArtifact<'_>,
        time_limit: Duration,
        stdin: Option<&str>,
    ) -> Result<ProcessOutput, SandboxError> {
        let invocation = self
            .run
            .invocation(&artifact.source, &artifact.name, time_limit, stdin);
        let output = artifact.workspace.run(&invocation).await?;
        debug!(
            termination = ?output.termination,
            wall_time = ?output.wall_time,
            "compiled run finished"
        );
        Ok(output)
    }
}
