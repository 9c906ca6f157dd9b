use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{Language, LanguageKind};
use crate::runner::RunStep;
use crate::sandbox::{ProcessOutput, SandboxError, SourceFile, Workspace};

/// Runner for languages whose interpreter takes the source file directly
#[derive(Debug, Clone)]
pub struct InterpretedRunner<'c> {
    kind: LanguageKind,
    language: &'c Language,
    run: RunStep<'c>,
}

impl<'c> InterpretedRunner<'c> {
    pub(crate) fn new(kind: LanguageKind, language: &'c Language, run: RunStep<'c>) -> Self {
        Self {
            kind,
            language,
            run,
        }
    }

    pub fn kind(&self) -> LanguageKind {
        self.kind
    }

    pub fn source_name(&self) -> String {
        self.language.source_name()
    }

    /// Write the submitted source into the workspace
    pub async fn stage<'ws>(
        &self,
        workspace: &'ws Workspace,
        source_code: &str,
    ) -> Result<SourceFile<'ws>, SandboxError> {
        workspace
            .stage(&self.source_name(), source_code.as_bytes())
            .await
    }

    /// Run the interpreter on the staged source
    #[instrument(skip(self, source, stdin), fields(language = %self.kind, source = source.name()))]
    pub async fn run(
        &self,
        source: &SourceFile<'_>,
        time_limit: Duration,
        stdin: Option<&str>,
    ) -> Result<ProcessOutput, SandboxError> {
        let invocation = self
            .run
            .invocation(source.name(), source.name(), time_limit, stdin);
        let output = source.workspace().run(&invocation).await?;
        debug!(
            termination = ?output.termination,
            wall_time = ?output.wall_time,
            "interpreted run finished"
        );
        Ok(output)
    }
}
