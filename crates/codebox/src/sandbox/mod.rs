//! Workspaces and the backends that run commands inside them
//!
//! A [`Workspace`] is acquired from the [`WorkspaceManager`] for exactly one
//! request. Commands are described by an [`Invocation`] and produce a
//! [`ProcessOutput`] regardless of which backend ran them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use crate::sandbox::workspace::{SourceFile, Workspace, WorkspaceManager};
use crate::isolate::IsolateError;
use crate::types::{LimitExceeded, MountConfig, ResourceLimits, Termination};

mod proc_tree;
mod process;
mod workspace;

/// Errors from preparing or driving a sandboxed command
///
/// Every variant is an environment problem, never the submitted program's fault.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("toolchain '{0}' not found on PATH")]
    ToolchainNotFound(String),

    #[error("failed to create workspace: {0}")]
    CreateWorkspace(#[source] std::io::Error),

    #[error("failed to remove workspace {path}: {source}")]
    RemoveWorkspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{name}' into workspace: {source}")]
    Stage {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),

    #[error("workspace manager is shut down")]
    Closed,

    #[error(transparent)]
    Isolate(#[from] IsolateError),
}

/// A fully expanded command and the limits to run it under
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program and arguments, placeholders already substituted
    pub command: Vec<String>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// PATH for the child, also searched for the program
    pub path: String,

    /// Resource limits (CPU, memory, output, files)
    pub limits: ResourceLimits,

    /// Wall clock budget; the whole process tree is killed when it runs out
    pub wall_time: Duration,

    /// Data written to the child's standard input
    pub stdin: Option<Vec<u8>>,

    /// Directory mounts (isolate backend only)
    pub mounts: Vec<MountConfig>,
}

/// Bytes read from one output stream, cut at a fixed cap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CapturedOutput {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    /// Append a chunk, keeping at most `cap` bytes overall
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode as UTF-8, replacing invalid sequences
    pub fn into_string_lossy(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// What a sandboxed command did
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub wall_time: Duration,
    pub limit_exceeded: LimitExceeded,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// Resolve the program in a command to an absolute path
///
/// Bare names (like `g++`) are looked up in `search_path` and then in the
/// host's PATH. Commands that already contain a `/` are left unchanged.
pub fn resolve_command(command: &mut [String], search_path: &str) -> Result<(), SandboxError> {
    let Some(first) = command.first_mut() else {
        return Err(SandboxError::EmptyCommand);
    };

    if first.contains('/') {
        return Ok(());
    }

    let host_path = std::env::var("PATH").unwrap_or_default();
    let found = search_path
        .split(':')
        .chain(host_path.split(':'))
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(&*first))
        .find(|candidate| is_executable(candidate));

    match found {
        Some(candidate) => {
            *first = candidate.to_string_lossy().into_owned();
            Ok(())
        }
        None => Err(SandboxError::ToolchainNotFound(first.clone())),
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Validate that all mount source paths exist
///
/// Optional mounts (with `optional: true`) are skipped if the source doesn't exist.
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), SandboxError> {
    for mount in mounts {
        if mount.optional {
            continue;
        }
        if !Path::new(&mount.source).exists() {
            return Err(SandboxError::MountSourceNotFound(mount.source.clone()));
        }
    }
    Ok(())
}

/// Reject names that would escape the workspace directory
pub(crate) fn check_file_name(name: &str) -> Result<(), SandboxError> {
    if name.is_empty() || name.contains("..") || name.starts_with('/') {
        return Err(SandboxError::InvalidFileName(name.to_owned()));
    }
    Ok(())
}
