//! Per-request workspaces
//!
//! Every request gets a fresh directory that nothing else touches, and the
//! directory is removed on every exit path: explicitly through
//! [`WorkspaceManager::release`], or by `Drop` if the request is abandoned.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::{Config, Isolation};
use crate::isolate::{self, BoxPool, IsolateBox};
use crate::sandbox::{Invocation, ProcessOutput, SandboxError, check_file_name, process};

/// Hands out workspaces, at most `max_concurrency` at a time
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    slots: Arc<Semaphore>,
    boxes: Option<BoxPool>,
}

impl WorkspaceManager {
    pub fn new(config: &Config) -> Self {
        let boxes = match config.isolation {
            Isolation::Process => None,
            Isolation::Isolate => Some(BoxPool::new(
                config.first_box_id,
                u32::try_from(config.max_concurrency).unwrap_or(u32::MAX),
                config.isolate_binary(),
                config.cgroup,
            )),
        };
        Self {
            root: config.workspace_root(),
            slots: Arc::new(Semaphore::new(config.max_concurrency)),
            boxes,
        }
    }

    /// Allocate a fresh, uniquely named workspace
    ///
    /// Waits while `max_concurrency` workspaces are alive.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Workspace, SandboxError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Closed)?;
        let id = Uuid::new_v4();

        let backend = match self.boxes {
            Some(ref pool) => Backend::Isolate(pool.acquire().await?),
            None => {
                let root = self.root.clone();
                let prefix = format!("codebox-{id}-");
                let dir = tokio::task::spawn_blocking(move || {
                    std::fs::create_dir_all(&root)?;
                    tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
                })
                .await
                .map_err(|e| SandboxError::CreateWorkspace(io::Error::other(e)))?
                .map_err(SandboxError::CreateWorkspace)?;
                Backend::Process(dir)
            }
        };

        let workspace = Workspace {
            id,
            backend,
            _permit: permit,
        };
        debug!(%id, path = %workspace.path().display(), "workspace acquired");
        Ok(workspace)
    }

    /// Delete the workspace and everything in it
    #[instrument(skip_all, fields(id = %workspace.id))]
    pub async fn release(&self, workspace: Workspace) -> Result<(), SandboxError> {
        let Workspace { backend, .. } = workspace;
        match backend {
            Backend::Process(dir) => {
                // A program can leave a large tree behind; remove it off the runtime
                let path = dir.path().to_path_buf();
                tokio::task::spawn_blocking(move || dir.close())
                    .await
                    .map_err(|e| SandboxError::RemoveWorkspace {
                        path: path.clone(),
                        source: io::Error::other(e),
                    })?
                    .map_err(|source| SandboxError::RemoveWorkspace { path, source })?;
            }
            Backend::Isolate(mut sandbox) => sandbox.cleanup().await?,
        }
        debug!("workspace released");
        Ok(())
    }

    /// Number of workspaces that can be acquired without waiting
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[derive(Debug)]
enum Backend {
    Process(TempDir),
    Isolate(IsolateBox),
}

/// An exclusively owned, ephemeral directory for one request
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    backend: Backend,
    _permit: OwnedSemaphorePermit,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Host directory the program sees as its working directory
    pub fn path(&self) -> PathBuf {
        match self.backend {
            Backend::Process(ref dir) => dir.path().to_path_buf(),
            Backend::Isolate(ref sandbox) => sandbox.work_dir(),
        }
    }

    /// Write a file into the workspace
    #[instrument(skip(self, contents), fields(id = %self.id, len = contents.len()))]
    pub async fn stage(&self, name: &str, contents: &[u8]) -> Result<SourceFile<'_>, SandboxError> {
        let path = self.host_path(name)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| SandboxError::Stage {
                name: name.to_owned(),
                source,
            })?;
        debug!(?path, "staged file");
        Ok(SourceFile {
            workspace: self,
            name: name.to_owned(),
        })
    }

    /// Check if the workspace holds a regular file with this name
    pub async fn contains(&self, name: &str) -> bool {
        match self.host_path(name) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Run a command with this workspace as its working directory
    pub async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, SandboxError> {
        match self.backend {
            Backend::Process(ref dir) => process::run(dir.path(), invocation).await,
            Backend::Isolate(ref sandbox) => isolate::run(sandbox, invocation).await,
        }
    }

    fn host_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        check_file_name(name)?;
        Ok(self.path().join(name))
    }
}

/// Source text staged in a workspace under its language's file name
#[derive(Debug, Clone)]
pub struct SourceFile<'ws> {
    workspace: &'ws Workspace,
    name: String,
}

impl<'ws> SourceFile<'ws> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace(&self) -> &'ws Workspace {
        self.workspace
    }

    pub fn path(&self) -> PathBuf {
        self.workspace.path().join(&self.name)
    }
}
