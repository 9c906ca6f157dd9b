//! Box lifecycle management for isolate

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::isolate::IsolateError;
use crate::isolate::command::{IsolateAction, IsolateCommand};

type FreeList = Arc<Mutex<Vec<u32>>>;

/// An initialized isolate box
///
/// Call [`cleanup()`](Self::cleanup) before dropping. A box dropped while
/// still initialized gets a best-effort cleanup on a background thread and its
/// id is not handed out again.
#[derive(Debug)]
pub struct IsolateBox {
    id: u32,
    box_path: PathBuf,
    isolate_path: PathBuf,
    initialized: bool,
    cgroup: bool,
    free_list: Option<FreeList>,
}

impl IsolateBox {
    /// Run `isolate --init` for a box id
    #[instrument(skip(isolate_path))]
    pub async fn init(
        id: u32,
        isolate_path: impl Into<PathBuf>,
        cgroup: bool,
    ) -> Result<Self, IsolateError> {
        let isolate_path = isolate_path.into();
        let args = IsolateCommand::new(&isolate_path, id)
            .action(IsolateAction::Init)
            .cgroup(cgroup)
            .build();

        debug!(?args, "initializing isolate box");
        let output = run_control(&args).await?;
        if !output.status.success() {
            return Err(IsolateError::InitFailed {
                id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let box_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        if !box_path.exists() {
            return Err(IsolateError::InitFailed {
                id,
                message: format!("box path does not exist: {}", box_path.display()),
            });
        }

        debug!(?box_path, "box initialized");
        Ok(Self {
            id,
            box_path,
            isolate_path,
            initialized: true,
            cgroup,
            free_list: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Host directory that appears as `/box` inside the sandbox
    pub fn work_dir(&self) -> PathBuf {
        self.box_path.join("box")
    }

    /// Host path of the box root, outside the program's reach
    pub fn root(&self) -> &Path {
        &self.box_path
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    pub fn cgroup(&self) -> bool {
        self.cgroup
    }

    /// Run `isolate --cleanup` for this box
    #[must_use = "cleanup errors should be handled"]
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn cleanup(&mut self) -> Result<(), IsolateError> {
        if !self.initialized {
            return Ok(());
        }

        let args = IsolateCommand::new(&self.isolate_path, self.id)
            .action(IsolateAction::Cleanup)
            .cgroup(self.cgroup)
            .build();
        debug!(?args, "cleaning up isolate box");

        let output = run_control(&args).await?;
        if !output.status.success() {
            return Err(IsolateError::CleanupFailed {
                id: self.id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        self.initialized = false;
        debug!("box cleaned up");
        Ok(())
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if !self.initialized {
            if let Some(ref free) = self.free_list {
                free.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(self.id);
            }
            return;
        }

        warn!(
            box_id = self.id,
            box_path = %self.box_path.display(),
            "isolate box dropped without cleanup, box id retired"
        );
        let args = IsolateCommand::new(&self.isolate_path, self.id)
            .action(IsolateAction::Cleanup)
            .cgroup(self.cgroup)
            .build();
        let id = self.id;
        std::thread::spawn(move || {
            let Some((program, rest)) = args.split_first() else {
                return;
            };
            match std::process::Command::new(program).args(rest).output() {
                Ok(output) if output.status.success() => {
                    debug!(box_id = id, "best-effort cleanup succeeded")
                }
                Ok(output) => warn!(
                    box_id = id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "best-effort cleanup failed"
                ),
                Err(e) => warn!(box_id = id, error = %e, "best-effort cleanup spawn failed"),
            }
        });
    }
}

async fn run_control(args: &[String]) -> Result<std::process::Output, IsolateError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| IsolateError::CommandFailed("empty command arguments".to_owned()))?;
    Command::new(program)
        .args(rest)
        .output()
        .await
        .map_err(IsolateError::SpawnFailed)
}

/// Pool of isolate box ids
///
/// Ids live on a free list so no id is ever held by two live boxes. A box
/// returns its id when it is dropped after a successful cleanup.
#[derive(Debug, Clone)]
pub struct BoxPool {
    isolate_path: PathBuf,
    cgroup: bool,
    free: FreeList,
    capacity: u32,
}

impl BoxPool {
    pub fn new(start_id: u32, count: u32, isolate_path: impl Into<PathBuf>, cgroup: bool) -> Self {
        // Pop from the back, so hand out the lowest id first
        let free = (start_id..start_id.saturating_add(count)).rev().collect();
        Self {
            isolate_path: isolate_path.into(),
            cgroup,
            free: Arc::new(Mutex::new(free)),
            capacity: count,
        }
    }

    /// Take a free id and initialize a box for it
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<IsolateBox, IsolateError> {
        let id = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(IsolateError::PoolExhausted)?;
        debug!(id, "acquired box id");

        match IsolateBox::init(id, &self.isolate_path, self.cgroup).await {
            Ok(mut sandbox) => {
                sandbox.free_list = Some(Arc::clone(&self.free));
                Ok(sandbox)
            }
            Err(e) => {
                self.free
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id);
                Err(e)
            }
        }
    }

    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
