//! IOI Isolate backend
//!
//! Workspaces backed by isolate boxes: command building, box lifecycle with a
//! pool of box ids, and meta-file parsing.
//!
//! References for Isolate's CLI arguments and meta-files:
//! - https://www.ucw.cz/isolate/isolate.1.html
//! - https://github.com/ioi/isolate

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

pub use crate::isolate::box_manager::{BoxPool, IsolateBox};
pub use crate::isolate::command::{IsolateAction, IsolateCommand};
pub use crate::isolate::meta::{MetaFile, MetaParseError};
pub(crate) use crate::isolate::process::run;

mod box_manager;
mod command;
mod meta;
mod process;

/// Errors that occur during isolate sandbox operations
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to initialize box {id}: {message}")]
    InitFailed { id: u32, message: String },

    #[error("failed to cleanup box {id}: {message}")]
    CleanupFailed { id: u32, message: String },

    #[error("isolate command failed: {0}")]
    CommandFailed(String),

    #[error("failed to spawn isolate process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("isolate reported an internal error: {0}")]
    Internal(String),

    #[error("isolate did not exit within {0:.1}s")]
    Unresponsive(f64),

    #[error("no available boxes in pool")]
    PoolExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mount point of the unified cgroup v2 hierarchy
const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

/// Controllers isolate needs delegated to its boxes
const DELEGATED_CONTROLLERS: &str = "+memory +pids";

/// Prepare the cgroup v2 tree isolate expects at `cg_root`
///
/// Stands in for `isolate-cg-keeper`, which containers usually lack.
/// `Ok(false)` means the host has no cgroup v2 memory controller; the caller
/// should turn `cgroup` off and rely on RLIMIT_AS.
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, IsolateError> {
    let mount = Path::new(CGROUP_MOUNT);
    if !lists_controller(&mount.join("cgroup.controllers"), "memory")? {
        return Ok(false);
    }
    if lists_controller(&cg_root.join("cgroup.subtree_control"), "memory").unwrap_or(false) {
        debug!(cg_root = %cg_root.display(), "cgroup already delegated");
        return Ok(true);
    }

    // Controllers can only be delegated from a cgroup with no member
    // processes, so this process moves into a leaf of its own first
    let leaf = mount.join("init");
    fs::create_dir_all(&leaf)?;
    fs::write(leaf.join("cgroup.procs"), std::process::id().to_string())?;
    fs::write(mount.join("cgroup.subtree_control"), DELEGATED_CONTROLLERS)?;

    fs::create_dir_all(cg_root)?;
    fs::write(cg_root.join("cgroup.subtree_control"), DELEGATED_CONTROLLERS)?;
    debug!(cg_root = %cg_root.display(), "cgroup controllers delegated");
    Ok(true)
}

/// Whether a space-separated controller list file names `controller`
///
/// A missing file counts as not listing it.
fn lists_controller(path: &Path, controller: &str) -> Result<bool, IsolateError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.split_whitespace().any(|c| c == controller)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
