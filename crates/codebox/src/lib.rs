//! A library for running submitted code in throwaway sandboxes.
//!
//! Codebox takes source code in one of a closed set of languages, runs it in a
//! fresh workspace under a wall-clock limit and returns what it printed along
//! with a status. Compiled languages are compiled first; a failed compile is
//! reported as data and the program is never run.
//!
//! # Features
//!
//! - **Per-request workspaces**: every execution gets its own private directory, removed on every exit path.
//! - **Closed language set**: Python (interpreted), C++ and Java (compiled), configured in TOML.
//! - **Process-tree timeouts**: the whole process group is killed when the time limit fires.
//! - **Resource limits**: CPU, memory, stack, file size, open files and captured output.
//! - **Two backends**: plain processes with rlimits, or IOI Isolate boxes for full isolation.
//!
//! # Example
//!
//! ```no_run
//! use codebox::{Config, ExecutionRequest, ExecutionStatus, Pipeline};
//!
//! # async fn demo() {
//! let pipeline = Pipeline::new(Config::default());
//! let result = pipeline
//!     .execute(ExecutionRequest::new("print('hello')", "python"))
//!     .await;
//! assert_eq!(result.status, ExecutionStatus::Success);
//! assert_eq!(result.stdout, "hello\n");
//! # }
//! ```

pub use config::{Capability, Config, ConfigError, EXAMPLE_CONFIG, Isolation, Language, LanguageKind};
pub use isolate::{BoxPool, IsolateBox, IsolateError, prepare_cgroup};
pub use pipeline::{Pipeline, PipelineError};
pub use runner::{CompileError, CompiledArtifact, LanguageRunner};
pub use sandbox::{SandboxError, SourceFile, Workspace, WorkspaceManager};
pub use types::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, LimitExceeded, MountConfig, ResourceLimits,
};

pub mod config;
pub mod isolate;
pub mod pipeline;
pub mod runner;
pub mod sandbox;
pub mod types;
