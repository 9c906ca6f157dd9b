use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time limit applied when a request does not specify one
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds (compilation only, runs use the request's limit)
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Address space limit in kilobytes, 0 means unlimited
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads (isolate backend only)
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured size per output stream, and per written file, in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,

    /// Extra time before killing (grace period) in seconds
    #[serde(default)]
    pub extra_time: Option<f64>,
}

impl ResourceLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Fallback capture cap when no `max_output` is configured
    const FALLBACK_OUTPUT_KB: u64 = Self::MB;

    /// Create new resource limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource limits with every field unset
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
            extra_time: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
            extra_time: overrides.extra_time.or(self.extra_time),
        }
    }

    /// Memory limit in kilobytes, with the `0 = unlimited` convention resolved
    pub fn effective_memory_limit(&self) -> Option<u64> {
        self.memory_limit.filter(|&kb| kb > 0)
    }

    /// Per-stream capture cap in bytes
    pub fn output_cap_bytes(&self) -> usize {
        let kb = self.max_output.unwrap_or(Self::FALLBACK_OUTPUT_KB);
        usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: Some(262144), // 256 MB
            stack_limit: Some(65536),   // 64 MB
            max_processes: None,
            max_output: Some(1024), // 1 MB
            max_open_files: Some(64),
            extra_time: Some(0.5),
        }
    }
}

/// A request to compile (if needed) and run one program
///
/// `language` is kept as the caller supplied it; the pipeline resolves it and
/// reports unknown values as an internal error instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    source_code: String,

    language: String,

    #[serde(
        rename = "time_limit_seconds",
        default = "default_time_limit",
        with = "seconds"
    )]
    time_limit: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

impl ExecutionRequest {
    /// Create a request with the default time limit and no input
    pub fn new(source_code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            language: language.into(),
            time_limit: DEFAULT_TIME_LIMIT,
            stdin: None,
        }
    }

    /// Set the wall clock time limit for the run step
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Provide data for the program's standard input
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

fn default_time_limit() -> Duration {
    DEFAULT_TIME_LIMIT
}

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own with the given code
    Exited(i32),

    /// The process was killed by a signal it did not get from the time limit
    Signaled(i32),

    /// The wall clock limit fired and the process tree was killed
    TimedOut,
}

/// Result of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,

    /// Program stdout, or empty when the run step was skipped
    pub stdout: String,

    /// Program stderr, or compiler diagnostics on a compile error
    pub stderr: String,

    /// Whether stdout hit the capture cap
    #[serde(default)]
    pub stdout_truncated: bool,

    /// Whether stderr hit the capture cap
    #[serde(default)]
    pub stderr_truncated: bool,

    /// Secondary status indicating which limit was exceeded (if any)
    #[serde(default)]
    pub limit_exceeded: LimitExceeded,

    /// Exit code if the program exited normally
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    #[serde(default)]
    pub signal: Option<i32>,

    /// Wall clock time of the run step (or of the compile step if it failed)
    #[serde(rename = "wall_time_seconds", default, with = "seconds")]
    pub wall_time: Duration,

    /// Explanation for timeouts and internal errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    /// A compile failure carrying the compiler's diagnostics verbatim
    pub fn compile_error(diagnostics: String, truncated: bool, wall_time: Duration) -> Self {
        Self {
            status: ExecutionStatus::CompileError,
            stderr: diagnostics,
            stderr_truncated: truncated,
            limit_exceeded: if truncated {
                LimitExceeded::Output
            } else {
                LimitExceeded::NotExceeded
            },
            wall_time,
            ..Default::default()
        }
    }

    /// An environment failure that is not the submitted program's fault
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::InternalError,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Check if the program ran and exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Check if either output stream was cut at the capture cap
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            limit_exceeded: LimitExceeded::NotExceeded,
            exit_code: None,
            signal: None,
            wall_time: Duration::ZERO,
            message: None,
        }
    }
}

/// Outcome class of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Program ran and exited with code 0
    Success,

    /// The toolchain rejected the source
    CompileError,

    /// Program exited nonzero or was killed by a fault signal
    RuntimeError,

    /// Program exceeded its time budget and was killed
    Timeout,

    /// Sandbox or environment failure
    InternalError,
}

impl ExecutionStatus {
    /// Map how the run step ended to a status
    ///
    /// A fired timer always wins over the exit code. A signal caused by the
    /// CPU time limit is reported as a timeout as well.
    pub fn from_termination(termination: Termination, limit: LimitExceeded) -> Self {
        match termination {
            Termination::TimedOut => ExecutionStatus::Timeout,
            Termination::Exited(0) => ExecutionStatus::Success,
            Termination::Exited(_) => ExecutionStatus::RuntimeError,
            Termination::Signaled(_) if limit == LimitExceeded::Time => ExecutionStatus::Timeout,
            Termination::Signaled(_) => ExecutionStatus::RuntimeError,
        }
    }

    /// Whether the submitted program is responsible for this outcome
    pub fn is_user_fixable(&self) -> bool {
        !matches!(self, ExecutionStatus::Success | ExecutionStatus::InternalError)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompileError => "compile_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// Secondary status indicating which resource limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LimitExceeded {
    /// No limit was exceeded
    #[default]
    #[serde(rename = "none")]
    NotExceeded,

    /// CPU time limit exceeded
    #[serde(rename = "time")]
    Time,

    /// Wall clock time limit exceeded
    #[serde(rename = "wall_time")]
    WallTime,

    /// Memory limit exceeded
    #[serde(rename = "memory")]
    Memory,

    /// Output limit exceeded
    #[serde(rename = "output")]
    Output,
}

impl LimitExceeded {
    /// Infer which limit was exceeded from isolate's message field
    pub fn from_message(message: Option<&str>) -> Self {
        let Some(msg) = message else {
            return LimitExceeded::NotExceeded;
        };

        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("time limit") {
            if msg_lower.contains("wall") {
                LimitExceeded::WallTime
            } else {
                LimitExceeded::Time
            }
        } else if msg_lower.contains("memory") {
            LimitExceeded::Memory
        } else if msg_lower.contains("output") || msg_lower.contains("file size") {
            LimitExceeded::Output
        } else {
            LimitExceeded::NotExceeded
        }
    }

    /// Check if any limit was exceeded
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, LimitExceeded::NotExceeded)
    }
}

/// Configuration for a directory mount in Isolate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    #[serde(default)]
    pub optional: bool,
}

/// Durations as fractional seconds on the wire
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Float(secs),
                &"a finite, non-negative number of seconds",
            )
        })
    }
}
