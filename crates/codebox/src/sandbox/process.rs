//! Local process backend
//!
//! Runs a command directly on the host inside the workspace directory, in a
//! process group of its own, with rlimits applied between fork and exec. The
//! program is made a child subreaper and its process tree is tracked through
//! procfs, so descendants that leave the group are still killed.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use nix::sys::prctl;
use nix::sys::resource::{Resource, setrlimit};
use nix::sys::signal::Signal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

use crate::sandbox::proc_tree::ProcessTree;
use crate::sandbox::{CapturedOutput, Invocation, ProcessOutput, SandboxError, resolve_command};
use crate::types::{LimitExceeded, ResourceLimits, Termination};

/// How long readers may keep draining pipes after the process tree is gone
const READER_GRACE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;

/// How often the process tree is sampled while the program runs
const TREE_POLL: Duration = Duration::from_millis(50);

/// How far the sampled CPU time may trail the real figure
///
/// One poll interval per busy thread, with room for a few threads.
const CPU_SAMPLE_SLACK: Duration = Duration::from_millis(250);

/// rlimits to install in the child, computed before fork
#[derive(Debug, Clone, Copy, Default)]
struct RlimitPlan {
    address_space: Option<u64>,
    stack: Option<u64>,
    cpu_seconds: Option<u64>,
    file_size: Option<u64>,
    open_files: Option<u64>,
}

impl RlimitPlan {
    fn from_limits(limits: &ResourceLimits) -> Self {
        let kb = |value: u64| value.saturating_mul(1024);
        Self {
            address_space: limits.effective_memory_limit().map(kb),
            stack: limits.stack_limit.filter(|&v| v > 0).map(kb),
            cpu_seconds: limits
                .time_limit
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| t.ceil() as u64),
            file_size: limits.max_output.map(kb),
            open_files: limits.max_open_files.map(u64::from),
        }
    }

    /// Runs in the forked child; only async-signal-safe calls allowed
    fn apply(&self) -> std::io::Result<()> {
        if let Some(bytes) = self.address_space {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(bytes) = self.stack {
            setrlimit(Resource::RLIMIT_STACK, bytes, bytes)?;
        }
        if let Some(secs) = self.cpu_seconds {
            // SIGXCPU at the soft limit, SIGKILL one second later
            setrlimit(Resource::RLIMIT_CPU, secs, secs + 1)?;
        }
        if let Some(bytes) = self.file_size {
            setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(count) = self.open_files {
            setrlimit(Resource::RLIMIT_NOFILE, count, count)?;
        }
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        Ok(())
    }
}

/// Run an invocation with `dir` as working directory, HOME and TMPDIR
#[instrument(skip(invocation), fields(program = invocation.command.first().map(String::as_str)))]
pub(crate) async fn run(dir: &Path, invocation: &Invocation) -> Result<ProcessOutput, SandboxError> {
    let mut argv = invocation.command.clone();
    resolve_command(&mut argv, &invocation.path)?;
    let (program, args) = argv.split_first().ok_or(SandboxError::EmptyCommand)?;
    let program = match program.strip_prefix("./") {
        Some(relative) => dir.join(relative).to_string_lossy().into_owned(),
        None => program.clone(),
    };

    let mut cmd = Command::new(&program);
    cmd.args(args)
        .current_dir(dir)
        .env_clear()
        .env("PATH", &invocation.path)
        .env("HOME", dir)
        .env("TMPDIR", dir)
        .env("LANG", "C.UTF-8")
        .envs(&invocation.env)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let rlimits = RlimitPlan::from_limits(&invocation.limits);
    // SAFETY: the closure only calls setrlimit and prctl, which are
    // async-signal-safe, and touches no state shared with the parent.
    unsafe {
        cmd.pre_exec(move || {
            rlimits.apply()?;
            // Orphaned descendants are reparented to the program, not to init
            prctl::set_child_subreaper(true)?;
            Ok(())
        });
    }

    debug!(%program, ?args, wall_time = ?invocation.wall_time, "spawning");
    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: program.clone(),
        source,
    })?;
    let mut tree = ProcessTree::new(child.id());

    let cap = invocation.limits.output_cap_bytes();
    let stdout = Arc::new(Mutex::new(CapturedOutput::with_cap(cap)));
    let stderr = Arc::new(Mutex::new(CapturedOutput::with_cap(cap)));
    let stdout_reader = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(capture(pipe, Arc::clone(&stdout))));
    let stderr_reader = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(capture(pipe, Arc::clone(&stderr))));

    if let (Some(mut pipe), Some(data)) = (child.stdin.take(), invocation.stdin.clone()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&data).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                debug!(error = %e, "failed to write stdin");
            }
        });
    }

    let deadline = tokio::time::sleep(invocation.wall_time);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(TREE_POLL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (status, timed_out) = loop {
        tokio::select! {
            status = child.wait() => break (status.map_err(SandboxError::Wait)?, false),
            () = &mut deadline => {
                debug!("wall time limit reached, killing process tree");
                tree.kill();
                break (child.wait().await.map_err(SandboxError::Wait)?, true);
            }
            _ = poll.tick() => tree.observe(),
        }
    };
    let wall_time = started.elapsed();

    // Background children must not outlive the call
    tree.kill();
    drain(stdout_reader).await;
    drain(stderr_reader).await;

    let stdout = take(&stdout);
    let stderr = take(&stderr);
    let termination = termination(status, timed_out);
    let cpu_time = tree.root_cpu_time();
    let limit_exceeded = limit_exceeded(termination, &invocation.limits, cpu_time, &stdout, &stderr);

    debug!(?termination, ?limit_exceeded, ?wall_time, ?cpu_time, "process finished");

    Ok(ProcessOutput {
        termination,
        exit_code: status.code(),
        signal: status.signal(),
        stdout,
        stderr,
        wall_time,
        limit_exceeded,
    })
}

/// Read a pipe to EOF, keeping at most the cap and discarding the rest
async fn capture<R>(mut pipe: R, sink: Arc<Mutex<CapturedOutput>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&buf[..n]),
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

/// Wait briefly for a reader; a process that escaped the tree may hold the pipe open
async fn drain(reader: Option<JoinHandle<()>>) {
    let Some(mut reader) = reader else {
        return;
    };
    if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
        warn!("output pipe still open after the process tree was killed");
        reader.abort();
    }
}

fn take(sink: &Mutex<CapturedOutput>) -> CapturedOutput {
    std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner))
}

fn termination(status: ExitStatus, timed_out: bool) -> Termination {
    if timed_out {
        return Termination::TimedOut;
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(signal)) => Termination::Signaled(signal),
        (None, None) => Termination::Exited(-1),
    }
}

fn limit_exceeded(
    termination: Termination,
    limits: &ResourceLimits,
    cpu_time: Duration,
    stdout: &CapturedOutput,
    stderr: &CapturedOutput,
) -> LimitExceeded {
    match termination {
        Termination::TimedOut => LimitExceeded::WallTime,
        // SIGXCPU at the soft RLIMIT_CPU, SIGKILL at the hard one; either may
        // also come from the program itself or the OOM killer
        Termination::Signaled(sig)
            if (sig == Signal::SIGXCPU as i32 || sig == Signal::SIGKILL as i32)
                && cpu_limit_reached(limits, cpu_time) =>
        {
            LimitExceeded::Time
        }
        Termination::Signaled(sig) if sig == Signal::SIGXFSZ as i32 => LimitExceeded::Output,
        _ if stdout.is_truncated() || stderr.is_truncated() => LimitExceeded::Output,
        _ => LimitExceeded::NotExceeded,
    }
}

/// Whether the program used enough CPU for RLIMIT_CPU to have fired
fn cpu_limit_reached(limits: &ResourceLimits, cpu_time: Duration) -> bool {
    RlimitPlan::from_limits(limits)
        .cpu_seconds
        .is_some_and(|secs| cpu_time + CPU_SAMPLE_SLACK >= Duration::from_secs(secs))
}
