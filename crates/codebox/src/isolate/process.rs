//! Running invocations inside an isolate box

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::isolate::IsolateError;
use crate::isolate::box_manager::IsolateBox;
use crate::isolate::command::IsolateCommand;
use crate::isolate::meta::MetaFile;
use crate::sandbox::{
    CapturedOutput, Invocation, ProcessOutput, SandboxError, resolve_command, validate_mounts,
};
use crate::types::LimitExceeded;

/// Working directory inside the sandbox
const BOX_DIR: &str = "/box";

/// Added on top of isolate's own limits before we give up on isolate itself
const BACKSTOP_MARGIN: Duration = Duration::from_secs(5);

const STDIN_FILE: &str = ".stdin";
const STDOUT_FILE: &str = ".stdout";
const STDERR_FILE: &str = ".stderr";

#[instrument(skip(sandbox, invocation), fields(box_id = sandbox.id()))]
pub(crate) async fn run(
    sandbox: &IsolateBox,
    invocation: &Invocation,
) -> Result<ProcessOutput, SandboxError> {
    // isolate execs without a PATH search, and symlinks may point outside the
    // mounted directories
    let mut argv = invocation.command.clone();
    resolve_command(&mut argv, &invocation.path)?;
    if let Some(first) = argv.first_mut()
        && first.starts_with('/')
        && let Ok(canonical) = std::fs::canonicalize(&*first)
    {
        *first = canonical.to_string_lossy().into_owned();
    }
    validate_mounts(&invocation.mounts)?;

    let work_dir = sandbox.work_dir();
    let meta_path = sandbox.root().join(".meta");
    for stale in [STDOUT_FILE, STDERR_FILE] {
        remove_if_exists(&work_dir.join(stale)).await?;
    }
    remove_if_exists(&meta_path).await?;
    let stdin = invocation.stdin.as_deref().unwrap_or_default();
    tokio::fs::write(work_dir.join(STDIN_FILE), stdin)
        .await
        .map_err(IsolateError::Io)?;

    let mut limits = invocation.limits.clone();
    limits.wall_time_limit = Some(invocation.wall_time.as_secs_f64());
    let extra = limits.extra_time.unwrap_or(0.0);

    let command = IsolateCommand::new(sandbox.isolate_path(), sandbox.id())
        .cgroup(sandbox.cgroup())
        .limits(limits)
        .mounts(invocation.mounts.iter().cloned())
        .env("PATH", &invocation.path)
        .env("HOME", BOX_DIR)
        .env("TMPDIR", BOX_DIR)
        .envs(&invocation.env)
        .meta_file(&meta_path)
        .stdin(format!("{BOX_DIR}/{STDIN_FILE}"))
        .stdout(format!("{BOX_DIR}/{STDOUT_FILE}"))
        .stderr(format!("{BOX_DIR}/{STDERR_FILE}"))
        .working_dir(BOX_DIR)
        .command(argv);
    let args = command.build();
    debug!(?args, "running isolate command");

    let (program, rest) = args.split_first().ok_or(SandboxError::EmptyCommand)?;
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(IsolateError::SpawnFailed)?;

    let backstop = invocation.wall_time + Duration::from_secs_f64(extra.max(0.0)) + BACKSTOP_MARGIN;
    let status = match tokio::time::timeout(backstop, child.wait()).await {
        Ok(status) => status.map_err(IsolateError::Io)?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(IsolateError::Unresponsive(backstop.as_secs_f64()).into());
        }
    };

    if !meta_path.exists() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        return Err(IsolateError::CommandFailed(format!(
            "no meta file produced ({status}): {}",
            stderr.trim()
        ))
        .into());
    }

    let meta = MetaFile::load(&meta_path).await?;
    let termination = meta.termination()?;
    let cap = invocation.limits.output_cap_bytes();
    let stdout = read_capped(&work_dir.join(STDOUT_FILE), cap).await?;
    let stderr = read_capped(&work_dir.join(STDERR_FILE), cap).await?;

    let mut limit_exceeded = meta.limit_exceeded();
    if !limit_exceeded.is_exceeded() && (stdout.is_truncated() || stderr.is_truncated()) {
        limit_exceeded = LimitExceeded::Output;
    }
    let wall_time = match meta.wall_time() {
        Duration::ZERO => started.elapsed(),
        measured => measured,
    };

    debug!(?termination, ?limit_exceeded, ?wall_time, "isolate run finished");

    Ok(ProcessOutput {
        termination,
        exit_code: meta.exit_code(),
        signal: meta.signal(),
        stdout,
        stderr,
        wall_time,
        limit_exceeded,
    })
}

async fn read_capped(path: &Path, cap: usize) -> Result<CapturedOutput, IsolateError> {
    let mut captured = CapturedOutput::with_cap(cap);
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(captured),
        Err(e) => return Err(e.into()),
    };
    // One byte past the cap is enough to know it was exceeded
    let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
    let mut bytes = Vec::new();
    file.take(limit).read_to_end(&mut bytes).await?;
    captured.push(&bytes);
    Ok(captured)
}

async fn remove_if_exists(path: &Path) -> Result<(), IsolateError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
