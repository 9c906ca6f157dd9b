use std::time::{Duration, Instant};

use codebox::{Config, ExecutionRequest, ExecutionStatus, LimitExceeded, Pipeline};

use super::shell_pipeline;

/// Output cap from `max_output = 64` in the shell config
const CAP: usize = 64 * 1024;

#[tokio::test]
async fn test_stdout_truncated_at_cap() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(
            "head -c 100000 /dev/zero | tr '\\0' a\n",
            "python",
        ))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout.len(), CAP);
    assert!(result.stdout.bytes().all(|b| b == b'a'));
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
    assert_eq!(result.limit_exceeded, LimitExceeded::Output);
}

#[tokio::test]
async fn test_stderr_truncated_independently() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(
            "echo fine\nhead -c 100000 /dev/zero | tr '\\0' e >&2\nexit 1\n",
            "cpp",
        ))
        .await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stdout, "fine\n");
    assert!(!result.stdout_truncated);
    assert_eq!(result.stderr.len(), CAP);
    assert!(result.stderr_truncated);
}

#[tokio::test]
async fn test_output_under_cap_is_exact() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(
            "printf 'a\\tb\\r\\n\\342\\234\\223'\n",
            "python",
        ))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "a\tb\r\n\u{2713}");
    assert!(!result.is_truncated());
}

#[tokio::test]
async fn test_file_size_limit() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(
            "exec dd if=/dev/zero of=big bs=1024 count=256 2>/dev/null\n",
            "python",
        ))
        .await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    if result.signal.is_some() {
        assert_eq!(result.limit_exceeded, LimitExceeded::Output);
    }
}

#[tokio::test]
async fn test_cpu_limit_is_timeout() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::parse_toml(
        r#"
        [languages.python]
        name = "Python (sh)"
        extension = "py"

        [languages.python.run]
        command = ["sh", "{source}"]

        [languages.python.run.limits]
        time_limit = 1.0
        "#,
    )
    .expect("Failed to parse config");
    config.workspace_root = Some(root.path().to_path_buf());
    let pipeline = Pipeline::new(config);

    let started = Instant::now();
    let request = ExecutionRequest::new("while :; do :; done\n", "python")
        .with_time_limit(Duration::from_secs(10));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.limit_exceeded, LimitExceeded::Time);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_self_kill_under_cpu_limit_is_runtime_error() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::parse_toml(
        r#"
        [languages.python]
        name = "Python (sh)"
        extension = "py"

        [languages.python.run]
        command = ["sh", "{source}"]

        [languages.python.run.limits]
        time_limit = 5.0
        "#,
    )
    .expect("Failed to parse config");
    config.workspace_root = Some(root.path().to_path_buf());
    let pipeline = Pipeline::new(config);

    let result = pipeline
        .execute(ExecutionRequest::new("kill -KILL $$\n", "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.limit_exceeded, LimitExceeded::NotExceeded);
    assert_eq!(result.signal, Some(9));
    assert_eq!(result.message, None);
}
