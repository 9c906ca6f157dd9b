use std::time::{Duration, Instant};

use codebox::{ExecutionRequest, ExecutionStatus, LimitExceeded};

use super::{leftover_entries, process_is_gone, shell_pipeline};

#[tokio::test]
async fn test_infinite_loop_times_out_promptly() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());
    let limit = Duration::from_secs(1);

    let started = Instant::now();
    let result = pipeline
        .execute(ExecutionRequest::new("while :; do :; done\n", "python").with_time_limit(limit))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.limit_exceeded, LimitExceeded::WallTime);
    assert!(elapsed < limit * 2, "took {elapsed:?}");
    assert!(result.message.unwrap().contains("1s"));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let request = ExecutionRequest::new("echo started\nwhile :; do :; done\n", "cpp")
        .with_time_limit(Duration::from_secs(1));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.stdout, "started\n");
}

#[tokio::test]
async fn test_timeout_kills_descendants() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let request = ExecutionRequest::new("sleep 60 &\necho $!\nwhile :; do :; done\n", "python")
        .with_time_limit(Duration::from_secs(1));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);

    let pid: u32 = result
        .stdout
        .trim()
        .parse()
        .expect("script prints the background pid");
    assert!(
        process_is_gone(pid, Duration::from_secs(2)).await,
        "background process {pid} outlived the timeout"
    );
}

#[tokio::test]
async fn test_timeout_kills_process_in_new_session() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let request =
        ExecutionRequest::new("setsid sleep 30 &\necho $!\nwhile :; do :; done\n", "python")
            .with_time_limit(Duration::from_secs(1));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);

    let pid: u32 = result
        .stdout
        .trim()
        .parse()
        .expect("script prints the background pid");
    assert!(
        process_is_gone(pid, Duration::from_secs(2)).await,
        "process {pid} left the process group and outlived the timeout"
    );
}

#[tokio::test]
async fn test_exit_kills_process_in_new_session() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(
            "setsid sleep 30 &\necho $!\nsleep 0.3\n",
            "python",
        ))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);

    let pid: u32 = result.stdout.trim().parse().unwrap();
    assert!(
        process_is_gone(pid, Duration::from_secs(2)).await,
        "process {pid} outlived the program"
    );
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_background_child_does_not_hold_result() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let started = Instant::now();
    let result = pipeline
        .execute(ExecutionRequest::new("sleep 60 &\necho $!\n", "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(started.elapsed() < Duration::from_secs(5));

    let pid: u32 = result.stdout.trim().parse().unwrap();
    assert!(process_is_gone(pid, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_nonzero_exit_racing_timeout_is_timeout() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    // The shell never gets to its exit; the limit fires first
    let request = ExecutionRequest::new("sleep 5\nexit 1\n", "java")
        .with_time_limit(Duration::from_millis(500));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.exit_code, None);
}

#[tokio::test]
async fn test_time_limit_is_clamped() {
    let root = tempfile::tempdir().unwrap();
    let mut config = super::shell_config(root.path());
    config.max_time_limit = 1.0;
    let pipeline = codebox::Pipeline::new(config);

    let started = Instant::now();
    let request = ExecutionRequest::new("sleep 30\n", "python")
        .with_time_limit(Duration::from_secs(3600));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}
