use std::path::Path;
use std::time::Duration;

use codebox::{ExecutionRequest, ExecutionStatus};

use super::{leftover_entries, shell_pipeline};

#[tokio::test]
async fn test_no_artifacts_after_any_status() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let cases = [
        ("echo hi > out.txt\necho hi\n", "python", ExecutionStatus::Success),
        ("mkdir -p a/b\ntouch a/b/c\nexit 2\n", "python", ExecutionStatus::RuntimeError),
        ("if then fi (\n", "cpp", ExecutionStatus::CompileError),
        ("touch x\nwhile :; do :; done\n", "java", ExecutionStatus::Timeout),
        ("echo hi\n", "cobol", ExecutionStatus::InternalError),
    ];
    for (source, language, expected) in cases {
        let request =
            ExecutionRequest::new(source, language).with_time_limit(Duration::from_millis(500));
        let result = pipeline.execute(request).await;
        assert_eq!(result.status, expected, "{language}: {result:?}");
        assert_eq!(leftover_entries(root.path()), 0, "{language} left files behind");
    }
}

#[tokio::test]
async fn test_workspace_is_private_working_directory() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new("pwd\necho \"$HOME\"\necho \"$TMPDIR\"\n", "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    let lines: Vec<&str> = result.stdout.lines().collect();
    let cwd = Path::new(lines[0]);
    let name = cwd.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("codebox-"), "{name}");
    // HOME and TMPDIR point at the same directory, possibly through a symlink
    assert_eq!(Path::new(lines[1]).file_name(), cwd.file_name());
    assert_eq!(lines[1], lines[2]);
    assert!(!cwd.exists(), "workspace survived the request");
}

#[tokio::test]
async fn test_concurrent_executions_are_independent() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let python = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .execute(ExecutionRequest::new(
                    "echo python > shared.txt\nsleep 0.3\ncat shared.txt\npwd\n",
                    "python",
                ))
                .await
        })
    };
    let java = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .execute(ExecutionRequest::new(
                    "echo java > shared.txt\nsleep 0.3\ncat shared.txt\npwd\n",
                    "java",
                ))
                .await
        })
    };

    let python = python.await.unwrap();
    let java = java.await.unwrap();
    assert_eq!(python.status, ExecutionStatus::Success);
    assert_eq!(java.status, ExecutionStatus::Success);

    let python_lines: Vec<&str> = python.stdout.lines().collect();
    let java_lines: Vec<&str> = java.stdout.lines().collect();
    assert_eq!(python_lines[0], "python");
    assert_eq!(java_lines[0], "java");
    assert_ne!(python_lines[1], java_lines[1]);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_many_concurrent_requests_share_the_limit() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let result = pipeline
                    .execute(ExecutionRequest::new(format!("echo {i}\n"), "python"))
                    .await;
                (i, result)
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, format!("{i}\n"));
    }
    assert_eq!(leftover_entries(root.path()), 0);
}
