use std::time::{Duration, Instant};

use codebox::{Config, ExecutionRequest, ExecutionStatus, Pipeline};

use super::{fixture_source, leftover_entries};

fn pipeline(root: &std::path::Path) -> Pipeline {
    let config = Config {
        workspace_root: Some(root.to_path_buf()),
        ..Config::default()
    };
    Pipeline::new(config)
}

#[tokio::test]
async fn test_python_hello() {
    let root = tempfile::tempdir().unwrap();
    let result = pipeline(root.path())
        .execute(ExecutionRequest::new(fixture_source("hello.py"), "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn test_cpp_hello() {
    let root = tempfile::tempdir().unwrap();
    let result = pipeline(root.path())
        .execute(ExecutionRequest::new(fixture_source("hello.cpp"), "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_java_hello() {
    let root = tempfile::tempdir().unwrap();
    let request = ExecutionRequest::new(fixture_source("Main.java"), "java")
        .with_time_limit(Duration::from_secs(10));
    let result = pipeline(root.path()).execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn test_cpp_compile_error() {
    let root = tempfile::tempdir().unwrap();
    let result = pipeline(root.path())
        .execute(ExecutionRequest::new(fixture_source("compile_error.cpp"), "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("error"), "{}", result.stderr);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_java_without_main_class() {
    let root = tempfile::tempdir().unwrap();
    let result = pipeline(root.path())
        .execute(ExecutionRequest::new(fixture_source("WrongClass.java"), "java"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert!(result.message.unwrap().contains("Main.class"));
}

#[tokio::test]
async fn test_python_runtime_error() {
    let root = tempfile::tempdir().unwrap();
    let result = pipeline(root.path())
        .execute(ExecutionRequest::new(fixture_source("runtime_error.py"), "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.stderr, "boom\n");
    assert_eq!(result.exit_code, Some(1));
}

#[tokio::test]
async fn test_python_infinite_loop() {
    let root = tempfile::tempdir().unwrap();
    let limit = Duration::from_secs(1);
    let started = Instant::now();
    let result = pipeline(root.path())
        .execute(
            ExecutionRequest::new(fixture_source("infinite_loop.py"), "python")
                .with_time_limit(limit),
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < limit * 2);
}

#[tokio::test]
async fn test_cpp_echo_stdin() {
    let root = tempfile::tempdir().unwrap();
    let request =
        ExecutionRequest::new(fixture_source("echo.cpp"), "cpp").with_stdin("test input\n");
    let result = pipeline(root.path()).execute(request).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "test input\n");
}

#[tokio::test]
async fn test_mixed_languages_concurrently() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(root.path());

    let (python, cpp) = tokio::join!(
        pipeline.execute(ExecutionRequest::new("print('from python')", "python")),
        pipeline.execute(ExecutionRequest::new(
            "#include <cstdio>\nint main() { std::puts(\"from cpp\"); }\n",
            "cpp",
        )),
    );
    assert_eq!(python.stdout, "from python\n");
    assert_eq!(cpp.stdout, "from cpp\n");
    assert_eq!(leftover_entries(root.path()), 0);
}
