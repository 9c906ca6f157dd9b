use codebox::{Config, ExecutionRequest, ExecutionStatus, Pipeline};

use super::{leftover_entries, shell_pipeline};

const SYNTAX_ERROR: &str = "echo before\nif then fi (\n";

#[tokio::test]
async fn test_compile_error_carries_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(SYNTAX_ERROR, "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("main.cpp"), "{}", result.stderr);
    assert!(result.exit_code.is_none());
    assert!(result.message.is_some());
}

#[tokio::test]
async fn test_compile_error_names_java_source() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new(SYNTAX_ERROR, "java"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert!(result.stderr.contains("Main.java"), "{}", result.stderr);
}

#[tokio::test]
async fn test_compile_error_skips_run() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let marker = outside.path().join("ran");
    let pipeline = shell_pipeline(root.path());

    // sh runs the first line before it reaches the syntax error, so the
    // marker appears only if the run step is invoked
    let source = format!("touch {}\nif then fi (\n", marker.display());
    let result = pipeline.execute(ExecutionRequest::new(source, "cpp")).await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert!(!marker.exists(), "run step was invoked after a compile error");
}

#[tokio::test]
async fn test_compile_error_is_never_timeout() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let request = ExecutionRequest::new(SYNTAX_ERROR, "java")
        .with_time_limit(std::time::Duration::from_millis(1));
    let result = pipeline.execute(request).await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
}

#[tokio::test]
async fn test_successful_compile_runs_artifact() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = shell_pipeline(root.path());

    let result = pipeline
        .execute(ExecutionRequest::new("echo \"$0\"\nls\n", "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    let lines: Vec<&str> = result.stdout.lines().collect();
    // The run command got the artifact, not the source
    assert_eq!(lines[0], "main");
    assert!(lines.contains(&"main.cpp"));
}

#[tokio::test]
async fn test_missing_artifact_is_compile_error() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::parse_toml(
        r#"
        [languages.cpp]
        name = "C++ (sh)"
        extension = "cpp"

        [languages.cpp.compile]
        command = ["sh", "-n", "{source}"]
        source_name = "main.cpp"
        output_name = "main"

        [languages.cpp.run]
        command = ["sh", "{binary}"]
        "#,
    )
    .expect("Failed to parse config");
    config.workspace_root = Some(root.path().to_path_buf());
    let pipeline = Pipeline::new(config);

    let result = pipeline
        .execute(ExecutionRequest::new("echo hi\n", "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.stdout, "");
    let message = result.message.expect("missing artifact is explained");
    assert!(message.contains("'main'"), "{message}");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn test_compile_timeout_is_compile_error() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::parse_toml(
        r#"
        [compile_limits]
        wall_time_limit = 0.5

        [languages.cpp]
        name = "C++ (sh)"
        extension = "cpp"

        [languages.cpp.compile]
        command = ["sh", "-c", "while :; do :; done"]
        source_name = "main.cpp"
        output_name = "main"

        [languages.cpp.run]
        command = ["sh", "{binary}"]
        "#,
    )
    .expect("Failed to parse config");
    config.workspace_root = Some(root.path().to_path_buf());
    let pipeline = Pipeline::new(config);

    let result = pipeline
        .execute(ExecutionRequest::new("echo hi\n", "cpp"))
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    let message = result.message.expect("compile timeout is explained");
    assert!(message.contains("0.5s"), "{message}");
}
