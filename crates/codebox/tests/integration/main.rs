//! Integration tests for codebox
//!
//! Most tests drive the pipeline with a configuration in which every language
//! is played by the POSIX shell, so they only need `sh` and coreutils.
//!
//! Tests with real toolchains (python3, g++, javac) need the
//! `integration-tests` feature:
//!    cargo test -p codebox --features integration-tests
//!
//! Isolate tests additionally require root and are marked `#[ignore]`:
//!    cargo test -p codebox --features integration-tests -- --include-ignored

use std::path::Path;
use std::time::Duration;

use codebox::{Config, Pipeline};

mod compilation;
mod config_loading;
mod resource_limits;
mod timeouts;
#[cfg(feature = "integration-tests")]
mod toolchains;
mod workspace_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
#[cfg_attr(not(feature = "integration-tests"), allow(dead_code))]
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

pub(crate) fn fixture_config_path(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

/// Shell-backed configuration with workspaces created under `root`
pub(crate) fn shell_config(root: &Path) -> Config {
    let mut config =
        Config::from_file(fixture_config_path("shell.toml")).expect("Failed to load shell config");
    config.workspace_root = Some(root.to_path_buf());
    config
}

pub(crate) fn shell_pipeline(root: &Path) -> Pipeline {
    Pipeline::new(shell_config(root))
}

/// Number of entries left under a workspace root
pub(crate) fn leftover_entries(root: &Path) -> usize {
    std::fs::read_dir(root)
        .expect("Failed to read workspace root")
        .count()
}

/// Wait until a process no longer exists (or is only a zombie)
pub(crate) async fn process_is_gone(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let gone = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            // The state field follows the parenthesised command name
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        };
        if gone {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
