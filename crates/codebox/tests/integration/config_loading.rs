use codebox::config::{Config, ConfigError, Isolation, LanguageKind};

use super::fixture_config_path;

#[test]
fn test_load_shell_config() {
    let config = Config::from_file(fixture_config_path("shell.toml")).expect("Failed to load config");

    assert_eq!(config.max_concurrency, 4);
    assert_eq!(config.max_time_limit, 30.0);
    assert_eq!(config.isolation, Isolation::Process);
    assert_eq!(config.default_limits.max_output, Some(64));
    assert_eq!(config.compile_limits.wall_time_limit, Some(10.0));
    for kind in LanguageKind::ALL {
        let language = config.language(kind).expect("language configured");
        assert_eq!(language.run.command[0], "sh");
    }
}

#[test]
fn test_missing_languages_come_from_defaults() {
    let config =
        Config::from_file(fixture_config_path("python_only.toml")).expect("Failed to load config");

    assert_eq!(config.max_concurrency, 2);
    assert_eq!(config.default_limits.memory_limit, Some(131072));

    let python = config.language(LanguageKind::Python).unwrap();
    assert_eq!(python.run.command, vec!["python3", "-S", "{source}"]);

    let java = config.language(LanguageKind::Java).unwrap();
    assert_eq!(java.source_name(), "Main.java");
    let cpp = config.language(LanguageKind::Cpp).unwrap();
    assert!(cpp.is_compiled());
}

#[test]
fn test_load_invalid_unknown_language() {
    let err = Config::from_file(fixture_config_path("invalid_unknown_language.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("rust"), "{err}");
}

#[test]
fn test_load_invalid_interpreted_with_compile() {
    let err =
        Config::from_file(fixture_config_path("invalid_interpreted_compile.toml")).unwrap_err();
    assert!(err.to_string().contains("must not have a compile section"), "{err}");
}

#[test]
fn test_load_invalid_empty_run_command() {
    let result = Config::from_file(fixture_config_path("invalid_empty_run_command.toml"));
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_time_limits() {
    let err = Config::from_file(fixture_config_path("invalid_time_limits.toml")).unwrap_err();
    assert!(err.to_string().contains("default_time_limit"), "{err}");
}

#[test]
fn test_load_missing_file() {
    let result = Config::from_file(fixture_config_path("does_not_exist.toml"));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_without_file_uses_embedded_defaults() {
    let config = Config::load(None).expect("Failed to load defaults");
    assert_eq!(config.languages.len(), LanguageKind::ALL.len());
    assert_eq!(config.default_time_limit, 5.0);
}

#[test]
fn test_example_config_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codebox.toml");
    std::fs::write(&path, codebox::EXAMPLE_CONFIG).unwrap();

    let from_file = Config::from_file(&path).expect("Failed to load example config");
    let embedded = Config::default();
    assert_eq!(from_file.languages.len(), embedded.languages.len());
    assert_eq!(from_file.default_limits, embedded.default_limits);
    assert_eq!(from_file.compile_limits, embedded.compile_limits);
}
