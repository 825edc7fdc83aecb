//! Integration tests for taskhost-config

use std::io::Write;
use std::time::Duration;

use taskhost_config::*;
use temp_env::with_vars;

const YAML_CONFIG: &str = r#"
logging:
  level: debug
  format: compact

tasks:
  - name: resize
    concurrency_limit: 4
    executable: ./resize.sh
    work_dir: /srv/resize
    args: ["--quality", "80"]
    env:
      PATH: "/srv/resize/bin:%%%ORIGINAL_VALUE%%%"
    watchdog_timeout: 10
    check_interval: 50
    log_stderr: true
  - name: ocr
    executable: ./ocr
    work_dir: /srv/ocr
"#;

#[test]
fn test_yaml_config_loading() {
    let loader = ConfigLoader::with_prefix("TASKHOST_TEST_YAML");
    let config = loader.parse_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert_eq!(config.tasks.len(), 2);

    let resize = config.task("resize").unwrap();
    assert_eq!(resize.concurrency_limit, 4);
    assert_eq!(resize.command(), vec!["./resize.sh", "--quality", "80"]);
    assert_eq!(resize.watchdog_timeout, Duration::from_secs(10));
    assert_eq!(resize.check_interval, Duration::from_millis(50));
    assert!(resize.log_stderr);
    assert!(!resize.allow_writable_executable);

    let ocr = config.task("ocr").unwrap();
    assert_eq!(ocr.concurrency_limit, 1);
    assert_eq!(ocr.watchdog_timeout, Duration::from_secs(30));
    assert!(config.task("missing").is_none());
}

#[test]
fn test_json_config_file_loading() {
    let json = r#"{
        "tasks": [
            {
                "name": "render",
                "executable": "./render",
                "work_dir": "/srv/render",
                "allow_writable_executable": true
            }
        ]
    }"#;

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = ConfigLoader::with_prefix("TASKHOST_TEST_JSON")
        .from_file(file.path())
        .unwrap();
    let render = config.task("render").unwrap();
    assert!(render.allow_writable_executable);
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn test_env_overrides() {
    with_vars(
        vec![
            ("TASKHOST_LOG_LEVEL", Some("trace")),
            ("TASKHOST_LOG_FORMAT", Some("json")),
        ],
        || {
            let config = ConfigLoader::new()
                .parse_str(YAML_CONFIG, ConfigFormat::Yaml)
                .unwrap();
            assert_eq!(config.logging.level, LogLevel::Trace);
            assert_eq!(config.logging.format, LogFormat::Json);
        },
    );
}

#[test]
fn test_invalid_env_override_rejected() {
    with_vars(vec![("TASKHOST_BAD_LOG_LEVEL", Some("loud"))], || {
        let err = ConfigLoader::with_prefix("TASKHOST_BAD")
            .parse_str(YAML_CONFIG, ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    });
}

#[test]
fn test_structural_validation_on_load() {
    let yaml = r#"
tasks:
  - name: broken
    executable: ./broken
    work_dir: /srv/broken
    concurrency_limit: 0
"#;
    let err = ConfigLoader::with_prefix("TASKHOST_TEST_INVALID")
        .parse_str(yaml, ConfigFormat::Yaml)
        .unwrap_err();
    assert!(matches!(err, ConfigError::DomainError { .. }));
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .from_file(dir.path().join("absent.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}

#[test]
fn test_env_placeholder_uses_process_environment() {
    let task = TaskConfig::new("t", "./worker", "/tmp")
        .with_env("TASKHOST_TEST_EXTEND", "front:%%%ORIGINAL_VALUE%%%");

    with_vars(vec![("TASKHOST_TEST_EXTEND", Some("back"))], || {
        assert_eq!(
            task.resolved_env(),
            vec![("TASKHOST_TEST_EXTEND".to_string(), "front:back".to_string())]
        );
    });
}
