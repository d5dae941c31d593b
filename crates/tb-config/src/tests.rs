use super::*;
use std::io::Write;

#[test]
fn default_config_is_valid() {
    let cfg = BackplaneConfig::default();
    let warnings = validate_config(&cfg).expect("default config should be valid");
    assert!(!warnings.is_empty(), "missing registry_path should still warn");
}

#[test]
fn default_config_has_sensible_defaults() {
    let cfg = BackplaneConfig::default();
    assert_eq!(cfg.poll_interval_ms, 5_000);
    assert_eq!(cfg.worker_max_concurrent, 1);
    assert_eq!(cfg.shutdown_timeout_ms, 30_000);
    assert_eq!(cfg.wait_timeout_ms, 30_000);
    assert_eq!(cfg.log_level.as_deref(), Some("info"));
    assert_eq!(cfg.log_format, "text");
}

#[test]
fn parse_valid_toml_string() {
    let toml_str = r#"
        registry_path = "registry.json"
        poll_interval_ms = 1000
        log_level = "debug"
    "#;
    let cfg = parse_toml(toml_str).unwrap();
    assert_eq!(cfg.registry_path.as_deref(), Some("registry.json"));
    assert_eq!(cfg.poll_interval_ms, 1000);
    assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    // Fields absent from the file still pick up their serde defaults.
    assert_eq!(cfg.worker_max_concurrent, 1);
}

#[test]
fn parse_invalid_toml_gives_parse_error() {
    let bad = "this is [not valid toml =";
    let err = parse_toml(bad).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
}

#[test]
fn parse_wrong_types_gives_parse_error() {
    let toml_str = r#"poll_interval_ms = "soon""#;
    let err = parse_toml(toml_str).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
}

#[test]
fn validation_catches_invalid_log_level() {
    let cfg = BackplaneConfig {
        log_level: Some("verbose".into()),
        ..Default::default()
    };
    let err = validate_config(&cfg).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}

#[test]
fn validation_catches_invalid_log_format() {
    let cfg = BackplaneConfig {
        log_format: "xml".into(),
        ..Default::default()
    };
    let err = validate_config(&cfg).unwrap_err();
    match err {
        ConfigError::ValidationError { reasons } => assert!(reasons.iter().any(|r| r.contains("log_format"))),
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

#[test]
fn validation_catches_zero_worker_max_concurrent() {
    let cfg = BackplaneConfig {
        worker_max_concurrent: 0,
        ..Default::default()
    };
    let err = validate_config(&cfg).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}

#[test]
fn validation_catches_zero_poll_interval() {
    let cfg = BackplaneConfig {
        poll_interval_ms: 0,
        ..Default::default()
    };
    let err = validate_config(&cfg).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}

#[test]
fn large_timeout_produces_warning() {
    let cfg = BackplaneConfig {
        registry_path: Some("r.json".into()),
        wait_timeout_ms: 900_000,
        ..Default::default()
    };
    let warnings = validate_config(&cfg).unwrap();
    assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeTimeout { field, .. } if field == "wait_timeout_ms")));
}

#[test]
fn valid_config_with_registry_path_has_no_missing_field_warning() {
    let cfg = BackplaneConfig {
        registry_path: Some("r.json".into()),
        ..Default::default()
    };
    let warnings = validate_config(&cfg).unwrap();
    assert!(!warnings.iter().any(|w| matches!(w, ConfigWarning::MissingOptionalField { .. })));
}

#[test]
fn merge_overlay_overrides_base_options() {
    let base = BackplaneConfig {
        registry_path: Some("base.json".into()),
        log_level: Some("info".into()),
        ..Default::default()
    };
    let overlay = BackplaneConfig {
        registry_path: Some("overlay.json".into()),
        log_level: None,
        ..Default::default()
    };
    let merged = merge_configs(base, overlay);
    assert_eq!(merged.registry_path.as_deref(), Some("overlay.json"));
    // overlay carries its own default "info", so it still wins here.
    assert_eq!(merged.log_level.as_deref(), Some("info"));
}

#[test]
fn merge_preserves_base_registry_path_when_overlay_has_none() {
    let base = BackplaneConfig {
        registry_path: Some("base.json".into()),
        ..Default::default()
    };
    let merged = merge_configs(base, BackplaneConfig::default());
    assert_eq!(merged.registry_path.as_deref(), Some("base.json"));
}

#[test]
fn empty_string_toml_parses_to_defaults() {
    let cfg = parse_toml("").unwrap();
    assert_eq!(cfg, BackplaneConfig::default());
}

#[test]
fn toml_roundtrip() {
    let cfg = BackplaneConfig {
        registry_path: Some("r.json".into()),
        poll_interval_ms: 2_500,
        worker_max_concurrent: 4,
        shutdown_timeout_ms: 15_000,
        wait_timeout_ms: 45_000,
        log_level: Some("debug".into()),
        log_format: "json".into(),
    };
    let serialized = toml::to_string(&cfg).unwrap();
    let deserialized: BackplaneConfig = toml::from_str(&serialized).unwrap();
    assert_eq!(cfg, deserialized);
}

#[test]
fn load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tool-backplane.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "registry_path = \"registry.json\"\nlog_level = \"warn\"").unwrap();
    let cfg = load_config(Some(&path)).unwrap();
    assert_eq!(cfg.registry_path.as_deref(), Some("registry.json"));
    assert_eq!(cfg.log_level.as_deref(), Some("warn"));
}

#[test]
fn load_missing_file_gives_file_not_found() {
    let err = load_config(Some(Path::new("/nonexistent/tool-backplane.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn load_none_returns_default() {
    let cfg = load_config(None).unwrap();
    assert_eq!(cfg.poll_interval_ms, 5_000);
}

#[test]
fn config_error_display() {
    let e = ConfigError::FileNotFound { path: "/foo".into() };
    assert!(e.to_string().contains("/foo"));

    let e = ConfigError::ParseError { reason: "bad toml".into() };
    assert!(e.to_string().contains("bad toml"));
}

#[test]
fn config_warning_display() {
    let w = ConfigWarning::MissingOptionalField {
        field: "f".into(),
        hint: "h".into(),
    };
    assert!(w.to_string().contains('f'));

    let w = ConfigWarning::LargeTimeout { field: "b".into(), ms: 9999 };
    assert!(w.to_string().contains("9999"));
}
