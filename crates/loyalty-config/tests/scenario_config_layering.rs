//! Scenario: layered config hashing, overrides and typed settings
//!
//! # Invariants under test
//!
//! 1. Same YAML input produces an identical hash; key order does not matter.
//! 2. Later layers override earlier ones leaf by leaf.
//! 3. Typed settings read the merged tree and fall back to defaults.
//! 4. A literal DSN carrying a password is refused.
//! 5. Keys nobody reads are reported (Warn) or rejected (Fail).
//! 6. Precedence is YAML < command-line flag < environment variable; the
//!    DSN flag is only a fallback for an unset DSN env var.

use std::time::Duration;

use loyalty_config::{
    load_layered_yaml_from_strings, report_unused_keys, CliOverrides, EnvOverrides, Settings,
    UnusedKeyPolicy,
};

const BASE_YAML: &str = r#"
server:
  run_address: "127.0.0.1:8080"
database:
  url_env: "DATABASE_URI"
partner:
  base_url: "http://accrual.internal:8081"
  rate_limit_retries: 2
fetch:
  interval_ms: 1000
  workers: 20
"#;

const BASE_YAML_REORDERED: &str = r#"
fetch:
  workers: 20
  interval_ms: 1000
partner:
  rate_limit_retries: 2
  base_url: "http://accrual.internal:8081"
database:
  url_env: "DATABASE_URI"
server:
  run_address: "127.0.0.1:8080"
"#;

const OVERLAY_YAML: &str = r#"
fetch:
  workers: 4
aggregator:
  interval_ms: 250
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_changes_hash_and_overrides_leaves() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);

    let s = Settings::from_config_json(&layered.config_json).unwrap();
    assert_eq!(s.fetch.workers, 4, "overlay wins");
    assert_eq!(s.fetch.interval, Duration::from_millis(1000), "base survives");
    assert_eq!(s.aggregator.interval, Duration::from_millis(250));
    assert_eq!(s.aggregator.queue_capacity, 1000, "default");
    assert_eq!(s.partner.base_url, "http://accrual.internal:8081");
}

#[test]
fn literal_dsn_with_password_is_refused() {
    let yaml = r#"
database:
  url_env: "postgres://loyalty:s3cret@db:5432/loyalty"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
    assert!(!msg.contains("s3cret"), "secret must not leak into the error");
}

#[test]
fn unused_keys_reported_and_failable() {
    let yaml = r#"
fetch:
  workers: 8
  burst: 3
legacy:
  flag: true
"#;
    let cfg = load_layered_yaml_from_strings(&[yaml]).unwrap();

    let report = report_unused_keys(&cfg.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/fetch/burst".to_string(), "/legacy/flag".to_string()]
    );

    let err = report_unused_keys(&cfg.config_json, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn fully_consumed_config_is_clean() {
    let cfg = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let report = report_unused_keys(&cfg.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}

#[test]
fn shipped_base_config_is_clean_and_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/loyalty.yaml");
    let loaded = loyalty_config::load_layered_yaml(&[path]).expect("load");

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).expect("clean");
    assert!(report.is_clean());

    let s = Settings::from_config_json(&loaded.config_json).expect("settings");
    assert_eq!(s, Settings::default());
}

#[test]
fn file_layers_merge_in_path_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).expect("write base");
    std::fs::write(&overlay, "fetch:\n  workers: 4\n").expect("write overlay");

    let base_s = base.to_string_lossy().into_owned();
    let overlay_s = overlay.to_string_lossy().into_owned();

    let forward = loyalty_config::load_layered_yaml(&[base_s.as_str(), overlay_s.as_str()]).expect("load");
    let s = Settings::from_config_json(&forward.config_json).expect("settings");
    assert_eq!(s.fetch.workers, 4);
    assert_eq!(s.fetch.interval, Duration::from_millis(1000));

    let backward = loyalty_config::load_layered_yaml(&[overlay_s.as_str(), base_s.as_str()]).expect("load");
    let s = Settings::from_config_json(&backward.config_json).expect("settings");
    assert_eq!(s.fetch.workers, 20);
    assert_ne!(forward.config_hash, backward.config_hash);

    let missing = dir.path().join("missing.yaml").to_string_lossy().into_owned();
    assert!(loyalty_config::load_layered_yaml(&[missing.as_str()]).is_err());
}

#[test]
fn environment_beats_command_line_flags() {
    let cfg = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let yaml_only = Settings::from_config_json(&cfg.config_json).unwrap();

    let s = yaml_only
        .clone()
        .with_overrides(
            CliOverrides {
                run_address: Some(":8080".to_string()),
                partner_base_url: Some("http://flag:8081".to_string()),
            },
            EnvOverrides {
                run_address: Some("0.0.0.0:9000".to_string()),
                partner_base_url: None,
            },
        )
        .unwrap();
    assert_eq!(s.run_address, "0.0.0.0:9000", "env wins over -a");
    assert_eq!(s.partner.base_url, "http://flag:8081", "-r wins over yaml");

    let untouched = yaml_only
        .clone()
        .with_overrides(CliOverrides::default(), EnvOverrides::default())
        .unwrap();
    assert_eq!(untouched, yaml_only);
}

#[test]
fn dsn_env_var_beats_flag_and_flag_is_fallback() {
    let yaml = r#"
database:
  url_env: "LOYALTY_SCENARIO_DSN_PRECEDENCE"
"#;
    let cfg = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let s = Settings::from_config_json(&cfg.config_json).unwrap();

    std::env::remove_var("LOYALTY_SCENARIO_DSN_PRECEDENCE");
    assert_eq!(
        s.database.resolve_url(Some("postgres://flag-host/loyalty")).unwrap(),
        "postgres://flag-host/loyalty"
    );
    let err = s.database.resolve_url(None).unwrap_err();
    assert!(err.to_string().contains("LOYALTY_SCENARIO_DSN_PRECEDENCE"), "{err}");

    std::env::set_var("LOYALTY_SCENARIO_DSN_PRECEDENCE", "postgres://env-host/loyalty");
    assert_eq!(
        s.database.resolve_url(Some("postgres://flag-host/loyalty")).unwrap(),
        "postgres://env-host/loyalty"
    );
    std::env::remove_var("LOYALTY_SCENARIO_DSN_PRECEDENCE");
}

#[test]
fn overrides_are_validated() {
    let s = Settings::default().with_overrides(
        CliOverrides::default(),
        EnvOverrides {
            run_address: None,
            partner_base_url: Some("   ".to_string()),
        },
    );
    assert!(s.is_err(), "blank base url must not pass validation");
}
