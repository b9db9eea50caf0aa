//! Verifies the documented configuration defaults and validation rules.

use minder_domain::config::{Config, ConfigSeverity};

#[test]
fn empty_toml_yields_documented_defaults() {
    let cfg = Config::from_toml("").unwrap();

    assert_eq!(cfg.agent.max_steps, 100);
    assert_eq!(cfg.agent.max_wall_seconds, 1800);
    assert_eq!(cfg.agent.max_tool_calls_per_step, 16);

    assert_eq!(cfg.delegate.max_steps, 50);
    assert_eq!(cfg.delegate.explore_max_steps, 15);
    assert_eq!(cfg.delegate.quota_per_conversation, 25);

    assert_eq!(cfg.router.default_ttl, 5);
    assert_eq!(cfg.router.stride, 1);

    assert_eq!(cfg.context.max_tokens, 200_000);
    assert!((cfg.context.compression_threshold - 0.7).abs() < 1e-9);
    assert_eq!(cfg.context.keep_recent, 5);
    assert_eq!(cfg.context.summary_max_tokens, 1000);

    assert_eq!(cfg.tools.timeout_seconds, 120);
    assert_eq!(cfg.queue.worker_count, 1);
    assert_eq!(cfg.timezone, "UTC");
    assert_eq!(cfg.paths.db_path, "minder.db");
}

#[test]
fn partial_toml_overrides_only_named_fields() {
    let cfg = Config::from_toml(
        r#"
        [agent]
        max_steps = 10

        [context]
        keep_recent = 2
        "#,
    )
    .unwrap();

    assert_eq!(cfg.agent.max_steps, 10);
    assert_eq!(cfg.agent.max_wall_seconds, 1800);
    assert_eq!(cfg.context.keep_recent, 2);
    assert_eq!(cfg.context.max_tokens, 200_000);
}

#[test]
fn default_config_validates_clean() {
    let cfg = Config::default();
    let issues = cfg.validate();
    assert!(
        !Config::has_errors(&issues),
        "default config must not produce errors: {issues:?}"
    );
}

#[test]
fn bad_model_spec_is_an_error() {
    let mut cfg = Config::default();
    cfg.llm.model_main = "not-a-spec".into();
    let issues = cfg.validate();
    assert!(Config::has_errors(&issues));
    assert!(issues.iter().any(|i| i.field == "llm.model_main"));
}

#[test]
fn zero_threshold_is_an_error() {
    let mut cfg = Config::default();
    cfg.context.compression_threshold = 0.0;
    assert!(Config::has_errors(&cfg.validate()));
}

#[test]
fn zero_delegate_quota_is_only_a_warning() {
    let mut cfg = Config::default();
    cfg.delegate.quota_per_conversation = 0;
    let issues = cfg.validate();
    assert!(!Config::has_errors(&issues));
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Warning));
}
