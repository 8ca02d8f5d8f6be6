//! 配置模块单元测试

use crate::runtime::task::RetryPolicy;
use crate::util::config::{
    is_test_stage, load_layered_from, ConfigError, ConfigOverrides, PoolConfig, RetryConfig,
    ENV_LIMIT, ENV_RETRY_ATTEMPTS, ENV_RETRY_DELAY_MS, ENV_STAGE,
};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_default_config() {
    let config = PoolConfig::default();
    assert_eq!(config.limit, None);
    assert_eq!(config.retry, None);
    assert!(!config.fail_fast);
    assert!(config.validate().is_ok());
}

#[test]
fn test_retry_config_policy() {
    let retry = RetryConfig {
        attempts: 4,
        base_delay_ms: 25,
    };
    assert_eq!(retry.policy(), RetryPolicy::new(4, Duration::from_millis(25)));
    assert_eq!(RetryConfig::default().attempts, 3);
    assert_eq!(RetryConfig::default().base_delay_ms, 100);
}

#[test]
fn test_parse_toml() {
    let config = PoolConfig::from_toml_str(
        r#"
        limit = 4
        fail_fast = true

        [retry]
        attempts = 5
        base_delay_ms = 20
        "#,
    )
    .unwrap();

    assert_eq!(config.limit, Some(4));
    assert!(config.fail_fast);
    assert_eq!(
        config.retry,
        Some(RetryConfig {
            attempts: 5,
            base_delay_ms: 20,
        })
    );
}

#[test]
fn test_parse_toml_partial_retry_uses_defaults() {
    let config = PoolConfig::from_toml_str("[retry]\nattempts = 2\n").unwrap();
    assert_eq!(config.limit, None);
    assert_eq!(
        config.retry,
        Some(RetryConfig {
            attempts: 2,
            base_delay_ms: 100,
        })
    );
}

#[test]
fn test_parse_toml_empty() {
    assert_eq!(PoolConfig::from_toml_str("").unwrap(), PoolConfig::default());
}

#[test]
fn test_parse_toml_invalid() {
    let err = PoolConfig::from_toml_str("limit = \"many\"").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_toml_string_reparses() {
    let config = PoolConfig {
        limit: Some(2),
        retry: Some(RetryConfig::default()),
        fail_fast: false,
    };
    let rendered = config.to_toml_string().unwrap();
    assert!(rendered.contains("limit = 2"));
    assert_eq!(PoolConfig::from_toml_str(&rendered).unwrap(), config);
}

#[test]
fn test_load_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "limit = 3").unwrap();

    let config = PoolConfig::load(file.path()).unwrap();
    assert_eq!(config.limit, Some(3));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");

    let err = PoolConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::IoError { .. }));
    assert!(err.to_string().contains("missing.toml"));
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drainpool.toml");
    let config = PoolConfig {
        limit: None,
        retry: Some(RetryConfig {
            attempts: 2,
            base_delay_ms: 0,
        }),
        fail_fast: true,
    };

    config.save(&path).unwrap();
    assert_eq!(PoolConfig::load(&path).unwrap(), config);
}

#[test]
fn test_apply_env() {
    let mut config = PoolConfig::default();
    config
        .apply_env_from(env(&[
            (ENV_LIMIT, "8"),
            (ENV_RETRY_ATTEMPTS, "4"),
            (ENV_RETRY_DELAY_MS, " 50 "),
        ]))
        .unwrap();

    assert_eq!(config.limit, Some(8));
    assert_eq!(
        config.retry,
        Some(RetryConfig {
            attempts: 4,
            base_delay_ms: 50,
        })
    );
}

#[test]
fn test_apply_env_ignores_empty_values() {
    let mut config = PoolConfig {
        limit: Some(2),
        ..PoolConfig::default()
    };
    config.apply_env_from(env(&[(ENV_LIMIT, "")])).unwrap();
    assert_eq!(config.limit, Some(2));
}

#[test]
fn test_apply_env_rejects_garbage() {
    let mut config = PoolConfig::default();
    let err = config
        .apply_env_from(env(&[(ENV_RETRY_ATTEMPTS, "lots")]))
        .unwrap_err();

    match err {
        ConfigError::InvalidEnv { key, value } => {
            assert_eq!(key, ENV_RETRY_ATTEMPTS);
            assert_eq!(value, "lots");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_test_stage_forces_limit() {
    for stage in ["test", "TEST", " Test "] {
        let mut config = PoolConfig::default();
        config
            .apply_env_from(env(&[(ENV_STAGE, stage), (ENV_LIMIT, "16")]))
            .unwrap();
        assert_eq!(config.limit, Some(1), "stage {:?}", stage);
    }

    assert!(!is_test_stage(&env(&[(ENV_STAGE, "production")])));
    assert!(!is_test_stage(&env(&[])));
}

#[test]
fn test_validate() {
    let zero_limit = PoolConfig {
        limit: Some(0),
        ..PoolConfig::default()
    };
    assert!(matches!(
        zero_limit.validate(),
        Err(ConfigError::InvalidValue { field: "limit", .. })
    ));

    let zero_attempts = PoolConfig {
        retry: Some(RetryConfig {
            attempts: 0,
            base_delay_ms: 10,
        }),
        ..PoolConfig::default()
    };
    assert!(matches!(
        zero_attempts.validate(),
        Err(ConfigError::InvalidValue {
            field: "retry.attempts",
            ..
        })
    ));
}

#[test]
fn test_layering_priority() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "limit = 2\nfail_fast = true\n\n[retry]\nattempts = 2").unwrap();

    // file only
    let config =
        load_layered_from(Some(file.path()), &ConfigOverrides::default(), env(&[])).unwrap();
    assert_eq!(config.limit, Some(2));
    assert!(config.fail_fast);

    // env beats file
    let config = load_layered_from(
        Some(file.path()),
        &ConfigOverrides::default(),
        env(&[(ENV_LIMIT, "4"), (ENV_RETRY_ATTEMPTS, "6")]),
    )
    .unwrap();
    assert_eq!(config.limit, Some(4));
    assert_eq!(config.retry.map(|r| r.attempts), Some(6));

    // cli beats env
    let overrides = ConfigOverrides {
        limit: Some(8),
        fail_fast: Some(false),
        ..ConfigOverrides::default()
    };
    let config =
        load_layered_from(Some(file.path()), &overrides, env(&[(ENV_LIMIT, "4")])).unwrap();
    assert_eq!(config.limit, Some(8));
    assert!(!config.fail_fast);

    // test stage beats everything
    let config = load_layered_from(
        Some(file.path()),
        &overrides,
        env(&[(ENV_STAGE, "test"), (ENV_LIMIT, "4")]),
    )
    .unwrap();
    assert_eq!(config.limit, Some(1));
}

#[test]
fn test_layering_validates() {
    let overrides = ConfigOverrides {
        attempts: Some(0),
        ..ConfigOverrides::default()
    };
    let err = load_layered_from(None, &overrides, env(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}
