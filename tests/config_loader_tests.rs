use creditsync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const VARS: &[&str] = &[
    "CREDITSYNC_PROFILE",
    "CREDITSYNC_API_BIND_ADDR",
    "CREDITSYNC_LOG_LEVEL",
    "CREDITSYNC_OPERATOR_TOKEN",
    "CREDITSYNC_OPERATOR_TOKENS",
    "CREDITSYNC_WEBHOOK_STRIPE_SECRET",
    "CREDITSYNC_WEBHOOK_BACKEND_SECRET",
    "CREDITSYNC_SSE_CONNECT_RATE_LIMIT_PER_MINUTE",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for var in VARS {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.billing.idempotency_ttl_hours, 24);
    assert_eq!(cfg.sse.heartbeat_interval_seconds, 30);
    assert_eq!(cfg.sse.max_connection_age_seconds, 300);
    assert_eq!(cfg.sse.connect_rate_limit_per_minute, 10);
    assert!(cfg.operator_tokens.is_empty());
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CREDITSYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "CREDITSYNC_API_BIND_ADDR=192.168.0.10:5000\nCREDITSYNC_LOG_LEVEL=debug\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "CREDITSYNC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "CREDITSYNC_PROFILE=test\nCREDITSYNC_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.log_level, "debug");
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "CREDITSYNC_API_BIND_ADDR=127.0.0.1:3000\nCREDITSYNC_SSE_CONNECT_RATE_LIMIT_PER_MINUTE=4\n",
    );

    unsafe {
        env::set_var("CREDITSYNC_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.sse.connect_rate_limit_per_minute, 4);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("CREDITSYNC_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn production_profile_requires_operator_token_and_secret() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CREDITSYNC_PROFILE=prod\n");

    let err = loader(&temp_dir).load().expect_err("prod without tokens fails");
    assert!(matches!(err, ConfigError::MissingOperatorTokens));

    unsafe {
        env::set_var("CREDITSYNC_OPERATOR_TOKENS", "alpha, beta");
    }
    let err = loader(&temp_dir).load().expect_err("prod without secrets fails");
    assert!(matches!(err, ConfigError::NoWebhookSecrets));

    unsafe {
        env::set_var("CREDITSYNC_WEBHOOK_BACKEND_SECRET", "  shared  ");
    }
    let cfg = loader(&temp_dir).load().expect("prod config loads");
    assert_eq!(cfg.operator_tokens, vec!["alpha", "beta"]);
    assert_eq!(cfg.webhook_backend_secret.as_deref(), Some("shared"));

    clear_env();
}
