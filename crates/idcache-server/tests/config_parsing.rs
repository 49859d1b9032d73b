use std::time::Duration;
use std::{env, fs};

use idcache_core::{Client, GrantType};
use idcache_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("idcache.toml");

    let toml_content = r#"
[instance]
name = "edge-1"

[logging]
level = "debug"

[redis]
enabled = false
channel = "tenant-a:events"

[idcache.cache]
key_prefix = "tenant-a:"
default_ttl = "10m"
client_ttl = "2m"
negative_ttl = "15s"
sliding = true

[idcache.cleanup]
interval = "1h"
batch_size = 250
run_on_start = true

[[seed.clients]]
client_id = "app1"
name = "App One"
redirect_uris = ["https://app1/cb"]
allowed_grant_types = ["authorization_code", "refresh_token"]

[[seed.api_resources]]
name = "orders"
scopes = ["orders.read", "orders.write"]

[[seed.api_scopes]]
name = "orders.read"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.instance.name, "edge-1");
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.redis.channel, "tenant-a:events");
    assert_eq!(cfg.idcache.cache.key_prefix, "tenant-a:");
    assert_eq!(cfg.idcache.cache.default_ttl, Duration::from_secs(600));
    assert_eq!(cfg.idcache.cache.client_ttl(), Duration::from_secs(120));
    assert_eq!(cfg.idcache.cache.resource_ttl(), Duration::from_secs(600));
    assert!(cfg.idcache.cache.sliding);
    assert_eq!(cfg.idcache.cleanup.interval, Duration::from_secs(3600));
    assert_eq!(cfg.idcache.cleanup.batch_size, 250);
    assert!(cfg.idcache.cleanup.run_on_start);
    // Unset values keep their defaults
    assert_eq!(cfg.idcache.cleanup.max_batches_per_run, 100);
    assert_eq!(cfg.redis.pool_size, 10);

    assert_eq!(cfg.seed.clients.len(), 1);
    let client = Client::from(cfg.seed.clients[0].clone());
    assert_eq!(client.name, "App One");
    assert_eq!(
        client.allowed_grant_types,
        vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
    );
    assert_eq!(cfg.seed.api_resources[0].scopes.len(), 2);

    // 2) Env override should win over file
    unsafe {
        env::set_var("IDCACHE__IDCACHE__CLEANUP__BATCH_SIZE", "40");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.idcache.cleanup.batch_size, 40);
    // cleanup env var
    unsafe {
        env::remove_var("IDCACHE__IDCACHE__CLEANUP__BATCH_SIZE");
    }

    // 3) Invalid config (negative TTL above default TTL) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[idcache.cache]
default_ttl = "30s"
negative_ttl = "5m"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("negative_ttl must be <="));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults should load");
    assert!(cfg.idcache.cache.enabled);
    assert!(!cfg.redis.enabled);
    assert!(cfg.seed.is_empty());
}

#[test]
fn unknown_grant_type_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("bad_grant.toml");
    fs::write(
        &path,
        r#"
[[seed.clients]]
client_id = "app1"
allowed_grant_types = ["implicit"]
"#,
    )
    .expect("write toml");

    let err = load_config(path.to_str()).expect_err("expected deserialize error");
    assert!(err.contains("deserialize"));
}
