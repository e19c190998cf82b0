use super::*;
use serial_test::serial;

const FALLBACK_VARS: [&str; 5] = [
    "CACHE_ENABLED",
    "REDIS_HOST",
    "REDIS_PORT",
    "REDIS_PASSWORD",
    "PORT",
];

/// Run `body` with the given environment, restoring a clean slate afterwards.
fn with_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
    for (name, value) in vars {
        // SAFETY: callers are `#[serial]`, so no other test thread reads the environment.
        unsafe { std::env::set_var(name, value) };
    }
    let result = body();
    for name in FALLBACK_VARS {
        // SAFETY: as above.
        unsafe { std::env::remove_var(name) };
    }
    result
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_deployment_expectations() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4000);
    assert_eq!(settings.server.admin_addr.port(), 4001);
    assert_eq!(settings.store.backend, StoreBackend::Redis);
    assert_eq!(settings.store.host, "localhost");
    assert_eq!(settings.store.port, 6379);
    assert_eq!(settings.store.db, 0);
    assert!(settings.store.password.is_none());
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.key_prefix, "pelias:");
    assert_eq!(settings.cache.max_result_size, 50);
    assert_eq!(settings.cache.max_body_bytes, 1024 * 1024);
    assert_eq!(settings.cache.ttl, TtlTable::default());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn cache_can_be_disabled_via_overrides() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        cache_key_prefix: Some("geo:".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.key_prefix, "geo:");
}

#[test]
fn store_overrides_apply_to_admin_commands() {
    let mut raw = RawSettings::default();
    raw.store.host = Some("redis.internal".to_string());

    let overrides = StoreOverrides {
        backend: Some("memory".to_string()),
        port: Some(6380),
        password: Some("hunter2".to_string()),
        db: Some(3),
        ..Default::default()
    };

    raw.apply_store_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.store.backend, StoreBackend::Memory);
    assert_eq!(settings.store.host, "redis.internal");
    assert_eq!(settings.store.port, 6380);
    assert_eq!(settings.store.password.as_deref(), Some("hunter2"));
    assert_eq!(settings.store.db, 3);
}

#[test]
fn blank_password_means_no_auth() {
    let mut raw = RawSettings::default();
    raw.store.password = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.store.password.is_none());
}

#[test]
fn store_debug_redacts_password() {
    let mut raw = RawSettings::default();
    raw.store.password = Some("hunter2".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    let rendered = format!("{:?}", settings.store);
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn ttl_overrides_merge_with_defaults() {
    let mut raw = RawSettings::default();
    raw.cache.ttl.search = Some(60);
    raw.cache.ttl.postalcode = Some(172_800);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let ttl = settings.cache.ttl;

    assert_eq!(ttl.search, 60);
    assert_eq!(ttl.postalcode, 172_800);
    assert_eq!(ttl.reverse, 7200);
    assert_eq!(ttl.autocomplete, 1800);
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.ttl.reverse = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.ttl.reverse",
            ..
        }
    ));
}

#[test]
fn empty_key_prefix_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.key_prefix = Some(String::new());

    let err = Settings::from_raw(raw).expect_err("empty prefix");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.key_prefix",
            ..
        }
    ));
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown backend");
    assert!(matches!(err, LoadError::Invalid { key: "store.backend", .. }));
}

#[test]
fn zero_ports_are_rejected() {
    let mut raw = RawSettings::default();
    raw.store.port = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.server.admin_port = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn shared_listener_address_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(5000);
    raw.server.admin_port = Some(5000);

    let err = Settings::from_raw(raw).expect_err("shared address");
    assert!(matches!(err, LoadError::Invalid { key: "server.admin_port", .. }));
}

#[test]
fn negative_db_is_rejected() {
    let mut raw = RawSettings::default();
    raw.store.db = Some(-1);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn backend_parsing_is_case_insensitive() {
    assert_eq!("Redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
    assert_eq!(" memory ".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
    assert!("disk".parse::<StoreBackend>().is_err());
}

#[test]
#[serial]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["geocache"]);
    let command = args.resolved_command().expect("default command");
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
#[serial]
fn env_fallbacks_apply_without_subcommand() {
    let vars = [
        ("CACHE_ENABLED", "false"),
        ("REDIS_HOST", "redis.example"),
        ("REDIS_PORT", "6390"),
        ("REDIS_PASSWORD", "s3cret"),
        ("PORT", "4100"),
    ];

    let (bare, explicit) = with_env(&vars, || {
        (
            load(&CliArgs::parse_from(["geocache"])),
            load(&CliArgs::parse_from(["geocache", "serve"])),
        )
    });

    for settings in [bare.expect("bare invocation"), explicit.expect("serve")] {
        assert!(!settings.cache.enabled);
        assert_eq!(settings.store.host, "redis.example");
        assert_eq!(settings.store.port, 6390);
        assert_eq!(settings.store.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.server.public_addr.port(), 4100);
    }
}

#[test]
#[serial]
fn env_fallbacks_apply_to_admin_commands() {
    let settings = with_env(&[("REDIS_HOST", "redis.example")], || {
        load(&CliArgs::parse_from(["geocache", "stats"]))
    })
    .expect("stats settings");

    assert_eq!(settings.store.host, "redis.example");
}

#[test]
#[serial]
fn cli_flags_beat_env_fallbacks() {
    let settings = with_env(&[("CACHE_ENABLED", "false")], || {
        load(&CliArgs::parse_from(["geocache", "serve", "--cache-enabled", "true"]))
    })
    .expect("serve settings");

    assert!(settings.cache.enabled);
}

#[test]
#[serial]
fn invalid_env_fallback_is_reported() {
    let err = with_env(&[("REDIS_PORT", "not-a-port")], || {
        CliArgs::parse_from(["geocache"]).resolved_command()
    })
    .expect_err("invalid port");

    assert!(matches!(err, LoadError::Invalid { key: "environment", .. }));
}

#[test]
#[serial]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "geocache",
        "serve",
        "--server-admin-port",
        "9001",
        "--cache-enabled",
        "false",
        "--store-backend",
        "memory",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.admin_port, Some(9001));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(serve.overrides.store.backend.as_deref(), Some("memory"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial]
fn parse_clear_arguments() {
    let args = CliArgs::parse_from(["geocache", "clear", "--pattern", "search:*"]);

    match args.command.expect("clear command") {
        Command::Clear(clear) => assert_eq!(clear.pattern, "search:*"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial]
fn clear_pattern_defaults_to_everything() {
    let args = CliArgs::parse_from(["geocache", "clear"]);

    match args.command.expect("clear command") {
        Command::Clear(clear) => assert_eq!(clear.pattern, "*"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial]
fn parse_stats_arguments() {
    let args = CliArgs::parse_from(["geocache", "stats", "--store-db", "2"]);

    match args.command.expect("stats command") {
        Command::Stats(stats) => assert_eq!(stats.store.db, Some(2)),
        other => panic!("unexpected command: {other:?}"),
    }
}
