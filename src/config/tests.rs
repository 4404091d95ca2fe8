use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.identity.security_mode = Some("strict".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        identity_security_mode: Some("reduced".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.identity.security_mode, SecurityMode::Reduced);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.database.url.is_none());
    assert_eq!(settings.cache.shared_backend, SharedBackendKind::Memory);
    assert_eq!(settings.cache.fallback_capacity, DEFAULT_FALLBACK_CAPACITY);
    assert_eq!(settings.identity.cookie.name, DEFAULT_COOKIE_NAME);
    assert_eq!(settings.identity.cookie.path, "/");
    assert!(settings.fingerprint.site_secret.is_none());
    assert_eq!(settings.fingerprint.bucket_seconds.get(), 60);
    assert_eq!(settings.rate_limit.report_max_hits.get(), DEFAULT_REPORT_MAX_HITS);
}

#[test]
fn blank_database_url_means_no_database() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.shared_backend = Some("redis".to_string());
    let err = Settings::from_raw(raw).expect_err("unknown backend");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.shared_backend",
            ..
        }
    ));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.rate_limit.report_bucket_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "rate_limit.report_bucket_seconds",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.fallback_capacity = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cookie_paths_must_be_absolute() {
    let mut raw = RawSettings::default();
    raw.identity.alt_cookie_path = Some("mods".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "identity.alt_cookie_path",
            ..
        })
    ));
}

#[test]
fn site_secret_is_redacted_in_debug_output() {
    let mut raw = RawSettings::default();
    raw.fingerprint.site_secret = Some("hunter2".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    let rendered = format!("{settings:?}");
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
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
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["modreel"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "modreel",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--cache-shared-backend",
        "none",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.cache_shared_backend.as_deref(), Some("none"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from(["modreel", "migrate", "--database-url", "postgres://example"]);

    match args.command.expect("migrate command") {
        Command::Migrate(database) => {
            assert_eq!(database.database_url.as_deref(), Some("postgres://example"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn layers_resolve_cli_over_env_over_file() {
    let path = std::env::temp_dir().join(format!("modreel-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        "[server]\nport = 4000\nhost = \"0.0.0.0\"\n[rate_limit]\nreport_max_hits = 2\n",
    )
    .expect("write config file");

    let env: config::Map<String, String> = [
        ("MODREEL__SERVER__PORT", "5000"),
        ("MODREEL__RATE_LIMIT__REPORT_MAX_HITS", "9"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let environment = Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .source(Some(env));

    let args = CliArgs::parse_from([
        "modreel",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "serve",
        "--server-port",
        "6000",
    ]);
    let settings = load_with_environment(&args, environment);
    std::fs::remove_file(&path).ok();
    let settings = settings.expect("valid settings");

    assert_eq!(settings.server.addr.port(), 6000);
    assert_eq!(settings.server.addr.ip().to_string(), "0.0.0.0");
    assert_eq!(settings.rate_limit.report_max_hits.get(), 9);
}
