use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use modreel::{
    application::error::AppError,
    application::rate_limit::RatePolicy,
    application::repos::FeaturedStore,
    cache::{CacheConfig, build_cache},
    config,
    identity::{FingerprintEngine, IdentityResolver, SaltKey},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        memory::MemoryStore,
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::unexpected("migrate requires a database url"))?;
    connect_database(url, &settings).await?;
    info!(target = "modreel::migrate", "migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let state = build_state(&settings, store)?;
    serve_http(&settings, state).await
}

async fn connect_database(
    url: &str,
    settings: &config::Settings,
) -> Result<PostgresRepositories, AppError> {
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(PostgresRepositories::new(pool))
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn FeaturedStore>, AppError> {
    match settings.database.url.as_deref() {
        Some(url) => Ok(Arc::new(connect_database(url, settings).await?)),
        None => {
            warn!(
                target = "modreel::startup",
                "database.url is not set; videos are kept in memory and lost on exit"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_state(
    settings: &config::Settings,
    store: Arc<dyn FeaturedStore>,
) -> Result<AppState, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let cache = Arc::new(build_cache(&cache_config));

    let secret = match settings.fingerprint.site_secret.clone() {
        Some(secret) => secret,
        None => {
            warn!(
                target = "modreel::startup",
                "fingerprint.site_secret is not set; using a per-process secret, \
                 so rate limits reset on restart"
            );
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    };
    let key = SaltKey::new(secret.as_bytes())?;

    let resolver = Arc::new(IdentityResolver::new(
        settings.identity.security_mode,
        settings.identity.cookie.clone(),
    ));
    let fingerprints = Arc::new(FingerprintEngine::new(
        key,
        i64::from(settings.fingerprint.bucket_seconds.get()),
        resolver,
    ));

    let report_policy = RatePolicy {
        max_hits: settings.rate_limit.report_max_hits.get(),
        bucket_seconds: i64::from(settings.rate_limit.report_bucket_seconds.get()),
    };

    info!(
        target = "modreel::startup",
        shared_cache = cache.has_shared_backend(),
        security_mode = ?settings.identity.security_mode,
        "services configured"
    );

    Ok(AppState::new(
        store,
        cache,
        fingerprints,
        report_policy,
        cache_config.entity_ttl(),
    ))
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(target = "modreel::startup", addr = %settings.server.addr, "listening");

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stopping_tx.send(true);
    });

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        if stopping_rx.wait_for(|stopping| *stopping).await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server.into_future() => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "modreel::shutdown",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "modreel::shutdown", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "modreel::shutdown", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "modreel::shutdown", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(target = "modreel::shutdown", "shutdown signal received");
}
