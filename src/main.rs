use std::{process, sync::Arc, time::Duration};

use geocache::{
    application::error::AppError,
    cache::{CacheConfig, ResponseCache},
    config::{self, ClearArgs, Settings},
    infra::{
        error::InfraError,
        http::{build_admin_router, build_api_router},
        store::build_store,
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

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

    let command = cli_args.resolved_command()?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Clear(args) => run_clear(settings, args).await,
        config::Command::Stats(_) => run_stats(settings).await,
    }
}

async fn build_cache(settings: &Settings) -> Result<ResponseCache, AppError> {
    let config = Arc::new(CacheConfig::from(&settings.cache));
    if !config.enabled {
        info!(target = "geocache::cache", "response cache disabled");
    }
    let store = build_store(&settings.store).await?;
    Ok(ResponseCache::new(config, store))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;

    let result = serve_http(&settings, cache.clone()).await;

    cache.close().await;
    info!(target = "geocache::cache", "cache store closed");
    result
}

async fn run_clear(settings: Settings, args: ClearArgs) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;
    let result = cache.delete_matching(&args.pattern).await;
    cache.close().await;

    let cleared = result?;
    println!("{}", serde_json::json!({ "success": true, "cleared": cleared }));
    Ok(())
}

async fn run_stats(settings: Settings) -> Result<(), AppError> {
    let cache = build_cache(&settings).await?;
    let result = cache.statistics().await;
    cache.close().await;

    let stats = result?;
    let rendered = serde_json::to_string_pretty(&stats)
        .map_err(|err| AppError::unexpected(format!("failed to render statistics: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn serve_http(settings: &Settings, cache: ResponseCache) -> Result<(), AppError> {
    let api_router = build_api_router(cache.clone());
    let admin_router = build_admin_router(cache);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "geocache listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let grace = settings.server.graceful_shutdown;
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, api_router.into_make_service())
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()));

    let servers = async {
        try_join!(
            async { public_server.await },
            async { admin_server.await }
        )
        .map(|_| ())
    };

    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline(shutdown_rx, grace) => {
            warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out, dropping connections");
        }
    }

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn drain_deadline(shutdown: watch::Receiver<bool>, grace: Duration) {
    wait_for(shutdown).await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
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
}
