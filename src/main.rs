use std::net::SocketAddr;
use std::sync::Arc;
use zrp_backend::middleware::rate_limit;
use zrp_backend::store::Store;
use zrp_backend::{app, config, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config::init();
    let config = Arc::new(config::Config::from_env().expect("failed to load configuration"));

    let store = Store::connect(&config)
        .await
        .expect("failed to open database");
    store.migrate().await.expect("failed to run migrations");

    let state = AppState::build(config.clone(), store);
    state
        .auth
        .ensure_admin()
        .await
        .expect("failed to bootstrap admin account");

    let scheduler = state.scheduler().start();

    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        rate_limit::cleanup_task(limiter).await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    scheduler.shutdown().await;
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
