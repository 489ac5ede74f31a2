//! Storefront cart service entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_cart::config::CartConfig;
use storefront_cart::server::{app, AppState};
use storefront_cart::session::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => match async_nats::connect(&url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, cart events disabled");
                None
            }
        },
        Err(_) => None,
    };

    let config = CartConfig::from_env();
    let sessions = Arc::new(SessionRegistry::new(
        db,
        nats,
        config,
        env_usize("SESSION_CAPACITY", 10_000),
        Duration::from_secs(env_usize("SESSION_IDLE_TTL_SECS", 1_800) as u64),
    ));

    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("storefront-cart listening on 0.0.0.0:{port}");
    axum::serve(listener, app(AppState { sessions })).await?;
    Ok(())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
