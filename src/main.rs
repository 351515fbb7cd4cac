//! Rentwise Server - booking lifecycle and escrow settlement
//!
//! REST API and background jobs for peer-to-peer equipment rentals.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rentwise_server::{
    api,
    config::AppConfig,
    repository::Repository,
    services::{
        availability::PgAvailability,
        change_feed::{ChangeSource, NullChangeSource},
        clock::SystemClock,
        notifications::TracingNotifier,
        pg_listener::PgChangeSource,
        processor::StripeProcessor,
        Collaborators, Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("rentwise_server={},tower_http=debug", config.logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    config.validate().context("Invalid configuration")?;
    tracing::info!("Starting Rentwise Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    if config.processor.secret_key.is_empty() {
        tracing::warn!("No payment processor key configured, processor calls will be rejected");
    }

    let change_source: Arc<dyn ChangeSource> = if config.realtime.enabled {
        Arc::new(PgChangeSource::new(pool.clone()))
    } else {
        tracing::info!("Database change stream disabled, feed carries local updates only");
        Arc::new(NullChangeSource)
    };

    let collaborators = Collaborators {
        processor: Arc::new(StripeProcessor::new(&config.processor)?),
        availability: Arc::new(PgAvailability::new(pool.clone())),
        notifier: Arc::new(TracingNotifier),
        clock: Arc::new(SystemClock),
        change_source,
    };

    let repository = Repository::postgres(pool);
    let services = Services::new(repository, collaborators, &config);

    if config.booking.sweep_interval_secs > 0 {
        services
            .sweeper
            .clone()
            .spawn(Duration::from_secs(config.booking.sweep_interval_secs));
        tracing::info!(
            interval_secs = config.booking.sweep_interval_secs,
            "Lifecycle sweeper started"
        );
    }

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api::router(state))
        .merge(api::openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
