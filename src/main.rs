use axum::{routing::get, Json, Router};
use clap::Parser;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use timbre::appstore::AppStoreClient;
use timbre::config::Config;
use timbre::db::{create_pool, init_db, queries, AppState};
use timbre::jwt::TokenKeys;
use timbre::models::CreateUser;
use timbre::subscriptions;

#[derive(Parser, Debug)]
#[command(name = "timbre")]
#[command(about = "Subscription entitlement service for the Timbre mobile app")]
struct Cli {
    /// Seed the database with a dev user (dev mode only)
    #[arg(long)]
    seed: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Seeds the database with a dev user for sandbox testing. The printed app
/// account token can be fed to StoreKit test purchases so webhooks resolve
/// back to this user.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let token = uuid::Uuid::new_v4().to_string();
    let user = queries::create_user(
        &conn,
        &CreateUser {
            email: Some("dev@timbre.local".to_string()),
            is_guest: false,
            app_account_token: Some(token.clone()),
        },
    )
    .expect("Failed to create dev user");

    tracing::info!("============================================");
    tracing::info!("DEV USER CREATED");
    tracing::info!("User ID: {}", user.id);
    tracing::info!("App account token: {}", token);
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timbre=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode (expecting Sandbox receipts)");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        app_store: Arc::new(AppStoreClient::new(config.app_store.clone())),
        expected_environment: config.expected_environment.clone(),
        admin_api_key: config.admin_api_key.clone(),
        token_keys: TokenKeys::from_secret(&config.jwt_secret),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set TIMBRE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        .route("/health", get(health))
        .merge(subscriptions::router(state.clone(), config.rate_limit_rpm))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Timbre subscription service listening on {}", addr);

    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
