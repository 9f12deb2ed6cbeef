use review_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    mailer::{HttpRelayMailer, MailerState},
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Asynchronous entry point: initializes configuration, logging, the
/// database pool with migrations, the outbound mailer, and the HTTP server.
#[tokio::main]
async fn main() {
    // Configuration loading, fail-fast on missing production secrets.
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // Log level defaults, overridable through RUST_LOG.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "review_portal=debug,tower_http=info,axum=trace".into());

    // Log format follows the environment: human-readable locally, JSON in
    // production for log aggregators.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // Database pool plus embedded migrations, so a fresh instance is
    // schema-complete before the first request.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to run database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // Outbound mail goes through the HTTP relay configured for this
    // environment; delivery failures are logged, never fatal.
    let mailer = Arc::new(HttpRelayMailer::new(&config.mail_relay_url)) as MailerState;

    let app_state = AppState {
        repo,
        mailer,
        config,
    };

    let app = create_router(app_state);

    let listener = TcpListener::bind("0.0.0.0:3000").await.unwrap();

    tracing::info!("HTTP server bound successfully.");
    tracing::info!("Listening on 0.0.0.0:3000");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:3000/swagger-ui");

    axum::serve(listener, app).await.unwrap();
}
