use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod policy;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

// Makes core state types easily accessible to the main application entry
// point and the integration tests.
pub use config::AppConfig;
pub use error::ApiError;
pub use mailer::{HttpRelayMailer, MailerState, MockMailer};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Auto-generates the OpenAPI documentation (Swagger JSON) for the
/// application by aggregating every `#[utoipa::path]` handler and
/// `ToSchema` model. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signup, handlers::issue_token,
        handlers::list_users, handlers::create_user, handlers::get_user_profile,
        handlers::patch_user, handlers::delete_user,
        handlers::get_me, handlers::patch_me,
        handlers::list_categories, handlers::create_category, handlers::delete_category,
        handlers::list_genres, handlers::create_genre, handlers::delete_genre,
        handlers::list_titles, handlers::create_title, handlers::get_title_details,
        handlers::patch_title, handlers::delete_title,
        handlers::list_reviews, handlers::add_review, handlers::get_review_details,
        handlers::patch_review, handlers::delete_review,
        handlers::list_comments, handlers::add_comment, handlers::get_comment_details,
        handlers::patch_comment, handlers::delete_comment,
    ),
    components(
        schemas(
            models::User, models::Role, models::UserPayload, models::UserUpdate,
            models::SignupRequest, models::TokenRequest, models::TokenResponse,
            models::Category, models::Genre, models::Title, models::TitlePayload,
            models::TitleUpdate, models::Review, models::ReviewPayload,
            models::ReviewUpdate, models::Comment, models::CommentPayload,
            models::CommentUpdate,
        )
    ),
    tags(
        (name = "review-portal", description = "Content review platform API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, thread-safe container holding all application services and
/// configuration, shared across every request.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: abstracts data access behind the trait object.
    pub repo: RepositoryState,
    /// Mailer Layer: abstracts confirmation-code delivery.
    pub mailer: MailerState,
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Allow handlers and extractors to pull individual components out of the
// shared AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the authenticated router. Extracting
/// `AuthUser` runs the full token validation and user re-fetch; a failure
/// rejects with 401 before any handler executes. Handlers still receive
/// their own `Actor` for the object-level policy checks.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware,
/// and registers the application state. All API endpoints live under the
/// `/api/v1` prefix; the Swagger UI and its JSON sit at the root.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for request correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let api_router = Router::new()
        // Public routes: no middleware applied; credentials are resolved
        // opportunistically by the Actor extractor.
        .merge(public::public_routes())
        // Authenticated routes: protected by the auth_middleware layer.
        .merge(authenticated::authenticated_routes().route_layer(
            middleware::from_fn_with_state(state.clone(), auth_middleware),
        ))
        // Admin routes: the admin capability check runs inside each handler
        // after the request resolves to an Actor.
        .merge(admin::admin_routes());

    let base_router = Router::new()
        // Documentation: serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_router)
        .with_state(state);

    // Observability and correlation layers, applied outermost.
    base_router
        .layer(
            ServiceBuilder::new()
                // Request ID generation: a unique UUID for every request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // Request tracing: wraps the request/response lifecycle in a
                // span carrying the generated request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // Request ID propagation back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Customizes the span created per request so every log line for a single
/// request is correlated by the `x-request-id` value.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
