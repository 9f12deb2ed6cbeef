use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without credentials: the signup/token flow and every
/// read of the catalogue. A request that does carry credentials still gets
/// them resolved (the `Actor` extractor), so staff see the same reads with
/// their identity attached.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/signup
        // Registers a username/email pair and emails the confirmation code.
        .route("/auth/signup", post(handlers::signup))
        // POST /auth/token
        // Exchanges username + confirmation code for a bearer token.
        .route("/auth/token", post(handlers::issue_token))
        // GET /categories, /genres
        // Catalogue taxonomy listings, name-searchable.
        .route("/categories", get(handlers::list_categories))
        .route("/genres", get(handlers::list_genres))
        // GET /titles?category=...&genre=...&year=...&name=...
        // Title listing with the aggregated rating and all filters.
        .route("/titles", get(handlers::list_titles))
        .route("/titles/{title_id}", get(handlers::get_title_details))
        // GET reviews and comments, nested under their title.
        .route("/titles/{title_id}/reviews", get(handlers::list_reviews))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(handlers::get_review_details),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(handlers::list_comments),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(handlers::get_comment_details),
        )
}
