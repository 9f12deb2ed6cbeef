use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Admin Router Module
///
/// Routes where every method requires admin capability (the admin role or
/// the superuser flag). No middleware layer sits here: each handler runs the
/// `IsAdmin` or `AdminOrReadOnly` policy itself, so an anonymous caller gets
/// 401 and an authenticated non-admin 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /users
        // Account listing (searchable) and direct account creation.
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        // GET/PATCH/DELETE /users/{username}
        // Single-account management. The static /users/me path is registered
        // separately and takes precedence over this parameterized route.
        .route(
            "/users/{username}",
            get(handlers::get_user_profile)
                .patch(handlers::patch_user)
                .delete(handlers::delete_user),
        )
        // Catalogue taxonomy writes. Reads of the same paths live in the
        // public router.
        .route("/categories", post(handlers::create_category))
        .route("/categories/{slug}", delete(handlers::delete_category))
        .route("/genres", post(handlers::create_genre))
        .route("/genres/{slug}", delete(handlers::delete_genre))
        // Title writes.
        .route("/titles", post(handlers::create_title))
        .route(
            "/titles/{title_id}",
            axum::routing::patch(handlers::patch_title).delete(handlers::delete_title),
        )
}
