use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Authenticated Router Module
///
/// Routes requiring a valid identity: the self-service profile endpoints and
/// all review/comment writes. The router is wrapped in the `auth_middleware`
/// layer above this module, so handlers here never see an anonymous request;
/// author-or-staff rules for editing specific objects are then enforced by
/// the object-level policy check inside each handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PATCH /users/me
        // The requester's own profile. PATCH drops any attempted role change
        // unless the requester holds admin capability.
        .route("/users/me", get(handlers::get_me).patch(handlers::patch_me))
        // POST /titles/{title_id}/reviews
        // One review per user per title; duplicates are a 409.
        .route("/titles/{title_id}/reviews", post(handlers::add_review))
        // PATCH/DELETE /titles/{title_id}/reviews/{review_id}
        // Author-or-staff only, checked against the loaded review.
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            patch(handlers::patch_review).delete(handlers::delete_review),
        )
        // POST /titles/{title_id}/reviews/{review_id}/comments
        // Comments are unlimited per user.
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            post(handlers::add_comment),
        )
        // PATCH/DELETE .../comments/{comment_id}
        // Same author-or-staff rule as reviews.
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            patch(handlers::patch_comment).delete(handlers::delete_comment),
        )
}
