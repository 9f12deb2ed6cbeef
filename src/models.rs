use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;

// --- Identity ---

/// Role
///
/// Closed enumeration of user roles. The superuser flag is deliberately NOT a
/// role value; it lives on the user record and is checked orthogonally
/// wherever admin capability is required.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

/// User
///
/// Canonical identity record from the `users` table. The internal id and the
/// superuser flag never appear in API payloads; the API addresses users by
/// username, matching the route layout.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    #[serde(skip)]
    #[ts(skip)]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    // Orthogonal capability flag, provisioned out-of-band. Not serialized so
    // no API payload can ever set or reveal it.
    #[serde(skip)]
    #[ts(skip)]
    pub is_superuser: bool,
}

impl User {
    // Derived predicates over the role field. Never stored separately, so a
    // role change atomically changes all three.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_moder(&self) -> bool {
        self.role == Role::Moderator
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

// --- Catalog ---

/// Category
///
/// A catalogue grouping, addressed by its URL-safe slug. Doubles as the
/// create payload: the API shape is exactly (name, slug).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Category {
    pub name: String,
    pub slug: String,
}

/// Genre
///
/// Same shape and addressing rules as Category, related to titles
/// many-to-many instead of one-to-many.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Genre {
    pub name: String,
    pub slug: String,
}

/// Title
///
/// A catalogued work. Assembled by the repository from the title row, the
/// genre links, and the rating aggregate; this struct is the API shape, not a
/// table row.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Title {
    pub id: Uuid,
    pub name: String,
    pub year: i32,
    pub description: String,
    /// Arithmetic mean of review scores. Absent (null) while the title has no
    /// reviews; computed by the repository aggregate, never stored.
    pub rating: Option<f64>,
    pub genre: Vec<Genre>,
    pub category: Option<Category>,
}

// --- Feedback ---

/// Review
///
/// One user's rating of one title. At most one review per (title, author)
/// pair, enforced by the storage layer's unique constraint. `author` is the
/// username, resolved by a join; the raw author id is kept for the
/// object-level policy check but never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Review {
    pub id: i64,
    pub text: String,
    pub author: String,
    pub score: i32,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
    #[serde(skip)]
    #[ts(skip)]
    pub author_id: Uuid,
}

/// Comment
///
/// Free-text reply under a review. Same author resolution and policy fields
/// as Review.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Comment {
    pub id: i64,
    pub text: String,
    pub author: String,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
    #[serde(skip)]
    #[ts(skip)]
    pub author_id: Uuid,
}

// --- Request Payloads (Input Schemas) ---

/// SignupRequest
///
/// Input for POST /auth/signup. Creates (or reuses) the user record and
/// triggers the out-of-band confirmation code dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

/// TokenRequest
///
/// Input for POST /auth/token: the username plus the confirmation code that
/// was mailed out at signup.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenRequest {
    pub username: String,
    pub confirmation_code: String,
}

/// TokenResponse
///
/// The minted bearer access token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

/// UserPayload
///
/// Input for the admin user-creation endpoint. Role defaults to `user` when
/// omitted.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserPayload {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
}

/// UserUpdate
///
/// Partial update payload for PATCH /users/{username} and PATCH /users/me.
/// Only provided fields change. For self-service updates by non-admins the
/// handler discards `role` and preserves the caller's prior role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// TitlePayload
///
/// Input for creating a title. Genre and category are referenced by slug;
/// unknown slugs are a validation error, not a silent drop.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TitlePayload {
    pub name: String,
    pub year: i32,
    pub description: String,
    pub genre: Vec<String>,
    pub category: Option<String>,
}

/// TitleUpdate
///
/// Partial update for PATCH /titles/{id}. An omitted `genre` leaves the
/// existing links untouched; a provided list replaces them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TitleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// ReviewPayload
///
/// Input for posting a review. The author comes from the authenticated
/// actor, never from the payload.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ReviewPayload {
    pub text: String,
    pub score: i32,
}

/// ReviewUpdate
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ReviewUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
}

/// CommentPayload
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CommentPayload {
    pub text: String,
}

/// CommentUpdate
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CommentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// --- Field Validators ---

/// The sentinel username reserved for the self-service endpoint path.
pub const RESERVED_USERNAME: &str = "me";

/// Rejects the reserved sentinel username. Checked at submission time; the
/// storage layer repeats it as a CHECK constraint.
pub fn validate_username(value: &str) -> Result<(), ApiError> {
    if value == RESERVED_USERNAME {
        return Err(ApiError::Validation(format!(
            "username \"{RESERVED_USERNAME}\" is reserved"
        )));
    }
    if value.is_empty() {
        return Err(ApiError::Validation("username must not be empty".to_string()));
    }
    Ok(())
}

/// Review scores are integers in [0, 10]; both boundaries are valid.
pub fn validate_score(value: i32) -> Result<(), ApiError> {
    if !(0..=10).contains(&value) {
        return Err(ApiError::Validation(format!(
            "score must be between 0 and 10, got {value}"
        )));
    }
    Ok(())
}

/// Titles cannot be dated in the future.
pub fn validate_year(value: i32) -> Result<(), ApiError> {
    let current = Utc::now().year();
    if value > current {
        return Err(ApiError::Validation(format!(
            "year {value} is in the future"
        )));
    }
    Ok(())
}

/// Slugs are URL path segments: lowercase ASCII alphanumerics, `-` and `_`.
pub fn validate_slug(value: &str) -> Result<(), ApiError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !ok {
        return Err(ApiError::Validation(format!("invalid slug: {value:?}")));
    }
    Ok(())
}
