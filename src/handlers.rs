use crate::{
    AppState,
    auth::{self, AuthUser},
    error::ApiError,
    mailer,
    models::{
        Category, Comment, CommentPayload, CommentUpdate, Genre, Review, ReviewPayload,
        ReviewUpdate, SignupRequest, Title, TitlePayload, TitleUpdate, TokenRequest,
        TokenResponse, User, UserPayload, UserUpdate, validate_score, validate_slug,
        validate_username, validate_year,
    },
    policy::{Access, Actor, AdminOrReadOnly, AuthorOrReadOnly, IsAdmin, check, check_object},
    repository::TitleQuery,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// Page size applied when the client sends no limit.
const DEFAULT_LIMIT: i64 = 50;

// --- Filter Structs ---

/// Pagination
///
/// Limit/offset paging shared by every list endpoint, plus the optional
/// free-text `search` filter. Bound from the query string by Axum's Query
/// extractor.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Optional substring filter; each endpoint defines which fields it
    /// matches.
    pub search: Option<String>,
}

impl Pagination {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).max(0)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// TitleFilter
///
/// The accepted query parameters for the title listing endpoint
/// (GET /titles). All filters combine with AND.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct TitleFilter {
    /// Exact category slug.
    pub category: Option<String>,
    /// Exact genre slug; matches titles linked to that genre.
    pub genre: Option<String>,
    /// Exact release year.
    pub year: Option<i32>,
    /// Case-insensitive name prefix.
    pub name: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn validate_email(value: &str) -> Result<(), ApiError> {
    let well_formed = value
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !well_formed {
        return Err(ApiError::Validation(format!("invalid email: {value:?}")));
    }
    Ok(())
}

// --- Auth Handlers ---

/// signup
///
/// [Public Route] Registers a user (or re-requests a code for an existing
/// one) and emails the confirmation code. Repeating the exact same
/// username/email pair is idempotent and resends the code; reusing either
/// field with a different partner is a conflict.
///
/// Mail delivery is fire-and-forget: a relay failure is logged, never
/// surfaced, so the response does not leak whether the mailbox exists.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Confirmation code sent", body = SignupRequest),
        (status = 400, description = "Invalid username or email"),
        (status = 409, description = "Username or email already taken")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupRequest>, ApiError> {
    validate_username(&payload.username)?;
    validate_email(&payload.email)?;

    let user = match state.repo.get_user_by_username(&payload.username).await? {
        Some(existing) if existing.email == payload.email => existing,
        Some(_) => {
            return Err(ApiError::Conflict(
                "username already registered with a different email".to_string(),
            ));
        }
        None => {
            state
                .repo
                .create_user(UserPayload {
                    username: payload.username.clone(),
                    email: payload.email.clone(),
                    first_name: None,
                    last_name: None,
                    bio: None,
                    role: None,
                })
                .await?
        }
    };

    let code = auth::confirmation_code(&user.username);
    mailer::dispatch(
        state.mailer.clone(),
        "Your confirmation code".to_string(),
        format!("confirmation_code: {code}"),
        state.config.admin_email.clone(),
        user.email.clone(),
    );

    Ok(Json(payload))
}

/// issue_token
///
/// [Public Route] Exchanges a username plus confirmation code for a signed
/// bearer token. The expected code is re-derived from the username, so the
/// exchange is repeatable. An unknown username is 404, a wrong code 400.
#[utoipa::path(
    post,
    path = "/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Wrong confirmation code"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .repo
        .get_user_by_username(&payload.username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if payload.confirmation_code != auth::confirmation_code(&user.username) {
        return Err(ApiError::BadConfirmationCode);
    }

    let token = auth::mint_token(user.id, &state.config.jwt_secret)?;
    Ok(Json(TokenResponse { token }))
}

// --- User Handlers (admin) ---

/// list_users
///
/// [Admin Route] Lists accounts ordered by username. `search` matches
/// username, first name, last name, and role.
#[utoipa::path(
    get,
    path = "/users",
    params(Pagination),
    responses((status = 200, description = "Users", body = [User]))
)]
pub async fn list_users(
    actor: Actor,
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<User>>, ApiError> {
    check(&IsAdmin, &actor, Access::Read)?;
    let users = state
        .repo
        .list_users(page.search.clone(), page.limit(), page.offset())
        .await?;
    Ok(Json(users))
}

/// create_user
///
/// [Admin Route] Creates an account directly, optionally with an elevated
/// role. The new user still authenticates through the confirmation-code
/// flow like everyone else.
#[utoipa::path(
    post,
    path = "/users",
    request_body = UserPayload,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username or email already taken")
    )
)]
pub async fn create_user(
    actor: Actor,
    State(state): State<AppState>,
    Json(payload): Json<UserPayload>,
) -> Result<impl IntoResponse, ApiError> {
    check(&IsAdmin, &actor, Access::Write)?;
    validate_username(&payload.username)?;
    validate_email(&payload.email)?;
    let user = state.repo.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// get_user_profile
///
/// [Admin Route] Fetches a single account by username.
#[utoipa::path(
    get,
    path = "/users/{username}",
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user_profile(
    actor: Actor,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>, ApiError> {
    check(&IsAdmin, &actor, Access::Read)?;
    let user = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

/// patch_user
///
/// [Admin Route] Partial update of any account, role changes included.
#[utoipa::path(
    patch,
    path = "/users/{username}",
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn patch_user(
    actor: Actor,
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<User>, ApiError> {
    check(&IsAdmin, &actor, Access::Write)?;
    if let Some(email) = &update.email {
        validate_email(email)?;
    }
    let user = state
        .repo
        .update_user(&username, update)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

/// delete_user
///
/// [Admin Route] Removes an account and everything it authored.
#[utoipa::path(
    delete,
    path = "/users/{username}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    actor: Actor,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    check(&IsAdmin, &actor, Access::Write)?;
    if state.repo.delete_user(&username).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("user"))
    }
}

// --- Self-service Handlers ---

/// get_me
///
/// [Authenticated Route] Returns the requesting user's own profile.
#[utoipa::path(
    get,
    path = "/users/me",
    responses((status = 200, description = "Own profile", body = User))
)]
pub async fn get_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .repo
        .get_user(auth_user.id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

/// patch_me
///
/// [Authenticated Route] Partial update of the requester's own profile.
/// The `role` field is silently dropped unless the requester holds admin
/// capability, so ordinary users cannot promote themselves.
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UserUpdate,
    responses((status = 200, description = "Own profile updated", body = User))
)]
pub async fn patch_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(mut update): Json<UserUpdate>,
) -> Result<Json<User>, ApiError> {
    let actor = Actor::User(auth_user.clone());
    if !actor.is_admin() {
        update.role = None;
    }
    if let Some(email) = &update.email {
        validate_email(email)?;
    }
    let user = state
        .repo
        .update_user(&auth_user.username, update)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}

// --- Category Handlers ---

/// list_categories
///
/// [Public Route] Lists categories ordered by name. `search` matches the
/// name as a substring.
#[utoipa::path(
    get,
    path = "/categories",
    params(Pagination),
    responses((status = 200, description = "Categories", body = [Category]))
)]
pub async fn list_categories(
    actor: Actor,
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Category>>, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Read)?;
    let categories = state
        .repo
        .list_categories(page.search.clone(), page.limit(), page.offset())
        .await?;
    Ok(Json(categories))
}

/// create_category
///
/// [Admin Route] Creates a category; name and slug must both be unique.
#[utoipa::path(
    post,
    path = "/categories",
    request_body = Category,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 409, description = "Name or slug already exists")
    )
)]
pub async fn create_category(
    actor: Actor,
    State(state): State<AppState>,
    Json(payload): Json<Category>,
) -> Result<impl IntoResponse, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    validate_slug(&payload.slug)?;
    if payload.name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    let category = state.repo.create_category(payload).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// delete_category
///
/// [Admin Route] Deletes a category by slug. Titles in it survive with
/// their category cleared.
#[utoipa::path(
    delete,
    path = "/categories/{slug}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_category(
    actor: Actor,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    if state.repo.delete_category(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("category"))
    }
}

// --- Genre Handlers ---

/// list_genres
///
/// [Public Route] Lists genres ordered by name; `search` matches the name.
#[utoipa::path(
    get,
    path = "/genres",
    params(Pagination),
    responses((status = 200, description = "Genres", body = [Genre]))
)]
pub async fn list_genres(
    actor: Actor,
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Genre>>, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Read)?;
    let genres = state
        .repo
        .list_genres(page.search.clone(), page.limit(), page.offset())
        .await?;
    Ok(Json(genres))
}

/// create_genre
///
/// [Admin Route] Creates a genre; name and slug must both be unique.
#[utoipa::path(
    post,
    path = "/genres",
    request_body = Genre,
    responses(
        (status = 201, description = "Genre created", body = Genre),
        (status = 409, description = "Name or slug already exists")
    )
)]
pub async fn create_genre(
    actor: Actor,
    State(state): State<AppState>,
    Json(payload): Json<Genre>,
) -> Result<impl IntoResponse, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    validate_slug(&payload.slug)?;
    if payload.name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    let genre = state.repo.create_genre(payload).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

/// delete_genre
///
/// [Admin Route] Deletes a genre by slug and unlinks it from every title.
#[utoipa::path(
    delete,
    path = "/genres/{slug}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_genre(
    actor: Actor,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    if state.repo.delete_genre(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("genre"))
    }
}

// --- Title Handlers ---

/// list_titles
///
/// [Public Route] Lists titles with the derived rating, filterable by
/// category slug, genre slug, year, and name prefix.
#[utoipa::path(
    get,
    path = "/titles",
    params(TitleFilter),
    responses((status = 200, description = "Titles", body = [Title]))
)]
pub async fn list_titles(
    actor: Actor,
    State(state): State<AppState>,
    Query(filter): Query<TitleFilter>,
) -> Result<Json<Vec<Title>>, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Read)?;
    let titles = state
        .repo
        .list_titles(TitleQuery {
            category: filter.category,
            genre: filter.genre,
            year: filter.year,
            name: filter.name,
            limit: filter.limit.unwrap_or(DEFAULT_LIMIT).max(0),
            offset: filter.offset.unwrap_or(0).max(0),
        })
        .await?;
    Ok(Json(titles))
}

/// create_title
///
/// [Admin Route] Adds a title to the catalogue. Genre and category are
/// referenced by slug and must already exist.
#[utoipa::path(
    post,
    path = "/titles",
    request_body = TitlePayload,
    responses(
        (status = 201, description = "Title created", body = Title),
        (status = 400, description = "Future year or unknown slug")
    )
)]
pub async fn create_title(
    actor: Actor,
    State(state): State<AppState>,
    Json(payload): Json<TitlePayload>,
) -> Result<impl IntoResponse, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    validate_year(payload.year)?;
    let title = state.repo.create_title(payload).await?;
    Ok((StatusCode::CREATED, Json(title)))
}

/// get_title_details
///
/// [Public Route] Retrieves one title with its rating, genres, and
/// category.
#[utoipa::path(
    get,
    path = "/titles/{title_id}",
    responses(
        (status = 200, description = "Title", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_title_details(
    actor: Actor,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Title>, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Read)?;
    let title = state
        .repo
        .get_title(id)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    Ok(Json(title))
}

/// patch_title
///
/// [Admin Route] Partial update; a provided genre list replaces the
/// existing links wholesale.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}",
    request_body = TitleUpdate,
    responses(
        (status = 200, description = "Title updated", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn patch_title(
    actor: Actor,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<TitleUpdate>,
) -> Result<Json<Title>, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    if let Some(year) = update.year {
        validate_year(year)?;
    }
    let title = state
        .repo
        .update_title(id, update)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    Ok(Json(title))
}

/// delete_title
///
/// [Admin Route] Removes a title together with its reviews and their
/// comments.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_title(
    actor: Actor,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    check(&AdminOrReadOnly, &actor, Access::Write)?;
    if state.repo.delete_title(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("title"))
    }
}

// --- Review Handlers ---

/// Loads a review after confirming the title exists, for the nested
/// /titles/{title_id}/reviews/{review_id} paths.
async fn load_review(
    state: &AppState,
    title_id: Uuid,
    review_id: i64,
) -> Result<Review, ApiError> {
    state
        .repo
        .get_title(title_id)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))
}

/// list_reviews
///
/// [Public Route] Lists a title's reviews, oldest first.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews",
    params(Pagination),
    responses(
        (status = 200, description = "Reviews", body = [Review]),
        (status = 404, description = "Unknown title")
    )
)]
pub async fn list_reviews(
    actor: Actor,
    State(state): State<AppState>,
    Path(title_id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Review>>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Read)?;
    state
        .repo
        .get_title(title_id)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    let reviews = state
        .repo
        .list_reviews(title_id, page.limit(), page.offset())
        .await?;
    Ok(Json(reviews))
}

/// add_review
///
/// [Authenticated Route] Posts a review on a title. Each user gets one
/// review per title; a second attempt is a conflict, scores outside
/// [0, 10] a validation error.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews",
    request_body = ReviewPayload,
    responses(
        (status = 201, description = "Review added", body = Review),
        (status = 404, description = "Unknown title"),
        (status = 409, description = "Already reviewed by this user")
    )
)]
pub async fn add_review(
    actor: Actor,
    State(state): State<AppState>,
    Path(title_id): Path<Uuid>,
    Json(payload): Json<ReviewPayload>,
) -> Result<impl IntoResponse, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    validate_score(payload.score)?;
    let author = actor.user().ok_or(ApiError::Unauthorized)?;
    state
        .repo
        .get_title(title_id)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    let review = state
        .repo
        .create_review(title_id, author.id, payload.text, payload.score)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// get_review_details
///
/// [Public Route] Retrieves one review of a title.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}",
    responses(
        (status = 200, description = "Review", body = Review),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_review_details(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, i64)>,
) -> Result<Json<Review>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Read)?;
    let review = load_review(&state, title_id, review_id).await?;
    Ok(Json(review))
}

/// patch_review
///
/// [Authenticated Route] Edits a review. Permitted to its author, and to
/// moderators and admins.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}",
    request_body = ReviewUpdate,
    responses(
        (status = 200, description = "Review updated", body = Review),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn patch_review(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, i64)>,
    Json(update): Json<ReviewUpdate>,
) -> Result<Json<Review>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    let existing = load_review(&state, title_id, review_id).await?;
    check_object(&AuthorOrReadOnly, &actor, Access::Write, existing.author_id)?;
    if let Some(score) = update.score {
        validate_score(score)?;
    }
    let review = state
        .repo
        .update_review(review_id, update)
        .await?
        .ok_or(ApiError::NotFound("review"))?;
    Ok(Json(review))
}

/// delete_review
///
/// [Authenticated Route] Deletes a review and its comments. Same
/// author-or-staff rule as editing.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_review(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, i64)>,
) -> Result<StatusCode, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    let existing = load_review(&state, title_id, review_id).await?;
    check_object(&AuthorOrReadOnly, &actor, Access::Write, existing.author_id)?;
    state.repo.delete_review(review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Comment Handlers ---

/// Loads a comment after confirming the full title/review chain, for the
/// deepest nested paths.
async fn load_comment(
    state: &AppState,
    title_id: Uuid,
    review_id: i64,
    comment_id: i64,
) -> Result<Comment, ApiError> {
    load_review(state, title_id, review_id).await?;
    state
        .repo
        .get_comment(review_id, comment_id)
        .await?
        .ok_or(ApiError::NotFound("comment"))
}

/// list_comments
///
/// [Public Route] Lists a review's comments, oldest first.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    params(Pagination),
    responses(
        (status = 200, description = "Comments", body = [Comment]),
        (status = 404, description = "Unknown title or review")
    )
)]
pub async fn list_comments(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, i64)>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Read)?;
    load_review(&state, title_id, review_id).await?;
    let comments = state
        .repo
        .list_comments(review_id, page.limit(), page.offset())
        .await?;
    Ok(Json(comments))
}

/// add_comment
///
/// [Authenticated Route] Posts a comment on a review. Unlike reviews,
/// comments are unlimited per user.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    request_body = CommentPayload,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 404, description = "Unknown title or review")
    )
)]
pub async fn add_comment(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, i64)>,
    Json(payload): Json<CommentPayload>,
) -> Result<impl IntoResponse, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    let author = actor.user().ok_or(ApiError::Unauthorized)?;
    load_review(&state, title_id, review_id).await?;
    let comment = state
        .repo
        .create_comment(review_id, author.id, payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// get_comment_details
///
/// [Public Route] Retrieves one comment of a review.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    responses(
        (status = 200, description = "Comment", body = Comment),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_comment_details(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, i64, i64)>,
) -> Result<Json<Comment>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Read)?;
    let comment = load_comment(&state, title_id, review_id, comment_id).await?;
    Ok(Json(comment))
}

/// patch_comment
///
/// [Authenticated Route] Edits a comment. Author-or-staff, like reviews.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    request_body = CommentUpdate,
    responses(
        (status = 200, description = "Comment updated", body = Comment),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn patch_comment(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, i64, i64)>,
    Json(update): Json<CommentUpdate>,
) -> Result<Json<Comment>, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    let existing = load_comment(&state, title_id, review_id, comment_id).await?;
    check_object(&AuthorOrReadOnly, &actor, Access::Write, existing.author_id)?;
    let comment = state
        .repo
        .update_comment(comment_id, update)
        .await?
        .ok_or(ApiError::NotFound("comment"))?;
    Ok(Json(comment))
}

/// delete_comment
///
/// [Authenticated Route] Deletes a comment. Author-or-staff.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_comment(
    actor: Actor,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, i64, i64)>,
) -> Result<StatusCode, ApiError> {
    check(&AuthorOrReadOnly, &actor, Access::Write)?;
    let existing = load_comment(&state, title_id, review_id, comment_id).await?;
    check_object(&AuthorOrReadOnly, &actor, Access::Write, existing.author_id)?;
    state.repo.delete_comment(comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
