use review_portal::{
    AppConfig, AppState, MemoryRepository, MockMailer, create_router,
    mailer::MailerState,
    models::{Role, User, UserPayload},
    repository::{Repository, RepositoryState},
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestApp {
    address: String,
    repo: Arc<MemoryRepository>,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(MemoryRepository::new());

    let state = AppState {
        repo: repo.clone() as RepositoryState,
        mailer: Arc::new(MockMailer::new()) as MailerState,
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}/api/v1", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address, repo }
}

async fn create_user(repo: &MemoryRepository, username: &str, role: Role) -> User {
    repo.create_user(UserPayload {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        first_name: None,
        last_name: None,
        bio: None,
        role: Some(role),
    })
    .await
    .unwrap()
}

/// Request builder shorthand: all requests in this file authenticate through
/// the local x-user-id bypass rather than minting tokens.
fn as_user(req: reqwest::RequestBuilder, user: &User) -> reqwest::RequestBuilder {
    req.header("x-user-id", user.id.to_string())
}

/// Seeds a category, two genres, and one title through the admin API,
/// returning the title id.
async fn seed_catalogue(app: &TestApp, admin: &User, client: &reqwest::Client) -> Uuid {
    let resp = as_user(client.post(format!("{}/categories", app.address)), admin)
        .json(&json!({"name": "Movies", "slug": "movies"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);

    for (name, slug) in [("Drama", "drama"), ("Comedy", "comedy")] {
        let resp = as_user(client.post(format!("{}/genres", app.address)), admin)
            .json(&json!({"name": name, "slug": slug}))
            .send()
            .await
            .expect("req fail");
        assert_eq!(resp.status(), 201);
    }

    let resp = as_user(client.post(format!("{}/titles", app.address)), admin)
        .json(&json!({
            "name": "The Long Year",
            "year": 2020,
            "description": "A film.",
            "genre": ["drama"],
            "category": "movies",
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);
    let title: serde_json::Value = resp.json().await.unwrap();
    title["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

// --- Catalogue lifecycle ---

#[tokio::test]
async fn test_catalogue_lifecycle() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();
    let title_id = seed_catalogue(&app, &admin, &client).await;

    // Anonymous read sees the title with its nested objects and no rating.
    let resp = client
        .get(format!("{}/titles/{}", app.address, title_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 200);
    let title: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(title["name"], "The Long Year");
    assert_eq!(title["rating"], serde_json::Value::Null);
    assert_eq!(title["category"]["slug"], "movies");
    assert_eq!(title["genre"][0]["slug"], "drama");

    // Partial update replaces the genre list wholesale.
    let resp = as_user(
        client.patch(format!("{}/titles/{}", app.address, title_id)),
        &admin,
    )
    .json(&json!({"genre": ["comedy"], "year": 2019}))
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 200);
    let title: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(title["year"], 2019);
    assert_eq!(title["genre"].as_array().unwrap().len(), 1);
    assert_eq!(title["genre"][0]["slug"], "comedy");

    // Delete, then the read 404s.
    let resp = as_user(
        client.delete(format!("{}/titles/{}", app.address, title_id)),
        &admin,
    )
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/titles/{}", app.address, title_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_repeated_genre_slug_in_patch_is_tolerated() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();
    let title_id = seed_catalogue(&app, &admin, &client).await;

    let resp = as_user(
        client.patch(format!("{}/titles/{}", app.address, title_id)),
        &admin,
    )
    .json(&json!({"genre": ["comedy", "comedy"]}))
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 200);
    let title: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(title["genre"].as_array().unwrap().len(), 1);
    assert_eq!(title["genre"][0]["slug"], "comedy");
}

#[tokio::test]
async fn test_future_year_is_rejected() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();

    let next_year = chrono::Datelike::year(&chrono::Utc::now()) + 1;
    let resp = as_user(client.post(format!("{}/titles", app.address)), &admin)
        .json(&json!({
            "name": "From the Future",
            "year": next_year,
            "description": "",
            "genre": [],
            "category": null,
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_duplicate_slugs_conflict() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();
    seed_catalogue(&app, &admin, &client).await;

    let resp = as_user(client.post(format!("{}/categories", app.address)), &admin)
        .json(&json!({"name": "Other", "slug": "movies"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 409);
}

// --- Permissions ---

#[tokio::test]
async fn test_catalogue_writes_are_admin_only() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "plain", Role::User).await;
    let moder = create_user(&app.repo, "moder", Role::Moderator).await;
    let client = reqwest::Client::new();
    let body = json!({"name": "Books", "slug": "books"});

    // Anonymous: 401.
    let resp = client
        .post(format!("{}/categories", app.address))
        .json(&body)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 401);

    // Authenticated non-admins, moderators included: 403.
    for actor in [&user, &moder] {
        let resp = as_user(client.post(format!("{}/categories", app.address)), actor)
            .json(&body)
            .send()
            .await
            .expect("req fail");
        assert_eq!(resp.status(), 403);
    }
}

#[tokio::test]
async fn test_superuser_flag_grants_admin_capability() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "root", Role::User).await;
    app.repo.make_superuser("root");
    // Re-read so the header bypass resolves the updated record.
    let user = app.repo.get_user(user.id).await.unwrap().unwrap();
    let client = reqwest::Client::new();

    let resp = as_user(client.post(format!("{}/categories", app.address)), &user)
        .json(&json!({"name": "Books", "slug": "books"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);

    let resp = as_user(client.get(format!("{}/users", app.address)), &user)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_user_management_is_admin_only() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "plain", Role::User).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/users", app.address))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 401);

    let resp = as_user(client.get(format!("{}/users", app.address)), &user)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 403);
}

// --- User management ---

#[tokio::test]
async fn test_admin_user_crud() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();

    let resp = as_user(client.post(format!("{}/users", app.address)), &admin)
        .json(&json!({
            "username": "newbie",
            "email": "newbie@example.com",
            "role": "moderator",
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(created["role"], "moderator");

    let resp = as_user(
        client.patch(format!("{}/users/newbie", app.address)),
        &admin,
    )
    .json(&json!({"bio": "hired", "role": "admin"}))
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 200);
    let patched: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(patched["bio"], "hired");
    assert_eq!(patched["role"], "admin");

    let resp = as_user(
        client.delete(format!("{}/users/newbie", app.address)),
        &admin,
    )
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 204);

    let resp = as_user(client.get(format!("{}/users/newbie", app.address)), &admin)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_user_search_over_http() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    create_user(&app.repo, "alice", Role::User).await;
    create_user(&app.repo, "bob", Role::User).await;
    let client = reqwest::Client::new();

    let resp = as_user(
        client.get(format!("{}/users?search=ali", app.address)),
        &admin,
    )
    .send()
    .await
    .expect("req fail");
    assert_eq!(resp.status(), 200);
    let users: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "alice");
}

#[tokio::test]
async fn test_self_service_patch_preserves_role_for_non_admins() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "plain", Role::User).await;
    let client = reqwest::Client::new();

    let resp = as_user(client.patch(format!("{}/users/me", app.address)), &user)
        .json(&json!({"bio": "hello", "role": "admin"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 200);
    let profile: serde_json::Value = resp.json().await.unwrap();

    // The bio change lands, the attempted promotion does not.
    assert_eq!(profile["bio"], "hello");
    assert_eq!(profile["role"], "user");
}

// --- Reviews ---

#[tokio::test]
async fn test_review_lifecycle_and_rating() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let alice = create_user(&app.repo, "alice", Role::User).await;
    let bob = create_user(&app.repo, "bob", Role::User).await;
    let client = reqwest::Client::new();
    let title_id = seed_catalogue(&app, &admin, &client).await;
    let reviews_url = format!("{}/titles/{}/reviews", app.address, title_id);

    // Anonymous cannot post.
    let resp = client
        .post(&reviews_url)
        .json(&json!({"text": "nope", "score": 5}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 401);

    let resp = as_user(client.post(&reviews_url), &alice)
        .json(&json!({"text": "loved it", "score": 9}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);
    let review: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(review["author"], "alice");
    let review_id = review["id"].as_i64().unwrap();

    // Second review by the same author conflicts.
    let resp = as_user(client.post(&reviews_url), &alice)
        .json(&json!({"text": "again", "score": 2}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 409);

    // Out-of-range score is a validation error.
    let resp = as_user(client.post(&reviews_url), &bob)
        .json(&json!({"text": "!!", "score": 11}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 400);

    let resp = as_user(client.post(&reviews_url), &bob)
        .json(&json!({"text": "fine", "score": 6}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);

    // The title's rating is the mean of both scores.
    let resp = client
        .get(format!("{}/titles/{}", app.address, title_id))
        .send()
        .await
        .expect("req fail");
    let title: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(title["rating"].as_f64().unwrap(), 7.5);

    // Author edits their own review; a stranger cannot.
    let review_url = format!("{}/{}", reviews_url, review_id);
    let resp = as_user(client.patch(&review_url), &bob)
        .json(&json!({"score": 0}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 403);

    let resp = as_user(client.patch(&review_url), &alice)
        .json(&json!({"score": 10}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 200);
    let review: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(review["score"], 10);
}

#[tokio::test]
async fn test_moderator_can_edit_and_delete_foreign_reviews() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let alice = create_user(&app.repo, "alice", Role::User).await;
    let moder = create_user(&app.repo, "moder", Role::Moderator).await;
    let client = reqwest::Client::new();
    let title_id = seed_catalogue(&app, &admin, &client).await;

    let resp = as_user(
        client.post(format!("{}/titles/{}/reviews", app.address, title_id)),
        &alice,
    )
    .json(&json!({"text": "rude text", "score": 3}))
    .send()
    .await
    .expect("req fail");
    let review: serde_json::Value = resp.json().await.unwrap();
    let review_url = format!(
        "{}/titles/{}/reviews/{}",
        app.address,
        title_id,
        review["id"]
    );

    let resp = as_user(client.patch(&review_url), &moder)
        .json(&json!({"text": "[edited]"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 200);

    let resp = as_user(client.delete(&review_url), &moder)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 204);

    let resp = client.get(&review_url).send().await.expect("req fail");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_reviews_under_an_unknown_title_are_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/titles/{}/reviews",
            app.address,
            Uuid::new_v4()
        ))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 404);
}

// --- Comments ---

#[tokio::test]
async fn test_comment_lifecycle() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let alice = create_user(&app.repo, "alice", Role::User).await;
    let bob = create_user(&app.repo, "bob", Role::User).await;
    let client = reqwest::Client::new();
    let title_id = seed_catalogue(&app, &admin, &client).await;

    let resp = as_user(
        client.post(format!("{}/titles/{}/reviews", app.address, title_id)),
        &alice,
    )
    .json(&json!({"text": "good", "score": 8}))
    .send()
    .await
    .expect("req fail");
    let review: serde_json::Value = resp.json().await.unwrap();
    let comments_url = format!(
        "{}/titles/{}/reviews/{}/comments",
        app.address,
        title_id,
        review["id"]
    );

    // Unlike reviews, several comments from one user are fine.
    for text in ["first", "second"] {
        let resp = as_user(client.post(&comments_url), &bob)
            .json(&json!({"text": text}))
            .send()
            .await
            .expect("req fail");
        assert_eq!(resp.status(), 201);
    }

    let resp = client.get(&comments_url).send().await.expect("req fail");
    assert_eq!(resp.status(), 200);
    let comments: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["text"], "first");
    assert_eq!(comments[0]["author"], "bob");

    // Author-or-staff applies to comments too.
    let comment_url = format!("{}/{}", comments_url, comments[0]["id"]);
    let resp = as_user(client.delete(&comment_url), &alice)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 403);

    let resp = as_user(client.delete(&comment_url), &bob)
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 204);
}

// --- Filters and pagination ---

#[tokio::test]
async fn test_title_filters_over_http() {
    let app = spawn_app().await;
    let admin = create_user(&app.repo, "admin", Role::Admin).await;
    let client = reqwest::Client::new();
    seed_catalogue(&app, &admin, &client).await;

    let resp = as_user(client.post(format!("{}/titles", app.address)), &admin)
        .json(&json!({
            "name": "Another Story",
            "year": 1999,
            "description": "",
            "genre": ["comedy"],
            "category": null,
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(resp.status(), 201);

    let fetch = |query: &str| {
        let url = format!("{}/titles?{}", app.address, query);
        let client = client.clone();
        async move {
            let resp = client.get(url).send().await.expect("req fail");
            assert_eq!(resp.status(), 200);
            resp.json::<Vec<serde_json::Value>>().await.unwrap()
        }
    };

    assert_eq!(fetch("year=1999").await.len(), 1);
    assert_eq!(fetch("genre=drama").await.len(), 1);
    assert_eq!(fetch("category=movies").await.len(), 1);
    assert_eq!(fetch("name=another").await.len(), 1);
    assert_eq!(fetch("name=story").await.len(), 0);
    assert_eq!(fetch("genre=comedy&year=2020").await.len(), 0);

    // Paging: names order the listing, limit/offset slice it.
    let page = fetch("limit=1&offset=1").await;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["name"], "The Long Year");
}
