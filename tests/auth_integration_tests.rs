use review_portal::{
    AppConfig, AppState, MemoryRepository, MockMailer, create_router,
    auth::{confirmation_code, mint_token},
    mailer::MailerState,
    models::{Role, User, UserPayload},
    repository::{Repository, RepositoryState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestApp {
    address: String,
    repo: Arc<MemoryRepository>,
    mailer: Arc<MockMailer>,
    config: AppConfig,
}

async fn spawn_app_with_mailer(mailer: Arc<MockMailer>) -> TestApp {
    let repo = Arc::new(MemoryRepository::new());
    let config = AppConfig::default();

    let state = AppState {
        repo: repo.clone() as RepositoryState,
        mailer: mailer.clone() as MailerState,
        config: config.clone(),
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

    TestApp {
        address,
        repo,
        mailer,
        config,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_mailer(Arc::new(MockMailer::new())).await
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

/// Polls the mock mailbox, since dispatch happens on a spawned task.
async fn wait_for_mail(mailer: &MockMailer) -> Vec<review_portal::mailer::SentMail> {
    for _ in 0..50 {
        let sent = mailer.sent_mail();
        if !sent.is_empty() {
            return sent;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    Vec::new()
}

// --- Code derivation ---

#[test]
fn confirmation_code_is_urlsafe_base64_of_the_username() {
    assert_eq!(confirmation_code("alice"), "YWxpY2U");
    // No padding characters, URL-safe alphabet.
    let code = confirmation_code("user~with?odd/chars");
    assert!(!code.contains('='));
    assert!(!code.contains('+'));
    assert!(!code.contains('/'));
}

// --- Signup ---

#[tokio::test]
async fn signup_creates_the_user_and_mails_the_code() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "alice", "email": "alice@example.com"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);

    let user = app.repo.get_user_by_username("alice").await.unwrap();
    assert!(user.is_some());

    let sent = wait_for_mail(&app.mailer).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert!(sent[0].body.contains(&confirmation_code("alice")));
}

#[tokio::test]
async fn repeating_the_same_signup_resends_without_conflict() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let payload = serde_json::json!({"username": "alice", "email": "alice@example.com"});

    for _ in 0..2 {
        let response = client
            .post(format!("{}/auth/signup", app.address))
            .json(&payload)
            .send()
            .await
            .expect("req fail");
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn signup_with_a_taken_username_and_different_email_conflicts() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "alice", "email": "alice@example.com"}))
        .send()
        .await
        .expect("req fail");

    let response = client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "alice", "email": "other@example.com"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn signup_rejects_malformed_emails() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // An address needs a non-empty part on each side of the separator.
    for email in ["", "no-separator", "@example.com", "alice@", "@"] {
        let response = client
            .post(format!("{}/auth/signup", app.address))
            .json(&serde_json::json!({"username": "alice", "email": email}))
            .send()
            .await
            .expect("req fail");
        assert_eq!(response.status(), 400, "email {email:?} should be rejected");
    }
}

#[tokio::test]
async fn signup_rejects_the_reserved_username() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "me", "email": "me@example.com"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn mail_relay_failure_does_not_fail_the_signup() {
    let app = spawn_app_with_mailer(Arc::new(MockMailer::new_failing())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "alice", "email": "alice@example.com"}))
        .send()
        .await
        .expect("req fail");

    assert_eq!(response.status(), 200);
    assert!(app.repo.get_user_by_username("alice").await.unwrap().is_some());
}

// --- Token exchange ---

#[tokio::test]
async fn token_flow_issues_a_working_bearer_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/auth/signup", app.address))
        .json(&serde_json::json!({"username": "alice", "email": "alice@example.com"}))
        .send()
        .await
        .expect("req fail");

    let response = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({
            "username": "alice",
            "confirmation_code": confirmation_code("alice"),
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["token"].as_str().expect("token field");

    // The token authenticates a protected endpoint.
    let me = client
        .get(format!("{}/users/me", app.address))
        .bearer_auth(token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(me.status(), 200);
    let profile: serde_json::Value = me.json().await.unwrap();
    assert_eq!(profile["username"], "alice");
}

#[tokio::test]
async fn wrong_confirmation_code_is_a_400() {
    let app = spawn_app().await;
    create_user(&app.repo, "alice", Role::User).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({"username": "alice", "confirmation_code": "bogus"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_username_in_token_exchange_is_a_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/token", app.address))
        .json(&serde_json::json!({
            "username": "ghost",
            "confirmation_code": confirmation_code("ghost"),
        }))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 404);
}

// --- Token validation ---

#[tokio::test]
async fn tokens_for_deleted_users_stop_working() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "alice", Role::User).await;
    let token = mint_token(user.id, &app.config.jwt_secret).unwrap();
    let client = reqwest::Client::new();

    let before = client
        .get(format!("{}/users/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(before.status(), 200);

    app.repo.delete_user("alice").await.unwrap();

    let after = client
        .get(format!("{}/users/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(after.status(), 401);
}

#[tokio::test]
async fn garbage_tokens_and_missing_headers_are_401() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/users/me", app.address))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{}/users/me", app.address))
        .bearer_auth("not-a-token")
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{}/users/me", app.address))
        .header("Authorization", "Basic abc")
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn local_env_accepts_the_user_id_header_bypass() {
    let app = spawn_app().await;
    let user = create_user(&app.repo, "alice", Role::User).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/users/me", app.address))
        .header("x-user-id", user.id.to_string())
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);

    // An id that resolves to nobody still fails.
    let response = client
        .get(format!("{}/users/me", app.address))
        .header("x-user-id", Uuid::new_v4().to_string())
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 401);
}
