use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mailer
///
/// Abstract contract for outbound mail. The only caller is the signup flow,
/// which needs exactly one operation: best-effort delivery of a confirmation
/// code. Swappable between the HTTP relay client in production and the
/// in-memory mock in tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), String>;
}

/// MailerState
///
/// The shareable handle placed in the application state.
pub type MailerState = Arc<dyn Mailer>;

/// Fire-and-forget dispatch. Delivery runs on its own task and must never
/// block or fail the request that triggered it; failures are logged and
/// swallowed.
pub fn dispatch(mailer: MailerState, subject: String, body: String, from: String, to: String) {
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&subject, &body, &from, &to).await {
            tracing::warn!("mail dispatch to {} failed: {}", to, e);
        }
    });
}

/// HttpRelayMailer
///
/// Concrete implementation posting JSON to an HTTP mail relay (a MailHog-style
/// catcher locally, a transactional mail API in production).
#[derive(Clone)]
pub struct HttpRelayMailer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelayMailer {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "from": from,
                "to": [to],
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("relay answered {}", response.status()));
        }
        Ok(())
    }
}

/// A single delivery recorded by the mock, for test assertions.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub subject: String,
    pub body: String,
    pub to: String,
}

/// MockMailer
///
/// Test double recording every delivery instead of performing one. With
/// `should_fail` set it simulates a relay outage, which the signup flow must
/// shrug off.
#[derive(Default)]
pub struct MockMailer {
    pub should_fail: bool,
    pub sent: Mutex<Vec<SentMail>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_mail(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, subject: &str, body: &str, _from: &str, to: &str) -> Result<(), String> {
        if self.should_fail {
            return Err("mock relay outage".to_string());
        }
        self.sent.lock().unwrap().push(SentMail {
            subject: subject.to_string(),
            body: body.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }
}
