#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::Value;

use ticket_gateway::assistant::ReplyGenerator;
use ticket_gateway::auth::middleware::AuthClaims;
use ticket_gateway::config::{AssistantConfig, Config, HeartbeatConfig};
use ticket_gateway::error::ApiError;
use ticket_gateway::models::content::plain_text_to_document;
use ticket_gateway::models::ticket::TicketSummary;
use ticket_gateway::models::user::{Role, ASSISTANT_USER_ID};
use ticket_gateway::store::{MemoryTicketStore, TicketStore};
use ticket_gateway::AppState;

pub const JWT_SECRET: &str = "test-jwt-secret";

/// A ticket whose assistant budget is already spent, so no automated
/// replies interleave with the frames a test is looking at.
pub const QUIET_TICKET: &str = "quiet-ticket1";
/// A ticket the assistant has never answered.
pub const FRESH_TICKET: &str = "fresh-ticket1";

pub const CUSTOMER_ID: i64 = 100;
pub const AGENT_ID: i64 = 200;
pub const TECHNICIAN_ID: i64 = 300;
pub const OUTSIDER_ID: i64 = 999;

/// Generator that answers from a script, then falls back to a fixed reply.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn push_reply(&self, reply: &str) {
        self.script.lock().push_back(Ok(reply.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.script.lock().push_back(Err(message.to_string()));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn generate_reply(&self, _ticket_id: &str, prompt: &str) -> Result<String, ApiError> {
        self.prompts.lock().push(prompt.to_string());
        tokio::time::sleep(self.delay).await;
        match self.script.lock().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ApiError::upstream(message)),
            None => Ok("How can I help?".to_string()),
        }
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryTicketStore>,
    pub generator: Arc<ScriptedGenerator>,
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: JWT_SECRET.to_string(),
        ticket_service_url: "http://tickets.invalid".to_string(),
        port: 0,
        ws_token_ttl: Duration::from_secs(300),
        enforce_ticket_membership: true,
        heartbeat: HeartbeatConfig::default(),
        assistant: AssistantConfig {
            api_url: "http://assistant.invalid/v1/chat/completions".to_string(),
            api_key: None,
            model: "test-model".to_string(),
            max_replies: 4,
            typing_interval: Duration::from_millis(50),
        },
    }
}

/// Build a test AppState over an in-memory ticket store.
pub async fn test_state_with(config: Config) -> TestContext {
    let store = Arc::new(MemoryTicketStore::new());
    seed_ticket(&store, QUIET_TICKET, "Quiet ticket");
    seed_ticket(&store, FRESH_TICKET, "Printer is on fire");

    let max_replies = config.assistant.max_replies;
    for _ in 0..=max_replies {
        store
            .save_message(
                QUIET_TICKET,
                ASSISTANT_USER_ID,
                &plain_text_to_document("earlier reply"),
                false,
            )
            .await
            .expect("seed assistant reply");
    }

    let generator = Arc::new(ScriptedGenerator::new(Duration::from_millis(120)));
    let state = AppState::new(config, store.clone(), generator.clone());
    TestContext {
        state,
        store,
        generator,
    }
}

pub async fn test_state() -> TestContext {
    test_state_with(test_config()).await
}

fn seed_ticket(store: &MemoryTicketStore, ticket_id: &str, title: &str) {
    store.add_ticket(
        ticket_id,
        TicketSummary {
            title: title.to_string(),
            description: plain_text_to_document("It started after the update"),
            error_message: Some("E-1234".to_string()),
        },
        &[CUSTOMER_ID],
    );
}

/// Build the full application router wired to the test state.
pub async fn test_app() -> (Router, TestContext) {
    let ctx = test_state().await;
    let app = ticket_gateway::routes::router().with_state(ctx.state.clone());
    (app, ctx)
}

/// Mint an upstream bearer JWT.
pub fn mint_jwt(user_id: i64, role: Role) -> String {
    mint_jwt_with_exp(user_id, role, chrono::Utc::now().timestamp() + 300)
}

pub fn mint_expired_jwt(user_id: i64, role: Role) -> String {
    mint_jwt_with_exp(user_id, role, chrono::Utc::now().timestamp() - 600)
}

fn mint_jwt_with_exp(user_id: i64, role: Role, exp: i64) -> String {
    let claims = AuthClaims {
        sub: user_id.to_string(),
        role,
        exp,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("mint test JWT")
}

/// Parse a JSON text body.
pub fn json(text: &str) -> Value {
    serde_json::from_str(text).expect("valid JSON")
}
