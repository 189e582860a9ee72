use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 secret shared with the upstream auth service.
    pub jwt_secret: String,
    /// Base URL of the ticket persistence service.
    pub ticket_service_url: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How long a handshake token stays valid.
    pub ws_token_ttl: Duration,
    /// When false, customers may join tickets they are not a member of.
    pub enforce_ticket_membership: bool,
    pub heartbeat: HeartbeatConfig,
    pub assistant: AssistantConfig,
}

/// Liveness probing cadence for every connection.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Time between two heartbeat frames.
    pub interval: Duration,
    /// How long a connection has to acknowledge a heartbeat.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Replies are generated while the sent count is `<= max_replies`.
    pub max_replies: u64,
    /// Cadence of the assistant's typing indicator during generation.
    pub typing_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let defaults = HeartbeatConfig::default();
        Self {
            jwt_secret: required_var("AUTH_JWT_SECRET"),
            ticket_service_url: required_var("TICKET_SERVICE_URL"),
            port: parsed_var("PORT").unwrap_or(4010),
            ws_token_ttl: Duration::from_secs(parsed_var("WS_TOKEN_TTL_SECS").unwrap_or(300)),
            enforce_ticket_membership: parsed_var("ENFORCE_TICKET_MEMBERSHIP").unwrap_or(true),
            heartbeat: HeartbeatConfig {
                interval: parsed_var("HEARTBEAT_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.interval),
                timeout: parsed_var("HEARTBEAT_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.timeout),
            },
            assistant: AssistantConfig {
                api_url: required_var("ASSISTANT_API_URL"),
                api_key: std::env::var("ASSISTANT_API_KEY").ok().filter(|s| !s.is_empty()),
                model: std::env::var("ASSISTANT_MODEL")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                max_replies: parsed_var("ASSISTANT_MAX_REPLIES").unwrap_or(4),
                typing_interval: Duration::from_millis(
                    parsed_var("ASSISTANT_TYPING_INTERVAL_MS").unwrap_or(2000),
                ),
            },
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
