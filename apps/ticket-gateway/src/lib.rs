pub mod assistant;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use assistant::{AssistantThrottle, ReplyGenerator};
use auth::tokens::WsTokenStore;
use config::Config;
use gateway::fanout::Broadcaster;
use gateway::liveness::LivenessMonitor;
use gateway::registry::RoomRegistry;
use store::TicketStore;
use tokio::task::JoinHandle;

/// How often expired handshake tokens and reply counts are purged.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<WsTokenStore>,
    pub rooms: Arc<RoomRegistry>,
    pub broadcast: Broadcaster,
    pub liveness: Arc<LivenessMonitor>,
    pub store: Arc<dyn TicketStore>,
    pub assistant: Arc<AssistantThrottle>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn TicketStore>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcast = Broadcaster::new(Arc::clone(&rooms));
        let assistant = Arc::new(AssistantThrottle::new(
            Arc::clone(&store),
            generator,
            broadcast.clone(),
            &config.assistant,
        ));

        Self {
            tokens: Arc::new(WsTokenStore::new(config.ws_token_ttl)),
            liveness: Arc::new(LivenessMonitor::new(config.heartbeat)),
            rooms,
            broadcast,
            store,
            assistant,
            config: Arc::new(config),
        }
    }

    /// Periodically purge expired handshake tokens and reply counts.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tokens = Arc::clone(&self.tokens);
        let assistant = Arc::clone(&self.assistant);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let expired_tokens = tokens.sweep_expired();
                let expired_counts = assistant.counter().sweep_expired();
                if expired_tokens + expired_counts > 0 {
                    tracing::debug!(expired_tokens, expired_counts, "swept expired entries");
                }
            }
        })
    }
}
