//! Per-ticket budget and scheduling for assistant replies.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{ticket_prompt, ReplyGenerator};
use crate::config::AssistantConfig;
use crate::error::ApiError;
use crate::gateway::events::{Envelope, ServerEvent};
use crate::gateway::fanout::Broadcaster;
use crate::gateway::registry::Visibility;
use crate::gateway::session::Connection;
use crate::models::content::plain_text_to_document;
use crate::models::user::ASSISTANT_USER_ID;
use crate::store::TicketStore;

/// How long a hydrated reply count is trusted before re-reading the store.
pub const COUNT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const GENERATION_FAILED: &str = "Some error occurred in AI response.";

struct CachedCount {
    count: u64,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedCount>>>;

/// Cached count of assistant messages per ticket.
///
/// Each ticket has its own async lock so a cache miss hydrates from the store
/// exactly once and increments never race with hydration.
pub struct ReplyCounter {
    entries: DashMap<String, Slot>,
    ttl: Duration,
}

impl ReplyCounter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn slot(&self, ticket_id: &str) -> Slot {
        Arc::clone(self.entries.entry(ticket_id.to_string()).or_default().value())
    }

    /// Replies sent so far, hydrating from the store on a miss.
    pub async fn current(&self, ticket_id: &str, store: &dyn TicketStore) -> Result<u64, ApiError> {
        let slot = self.slot(ticket_id);
        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref().filter(|c| Instant::now() <= c.expires_at) {
            return Ok(entry.count);
        }
        let count = store.count_messages_from(ticket_id, ASSISTANT_USER_ID).await?;
        *cached = Some(CachedCount {
            count,
            expires_at: Instant::now() + self.ttl,
        });
        Ok(count)
    }

    /// Account for a reply that has just been persisted.
    pub async fn record_reply(&self, ticket_id: &str, store: &dyn TicketStore) -> Result<u64, ApiError> {
        let slot = self.slot(ticket_id);
        let mut cached = slot.lock().await;
        match cached.as_mut().filter(|c| Instant::now() <= c.expires_at) {
            Some(entry) => {
                entry.count += 1;
                Ok(entry.count)
            }
            None => {
                // The store already includes the new reply.
                let count = store.count_messages_from(ticket_id, ASSISTANT_USER_ID).await?;
                *cached = Some(CachedCount {
                    count,
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(count)
            }
        }
    }

    pub fn invalidate(&self, ticket_id: &str) {
        self.entries.remove(ticket_id);
    }

    /// Drop expired counts. Slots currently in use are left alone.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot.try_lock() {
            Ok(cached) => cached.as_ref().is_some_and(|c| now <= c.expires_at),
            Err(_) => true,
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clears a ticket's in-flight marker when the generation task ends,
/// including when it is aborted.
struct InFlight {
    tickets: Arc<DashSet<String>>,
    ticket_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.tickets.remove(&self.ticket_id);
    }
}

/// Decides when the assistant answers and runs the generation.
pub struct AssistantThrottle {
    store: Arc<dyn TicketStore>,
    generator: Arc<dyn ReplyGenerator>,
    broadcast: Broadcaster,
    counter: ReplyCounter,
    in_flight: Arc<DashSet<String>>,
    max_replies: u64,
    typing_interval: Duration,
}

impl AssistantThrottle {
    pub fn new(
        store: Arc<dyn TicketStore>,
        generator: Arc<dyn ReplyGenerator>,
        broadcast: Broadcaster,
        config: &AssistantConfig,
    ) -> Self {
        Self {
            store,
            generator,
            broadcast,
            counter: ReplyCounter::new(COUNT_CACHE_TTL),
            in_flight: Arc::new(DashSet::new()),
            max_replies: config.max_replies,
            typing_interval: config.typing_interval,
        }
    }

    pub fn counter(&self) -> &ReplyCounter {
        &self.counter
    }

    /// Whether a reply is currently being generated for the ticket.
    pub fn is_generating(&self, ticket_id: &str) -> bool {
        self.in_flight.contains(ticket_id)
    }

    pub async fn replies_sent(&self, ticket_id: &str) -> Result<u64, ApiError> {
        self.counter.current(ticket_id, self.store.as_ref()).await
    }

    /// Seed the conversation from the ticket itself when a customer opens a
    /// chat the assistant has not answered yet.
    pub async fn greet(self: &Arc<Self>, conn: Arc<Connection>) -> Option<JoinHandle<()>> {
        match self.replies_sent(&conn.room_id).await {
            Ok(0) => {}
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, ticket_id = %conn.room_id, "could not read assistant reply count");
                return None;
            }
        }

        let summary = match self.store.get_ticket_summary(&conn.room_id).await {
            Ok(Some(summary)) => summary,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, ticket_id = %conn.room_id, "could not load ticket summary");
                return None;
            }
        };
        let prompt = ticket_prompt(&summary);
        if prompt.is_empty() {
            return None;
        }
        self.maybe_reply(conn, prompt).await
    }

    /// Start a reply to `prompt` if the ticket still has budget and no other
    /// reply is being generated for it.
    pub async fn maybe_reply(
        self: &Arc<Self>,
        conn: Arc<Connection>,
        prompt: String,
    ) -> Option<JoinHandle<()>> {
        let ticket_id = conn.room_id.clone();
        if !self.in_flight.insert(ticket_id.clone()) {
            tracing::debug!(%ticket_id, "assistant reply already in progress");
            return None;
        }
        let guard = InFlight {
            tickets: Arc::clone(&self.in_flight),
            ticket_id: ticket_id.clone(),
        };

        let sent = match self.replies_sent(&ticket_id).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!(error = %e, %ticket_id, "could not read assistant reply count");
                return None;
            }
        };
        if sent > self.max_replies {
            tracing::debug!(%ticket_id, sent, "assistant reply budget exhausted");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = guard;
            this.reply(&conn, &ticket_id, &prompt).await;
        }))
    }

    async fn reply(&self, conn: &Connection, ticket_id: &str, prompt: &str) {
        let generated = {
            let generation = self.generator.generate_reply(ticket_id, prompt);
            tokio::pin!(generation);
            let mut typing = tokio::time::interval(self.typing_interval);
            loop {
                tokio::select! {
                    result = &mut generation => break result,
                    _ = typing.tick() => {
                        self.broadcast.send(
                            ticket_id,
                            ServerEvent::UserTyping { user_id: ASSISTANT_USER_ID },
                            &[],
                        );
                    }
                }
            }
        };

        let text = match generated {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, %ticket_id, "assistant generation failed");
                conn.send_error(GENERATION_FAILED);
                return;
            }
        };

        let content = plain_text_to_document(&text);
        let saved = match self
            .store
            .save_message(ticket_id, ASSISTANT_USER_ID, &content, false)
            .await
        {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                tracing::warn!(%ticket_id, "ticket service rejected assistant reply");
                conn.send_error(GENERATION_FAILED);
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, %ticket_id, "failed to persist assistant reply");
                conn.send_error(GENERATION_FAILED);
                return;
            }
        };

        if let Err(e) = self.counter.record_reply(ticket_id, self.store.as_ref()).await {
            tracing::warn!(error = %e, %ticket_id, "could not update assistant reply count");
            self.counter.invalidate(ticket_id);
        }

        let envelope = Envelope::new(
            ticket_id,
            ServerEvent::NewMessage {
                message_id: saved.id,
                user_id: ASSISTANT_USER_ID,
                content,
                is_internal: false,
            },
        )
        .at(saved.created_at);
        let delivered = self.broadcast.send_envelope(&envelope, &[], Visibility::Everyone);
        tracing::info!(%ticket_id, message_id = saved.id, delivered, "assistant replied");
    }
}
