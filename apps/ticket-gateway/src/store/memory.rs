use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::TicketStore;
use crate::error::ApiError;
use crate::models::ticket::{
    ReadReceipt, SavedMessage, TicketMember, TicketSummary, WithdrawnMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: &'static str,
    pub operator_id: i64,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub ticket_id: String,
    pub sender_id: i64,
    pub content: Value,
    pub is_internal: bool,
    pub withdrawn: bool,
    pub created_at: DateTime<Utc>,
}

struct TicketRecord {
    summary: TicketSummary,
    members: Vec<i64>,
    status: TicketStatus,
    history: Vec<HistoryEntry>,
}

#[derive(Default)]
struct Inner {
    tickets: HashMap<String, TicketRecord>,
    messages: Vec<StoredMessage>,
    reads: HashMap<(i64, i64), DateTime<Utc>>,
    next_message_id: i64,
}

// ---------------------------------------------------------------------------
// In-memory implementation (for local development / tests)
// ---------------------------------------------------------------------------

pub struct MemoryTicketStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_message_id: 1,
                ..Inner::default()
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Register a ticket and the user ids allowed to chat on it.
    pub fn add_ticket(&self, ticket_id: &str, summary: TicketSummary, members: &[i64]) {
        self.inner.lock().tickets.insert(
            ticket_id.to_string(),
            TicketRecord {
                summary,
                members: members.to_vec(),
                status: TicketStatus::Pending,
                history: Vec::new(),
            },
        );
    }

    /// When set, every write answers `Ok(None)` as a rejecting service would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn messages_for(&self, ticket_id: &str) -> Vec<StoredMessage> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.ticket_id == ticket_id)
            .cloned()
            .collect()
    }

    pub fn ticket_status(&self, ticket_id: &str) -> Option<TicketStatus> {
        self.inner.lock().tickets.get(ticket_id).map(|t| t.status)
    }

    pub fn history(&self, ticket_id: &str) -> Vec<HistoryEntry> {
        self.inner
            .lock()
            .tickets
            .get(ticket_id)
            .map(|t| t.history.clone())
            .unwrap_or_default()
    }

    fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn save_message(
        &self,
        ticket_id: &str,
        sender_id: i64,
        content: &Value,
        is_internal: bool,
    ) -> Result<Option<SavedMessage>, ApiError> {
        if self.writes_failing() {
            return Ok(None);
        }
        let mut inner = self.inner.lock();
        if !inner.tickets.contains_key(ticket_id) {
            return Ok(None);
        }

        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let created_at = Utc::now();
        inner.messages.push(StoredMessage {
            id,
            ticket_id: ticket_id.to_string(),
            sender_id,
            content: content.clone(),
            is_internal,
            withdrawn: false,
            created_at,
        });

        Ok(Some(SavedMessage { id, created_at }))
    }

    async fn save_read_status(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<ReadReceipt>, ApiError> {
        if self.writes_failing() {
            return Ok(None);
        }
        let mut inner = self.inner.lock();
        if !inner.messages.iter().any(|m| m.id == message_id) {
            return Ok(None);
        }
        let read_at = *inner
            .reads
            .entry((message_id, user_id))
            .or_insert_with(Utc::now);
        Ok(Some(ReadReceipt { read_at }))
    }

    async fn withdraw_message(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<WithdrawnMessage>, ApiError> {
        if self.writes_failing() {
            return Ok(None);
        }
        let mut inner = self.inner.lock();
        let Some(message) = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.sender_id == user_id && !m.withdrawn)
        else {
            return Ok(None);
        };
        message.withdrawn = true;
        Ok(Some(WithdrawnMessage {
            id: message.id,
            is_internal: message.is_internal,
        }))
    }

    async fn get_ticket_members(&self, ticket_id: &str) -> Result<Vec<TicketMember>, ApiError> {
        let inner = self.inner.lock();
        Ok(inner
            .tickets
            .get(ticket_id)
            .map(|t| t.members.iter().map(|&id| TicketMember { id }).collect())
            .unwrap_or_default())
    }

    async fn get_ticket_summary(
        &self,
        ticket_id: &str,
    ) -> Result<Option<TicketSummary>, ApiError> {
        Ok(self
            .inner
            .lock()
            .tickets
            .get(ticket_id)
            .map(|t| t.summary.clone()))
    }

    async fn count_messages_from(&self, ticket_id: &str, sender_id: i64) -> Result<u64, ApiError> {
        let inner = self.inner.lock();
        let count = inner
            .messages
            .iter()
            .filter(|m| m.ticket_id == ticket_id && m.sender_id == sender_id)
            .count();
        Ok(count as u64)
    }

    async fn mark_first_reply(&self, ticket_id: &str, operator_id: i64) -> Result<(), ApiError> {
        if self.writes_failing() {
            return Err(ApiError::upstream("Ticket service rejected the update"));
        }
        let mut inner = self.inner.lock();
        let ticket = inner
            .tickets
            .get_mut(ticket_id)
            .ok_or_else(|| ApiError::not_found("Ticket not found"))?;
        ticket.status = TicketStatus::InProgress;
        ticket.history.push(HistoryEntry {
            kind: "first_reply",
            operator_id,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TICKET: &str = "tkt0000000001";

    fn store_with_ticket() -> MemoryTicketStore {
        let store = MemoryTicketStore::new();
        store.add_ticket(
            TICKET,
            TicketSummary {
                title: "Printer on fire".to_string(),
                description: json!({ "type": "doc" }),
                error_message: None,
            },
            &[10, 20],
        );
        store
    }

    #[tokio::test]
    async fn withdraw_only_by_author_and_only_once() {
        let store = store_with_ticket();
        let saved = store
            .save_message(TICKET, 10, &json!({ "type": "doc" }), true)
            .await
            .unwrap()
            .unwrap();

        assert!(store.withdraw_message(saved.id, 20).await.unwrap().is_none());

        let withdrawn = store.withdraw_message(saved.id, 10).await.unwrap().unwrap();
        assert_eq!(withdrawn.id, saved.id);
        assert!(withdrawn.is_internal);

        assert!(store.withdraw_message(saved.id, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counts_messages_per_sender() {
        let store = store_with_ticket();
        for sender in [1, 1, 10] {
            store
                .save_message(TICKET, sender, &json!({ "type": "doc" }), false)
                .await
                .unwrap();
        }
        assert_eq!(store.count_messages_from(TICKET, 1).await.unwrap(), 2);
        assert_eq!(store.count_messages_from(TICKET, 10).await.unwrap(), 1);
        assert_eq!(store.count_messages_from("other", 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_receipt_is_stable_per_user() {
        let store = store_with_ticket();
        let saved = store
            .save_message(TICKET, 10, &json!({ "type": "doc" }), false)
            .await
            .unwrap()
            .unwrap();

        let first = store.save_read_status(saved.id, 20).await.unwrap().unwrap();
        let second = store.save_read_status(saved.id, 20).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert!(store.save_read_status(999, 20).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_reply_updates_status_and_history() {
        let store = store_with_ticket();
        store.mark_first_reply(TICKET, 20).await.unwrap();
        assert_eq!(store.ticket_status(TICKET), Some(TicketStatus::InProgress));
        assert_eq!(
            store.history(TICKET),
            vec![HistoryEntry { kind: "first_reply", operator_id: 20 }]
        );
        assert!(store.mark_first_reply("missing", 20).await.is_err());
    }

    #[tokio::test]
    async fn failing_writes_return_none() {
        let store = store_with_ticket();
        store.set_fail_writes(true);
        let saved = store
            .save_message(TICKET, 10, &json!({ "type": "doc" }), false)
            .await
            .unwrap();
        assert!(saved.is_none());
        assert!(store.messages_for(TICKET).is_empty());
    }
}
