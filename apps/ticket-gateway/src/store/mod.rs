//! The ticket persistence collaborator.
//!
//! Messages, read receipts and ticket state live in a separate service; the
//! gateway only ever talks to it through [`TicketStore`]. `Ok(None)` means the
//! service declined the operation (unknown message, not the author, ...), while
//! `Err` means the call itself failed.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::ticket::{
    ReadReceipt, SavedMessage, TicketMember, TicketSummary, WithdrawnMessage,
};

pub use http::HttpTicketStore;
pub use memory::MemoryTicketStore;

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn save_message(
        &self,
        ticket_id: &str,
        sender_id: i64,
        content: &Value,
        is_internal: bool,
    ) -> Result<Option<SavedMessage>, ApiError>;

    async fn save_read_status(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<ReadReceipt>, ApiError>;

    async fn withdraw_message(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<WithdrawnMessage>, ApiError>;

    async fn get_ticket_members(&self, ticket_id: &str) -> Result<Vec<TicketMember>, ApiError>;

    async fn get_ticket_summary(&self, ticket_id: &str)
        -> Result<Option<TicketSummary>, ApiError>;

    /// Number of messages `sender_id` has posted on the ticket.
    async fn count_messages_from(&self, ticket_id: &str, sender_id: i64) -> Result<u64, ApiError>;

    /// Move the ticket to in-progress and record the first staff reply.
    /// Both writes commit together or not at all.
    async fn mark_first_reply(&self, ticket_id: &str, operator_id: i64) -> Result<(), ApiError>;
}
