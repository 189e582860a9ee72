use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, FieldError};

/// Ticket ids are fixed-length nanoid-style strings.
pub const TICKET_ID_LEN: usize = 13;

/// Check the shape of a ticket id taken from the handshake query.
pub fn validate_ticket_id(ticket_id: &str) -> Result<(), ApiError> {
    let well_formed = ticket_id.len() == TICKET_ID_LEN
        && ticket_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if well_formed {
        Ok(())
    } else {
        Err(ApiError::validation(vec![FieldError {
            field: "ticketId".to_string(),
            message: format!("must be {TICKET_ID_LEN} URL-safe characters"),
        }]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMember {
    pub id: i64,
}

/// The fields the assistant's opening turn is seeded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    pub title: String,
    /// Rich-text document.
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawnMessage {
    pub id: i64,
    pub is_internal: bool,
}
