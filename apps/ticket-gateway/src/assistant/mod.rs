//! Automated replies to customers on tickets no staff member has picked up.

pub mod completions;
pub mod throttle;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::content::extract_text;
use crate::models::ticket::TicketSummary;

pub use completions::ChatCompletionsGenerator;
pub use throttle::{AssistantThrottle, ReplyCounter};

/// Produces the assistant's plain-text reply to a customer prompt.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, ticket_id: &str, prompt: &str) -> Result<String, ApiError>;
}

/// Opening prompt for a ticket the customer has just opened chat on.
pub fn ticket_prompt(summary: &TicketSummary) -> String {
    let description = extract_text(&summary.description);
    [
        Some(summary.title.as_str()),
        Some(description.as_str()),
        summary.error_message.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}
