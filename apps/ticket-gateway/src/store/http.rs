use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::TicketStore;
use crate::error::ApiError;
use crate::models::ticket::{
    ReadReceipt, SavedMessage, TicketMember, TicketSummary, WithdrawnMessage,
};

/// [`TicketStore`] backed by the ticket service's internal REST API.
#[derive(Clone)]
pub struct HttpTicketStore {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

impl HttpTicketStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode a successful body; a 4xx answer is the service saying "no".
async fn optional_json<T: DeserializeOwned>(resp: Response) -> Result<Option<T>, ApiError> {
    let status = resp.status();
    if status.is_client_error() {
        tracing::debug!(%status, url = %resp.url(), "ticket service declined request");
        return Ok(None);
    }
    let body = required_json(resp).await?;
    Ok(Some(body))
}

async fn required_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        tracing::error!(%status, url = %resp.url(), "ticket service error");
        return Err(ApiError::upstream("Ticket service returned an error"));
    }
    resp.json().await.map_err(|e| {
        tracing::error!(?e, "ticket service response parse failed");
        ApiError::upstream("Failed to parse ticket service response")
    })
}

#[async_trait]
impl TicketStore for HttpTicketStore {
    async fn save_message(
        &self,
        ticket_id: &str,
        sender_id: i64,
        content: &Value,
        is_internal: bool,
    ) -> Result<Option<SavedMessage>, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/tickets/{ticket_id}/messages")))
            .json(&json!({
                "senderId": sender_id,
                "content": content,
                "isInternal": is_internal,
            }))
            .send()
            .await?;
        optional_json(resp).await
    }

    async fn save_read_status(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<ReadReceipt>, ApiError> {
        let resp = self
            .http
            .put(self.url(&format!("/messages/{message_id}/reads/{user_id}")))
            .send()
            .await?;
        optional_json(resp).await
    }

    async fn withdraw_message(
        &self,
        message_id: i64,
        user_id: i64,
    ) -> Result<Option<WithdrawnMessage>, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/messages/{message_id}/withdraw")))
            .json(&json!({ "userId": user_id }))
            .send()
            .await?;
        optional_json(resp).await
    }

    async fn get_ticket_members(&self, ticket_id: &str) -> Result<Vec<TicketMember>, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/tickets/{ticket_id}/members")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        required_json(resp).await
    }

    async fn get_ticket_summary(
        &self,
        ticket_id: &str,
    ) -> Result<Option<TicketSummary>, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/tickets/{ticket_id}/summary")))
            .send()
            .await?;
        optional_json(resp).await
    }

    async fn count_messages_from(&self, ticket_id: &str, sender_id: i64) -> Result<u64, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/tickets/{ticket_id}/messages/count")))
            .query(&[("senderId", sender_id)])
            .send()
            .await?;
        let body: CountResponse = required_json(resp).await?;
        Ok(body.count)
    }

    async fn mark_first_reply(&self, ticket_id: &str, operator_id: i64) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/tickets/{ticket_id}/first-reply")))
            .json(&json!({ "operatorId": operator_id }))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            Err(ApiError::not_found("Ticket not found"))
        } else {
            tracing::error!(%status, %ticket_id, "first-reply transition failed");
            Err(ApiError::upstream("Ticket service rejected the update"))
        }
    }
}
