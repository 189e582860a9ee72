//! HTTP companions to the chat socket: handshake tokens and presence.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::ApiErrorBody;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/token", get(issue_token))
        .route("/ws/online-clients", get(online_clients))
}

// ---------------------------------------------------------------------------
// GET /ws/token
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    /// Seconds until the token stops being accepted.
    pub expires_in: u64,
}

#[utoipa::path(
    get,
    path = "/ws/token",
    tag = "Chat",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Handshake token issued", body = TokenResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiErrorBody),
    ),
)]
pub async fn issue_token(State(state): State<AppState>, user: AuthUser) -> Json<TokenResponse> {
    let token = state.tokens.issue(user.user_id, user.role);
    Json(TokenResponse {
        token,
        expires_in: state.tokens.ttl().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// GET /ws/online-clients
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomPresence {
    pub room_id: String,
    pub clients: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineClientsResponse {
    pub online_clients: Vec<RoomPresence>,
}

#[utoipa::path(
    get,
    path = "/ws/online-clients",
    tag = "Chat",
    responses(
        (status = 200, description = "Connections per active ticket room", body = OnlineClientsResponse),
    ),
)]
pub async fn online_clients(State(state): State<AppState>) -> Json<OnlineClientsResponse> {
    let mut online_clients: Vec<RoomPresence> = state
        .rooms
        .snapshot()
        .into_iter()
        .map(|(room_id, clients)| RoomPresence { room_id, clients })
        .collect();
    online_clients.sort_by(|a, b| a.room_id.cmp(&b.room_id));
    Json(OnlineClientsResponse { online_clients })
}
