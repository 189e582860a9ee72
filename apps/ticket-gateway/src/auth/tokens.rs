//! Short-lived handshake tokens for the chat WebSocket.
//!
//! Browsers cannot attach an `Authorization` header to a WebSocket upgrade, so
//! an authenticated client first trades its bearer JWT for an opaque token and
//! passes that in the handshake query string. Tokens are time-bounded, not
//! single-use: reconnecting with a still-valid token is allowed.

use std::time::Duration;

use dashmap::DashMap;
use desk_common::id::prefix;
use tokio::time::Instant;

use crate::models::user::Role;

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// Identity bound to a handshake token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenData {
    pub user_id: i64,
    pub role: Role,
}

struct TokenEntry {
    data: TokenData,
    expires_at: Instant,
}

/// Process-wide handshake token table.
///
/// Backed by `DashMap`, so issuing and validating different tokens never
/// contend on a single lock.
pub struct WsTokenStore {
    tokens: DashMap<String, TokenEntry>,
    ttl: Duration,
}

impl WsTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for an already-authenticated user.
    pub fn issue(&self, user_id: i64, role: Role) -> String {
        let token = generate_opaque_token(prefix::WS_TOKEN, 32);
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                data: TokenData { user_id, role },
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(user_id, %role, "issued ws token");
        token
    }

    /// Look a token up. Expired entries are dropped on the spot.
    pub fn validate(&self, token: &str) -> Option<TokenData> {
        let now = Instant::now();
        if self
            .tokens
            .remove_if(token, |_, entry| now > entry.expires_at)
            .is_some()
        {
            tracing::debug!("rejected expired ws token");
            return None;
        }
        self.tokens.get(token).map(|entry| entry.data)
    }

    /// Remove every expired token. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| now <= entry.expires_at);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
