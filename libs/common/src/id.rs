use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = desk_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A single gateway WebSocket connection.
    pub const CONNECTION: &str = "conn";
    /// A handshake token minted for the chat WebSocket.
    pub const WS_TOKEN: &str = "wst";
}
