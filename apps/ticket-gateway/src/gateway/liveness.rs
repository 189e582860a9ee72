//! Application-level heartbeat probing.
//!
//! Every `interval` the monitor sends a `heartbeat` event to the connection
//! and waits up to `timeout` for a `heartbeat_ack`. A missed ack marks the
//! connection dead and force-closes it with [`CLOSE_HEARTBEAT_TIMEOUT`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::events::ServerEvent;
use super::session::Connection;
use crate::config::HeartbeatConfig;

/// Close code sent when a connection misses its heartbeat window.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4009;

struct ConnectionState {
    alive: AtomicBool,
    last_heartbeat_at: Mutex<Instant>,
    ack: Notify,
}

struct Monitored {
    state: Arc<ConnectionState>,
    probe: JoinHandle<()>,
}

/// Tracks liveness for every open connection, keyed by `client_id`.
pub struct LivenessMonitor {
    connections: DashMap<String, Monitored>,
    config: HeartbeatConfig,
}

impl LivenessMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    /// Begin probing `conn`. Replaces any earlier probe for the same id.
    pub fn start(&self, conn: Arc<Connection>) {
        let state = Arc::new(ConnectionState {
            alive: AtomicBool::new(true),
            last_heartbeat_at: Mutex::new(Instant::now()),
            ack: Notify::new(),
        });
        let client_id = conn.client_id.clone();
        let probe = tokio::spawn(probe_loop(conn, Arc::clone(&state), self.config));

        if let Some(previous) = self.connections.insert(client_id, Monitored { state, probe }) {
            previous.probe.abort();
        }
    }

    /// Record a `heartbeat_ack`, cancelling the pending timeout.
    /// Returns `false` if the connection is unknown or already dead.
    pub fn acknowledge(&self, client_id: &str) -> bool {
        let Some(entry) = self.connections.get(client_id) else {
            return false;
        };
        if !entry.state.alive.load(Ordering::Acquire) {
            return false;
        }
        *entry.state.last_heartbeat_at.lock() = Instant::now();
        entry.state.ack.notify_waiters();
        true
    }

    /// Unknown connections are never alive.
    pub fn is_alive(&self, client_id: &str) -> bool {
        self.connections
            .get(client_id)
            .is_some_and(|entry| entry.state.alive.load(Ordering::Acquire))
    }

    pub fn last_heartbeat_at(&self, client_id: &str) -> Option<Instant> {
        self.connections
            .get(client_id)
            .map(|entry| *entry.state.last_heartbeat_at.lock())
    }

    /// Stop probing and forget the connection. Safe to call twice.
    pub fn stop(&self, client_id: &str) -> bool {
        match self.connections.remove(client_id) {
            Some((_, monitored)) => {
                monitored.probe.abort();
                true
            }
            None => false,
        }
    }

    pub fn tracked(&self) -> usize {
        self.connections.len()
    }
}

async fn probe_loop(conn: Arc<Connection>, state: Arc<ConnectionState>, config: HeartbeatConfig) {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Register for the ack before the probe goes out so a fast reply
        // cannot slip past us.
        let acked = state.ack.notified();
        tokio::pin!(acked);
        acked.as_mut().enable();

        if conn.is_closed() || conn.is_shutting_down() {
            break;
        }
        // A full queue drops the probe; the missing ack then times out.
        conn.send(ServerEvent::Heartbeat);

        tokio::select! {
            _ = &mut acked => {}
            _ = tokio::time::sleep(config.timeout) => {
                state.alive.store(false, Ordering::Release);
                tracing::info!(
                    client_id = %conn.client_id,
                    user_id = conn.user_id,
                    room_id = %conn.room_id,
                    "heartbeat timeout, closing connection"
                );
                conn.close(CLOSE_HEARTBEAT_TIMEOUT, "Heartbeat timeout");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::session::{outbound_channel, Frame};
    use crate::models::user::Role;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }

    fn connect() -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = outbound_channel();
        (Arc::new(Connection::new(1, Role::Agent, "tkt0000000001", tx)), rx)
    }

    fn frame_type(frame: &Frame) -> String {
        match frame {
            Frame::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                value["type"].as_str().unwrap().to_string()
            }
            Frame::Close { .. } => "close".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acked_connection_stays_alive() {
        let monitor = LivenessMonitor::new(config());
        let (conn, mut rx) = connect();
        let started = Instant::now();
        monitor.start(Arc::clone(&conn));

        for cycle in 1..=4u32 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame_type(&frame), "heartbeat");
            let elapsed = Instant::now() - started;
            assert!(elapsed >= Duration::from_secs(30) * cycle);
            assert!(elapsed < Duration::from_secs(30) * cycle + Duration::from_secs(1));
            assert!(monitor.acknowledge(&conn.client_id));
        }
        assert!(monitor.is_alive(&conn.client_id));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ack_closes_with_timeout_code() {
        let monitor = LivenessMonitor::new(config());
        let (conn, mut rx) = connect();
        let started = Instant::now();
        monitor.start(Arc::clone(&conn));

        assert_eq!(frame_type(&rx.recv().await.unwrap()), "heartbeat");
        let frame = rx.recv().await.unwrap();
        assert!(matches!(
            frame,
            Frame::Close { code: CLOSE_HEARTBEAT_TIMEOUT, reason: "Heartbeat timeout" }
        ));
        let elapsed = Instant::now() - started;
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
        assert!(!monitor.is_alive(&conn.client_id));
        assert!(!monitor.acknowledge(&conn.client_id), "dead connections stay dead");
    }

    #[tokio::test(start_paused = true)]
    async fn ack_updates_last_heartbeat() {
        let monitor = LivenessMonitor::new(config());
        let (conn, mut rx) = connect();
        monitor.start(Arc::clone(&conn));
        let initial = monitor.last_heartbeat_at(&conn.client_id).unwrap();

        rx.recv().await.unwrap();
        monitor.acknowledge(&conn.client_id);
        assert!(monitor.last_heartbeat_at(&conn.client_id).unwrap() > initial);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_probing() {
        let monitor = LivenessMonitor::new(config());
        let (conn, mut rx) = connect();
        monitor.start(Arc::clone(&conn));
        assert_eq!(monitor.tracked(), 1);

        assert!(monitor.stop(&conn.client_id));
        assert!(!monitor.stop(&conn.client_id));
        assert!(!monitor.is_alive(&conn.client_id));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err(), "no probes after stop");
    }

    #[test]
    fn unknown_connection_is_not_alive() {
        let monitor = LivenessMonitor::new(config());
        assert!(!monitor.is_alive("conn_missing"));
        assert!(!monitor.acknowledge("conn_missing"));
    }
}
