//! Broadcast hub: channel membership and fan-out.
//!
//! Every connection owns a bounded outbound queue drained by its socket
//! writer task. Publishing never waits on a socket: a connection whose queue
//! is full or whose writer is gone is dropped from its channel, and the
//! resulting presence change is handed back to the caller instead of an
//! error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Duration, Instant};

use crate::presence::PresenceTracker;

/// Connection identifier, assigned in connect order.
pub type ConnectionId = u64;

/// Serialized frame queued for one connection. Shared across all recipients
/// of a publish.
pub type Frame = Arc<str>;

/// A subscribed transport link.
#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<Frame>,
    last_heartbeat: Instant,
}

/// Presence count after a membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub channel: String,
    pub count: u64,
}

/// Outcome of a direct send to one connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    UnknownConnection,
    Dropped(PresenceChange),
}

/// Channel membership plus the presence tracker it drives.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    next_id: ConnectionId,
    channels: HashMap<String, BTreeMap<ConnectionId, Connection>>,
    membership: HashMap<ConnectionId, String>,
    presence: PresenceTracker,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `channel`. A connection belongs to exactly one channel.
    pub fn subscribe(
        &mut self,
        channel: &str,
        sender: mpsc::Sender<Frame>,
        now: Instant,
    ) -> (ConnectionId, PresenceChange) {
        self.next_id += 1;
        let id = self.next_id;
        self.channels.entry(channel.to_string()).or_default().insert(
            id,
            Connection {
                sender,
                last_heartbeat: now,
            },
        );
        self.membership.insert(id, channel.to_string());
        let count = self.presence.on_connect(channel);
        tracing::info!(conn_id = id, channel = %channel, count, "connection subscribed");
        (
            id,
            PresenceChange {
                channel: channel.to_string(),
                count,
            },
        )
    }

    /// Remove a connection. Returns `None` if it was already gone, so each
    /// connection produces exactly one presence disconnect.
    pub fn unsubscribe(&mut self, id: ConnectionId) -> Option<PresenceChange> {
        let channel = self.membership.remove(&id)?;
        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }
        let count = self.presence.on_disconnect(&channel);
        tracing::info!(conn_id = id, channel = %channel, count, "connection unsubscribed");
        Some(PresenceChange { channel, count })
    }

    /// Queue `frame` for every member of `channel` in membership order.
    /// Members that cannot accept it are dropped; their presence changes are
    /// returned.
    pub fn publish(&mut self, channel: &str, frame: &Frame) -> Vec<PresenceChange> {
        let mut failed = Vec::new();
        if let Some(members) = self.channels.get(channel) {
            for (id, conn) in members {
                if let Err(e) = conn.sender.try_send(frame.clone()) {
                    log_send_failure(*id, channel, &e);
                    failed.push(*id);
                }
            }
        }
        failed
            .into_iter()
            .filter_map(|id| self.unsubscribe(id))
            .collect()
    }

    /// Queue `frame` for a single connection.
    pub fn send_to(&mut self, id: ConnectionId, frame: Frame) -> Delivery {
        let Some(conn) = self.connection(id) else {
            return Delivery::UnknownConnection;
        };
        match conn.sender.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                let channel = self.membership.get(&id).cloned().unwrap_or_default();
                log_send_failure(id, &channel, &e);
                match self.unsubscribe(id) {
                    Some(change) => Delivery::Dropped(change),
                    None => Delivery::UnknownConnection,
                }
            }
        }
    }

    /// Record a liveness signal. Returns false for unknown connections.
    pub fn heartbeat(&mut self, id: ConnectionId, now: Instant) -> bool {
        let Some(channel) = self.membership.get(&id) else {
            return false;
        };
        match self
            .channels
            .get_mut(channel)
            .and_then(|members| members.get_mut(&id))
        {
            Some(conn) => {
                conn.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Drop every connection silent for longer than `timeout`.
    pub fn sweep_stale(&mut self, now: Instant, timeout: Duration) -> Vec<PresenceChange> {
        let stale: Vec<ConnectionId> = self
            .channels
            .values()
            .flat_map(|members| members.iter())
            .filter(|(_, conn)| now.saturating_duration_since(conn.last_heartbeat) > timeout)
            .map(|(id, _)| *id)
            .collect();
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "dropping stale connections");
        }
        stale
            .into_iter()
            .filter_map(|id| self.unsubscribe(id))
            .collect()
    }

    pub fn presence(&self, channel: &str) -> u64 {
        self.presence.count(channel)
    }

    pub fn channel_of(&self, id: ConnectionId) -> Option<&str> {
        self.membership.get(&id).map(String::as_str)
    }

    pub fn connection_count(&self) -> usize {
        self.membership.len()
    }

    fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        let channel = self.membership.get(&id)?;
        self.channels.get(channel)?.get(&id)
    }
}

fn log_send_failure(id: ConnectionId, channel: &str, err: &TrySendError<Frame>) {
    match err {
        TrySendError::Full(_) => {
            tracing::info!(conn_id = id, channel = %channel, "outbound queue full, dropping slow connection")
        }
        TrySendError::Closed(_) => {
            tracing::info!(conn_id = id, channel = %channel, "connection writer gone, dropping")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[tokio::test]
    async fn publish_reaches_only_channel_members_in_order() {
        let mut hub = BroadcastHub::new();
        let now = Instant::now();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_c, mut rx_c) = mpsc::channel(8);
        hub.subscribe("cards", tx_a, now);
        hub.subscribe("cards", tx_b, now);
        hub.subscribe("chat", tx_c, now);

        assert!(hub.publish("cards", &frame("one")).is_empty());
        assert!(hub.publish("cards", &frame("two")).is_empty());

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(&*rx.recv().await.unwrap(), "one");
            assert_eq!(&*rx.recv().await.unwrap(), "two");
        }
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_connection_is_dropped_without_affecting_others() {
        let mut hub = BroadcastHub::new();
        let now = Instant::now();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let (slow_id, _) = hub.subscribe("live", slow_tx, now);
        hub.subscribe("live", fast_tx, now);

        assert!(hub.publish("live", &frame("a")).is_empty());
        let dropped = hub.publish("live", &frame("b"));
        assert_eq!(
            dropped,
            vec![PresenceChange {
                channel: "live".to_string(),
                count: 1
            }]
        );
        assert!(hub.channel_of(slow_id).is_none());
        assert_eq!(&*fast_rx.recv().await.unwrap(), "a");
        assert_eq!(&*fast_rx.recv().await.unwrap(), "b");
        assert_eq!(hub.presence("live"), 1);
    }

    #[test]
    fn closed_writer_is_dropped_once() {
        let mut hub = BroadcastHub::new();
        let (tx, rx) = mpsc::channel(4);
        let (id, change) = hub.subscribe("live", tx, Instant::now());
        assert_eq!(change.count, 1);
        drop(rx);

        let dropped = hub.publish("live", &frame("x"));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].count, 0);
        // the socket task's own disconnect arrives later and must be a no-op
        assert!(hub.unsubscribe(id).is_none());
        assert_eq!(hub.presence("live"), 0);
    }

    #[test]
    fn send_to_reports_drops() {
        let mut hub = BroadcastHub::new();
        let (tx, rx) = mpsc::channel(4);
        let (id, _) = hub.subscribe("live", tx, Instant::now());
        assert_eq!(hub.send_to(id, frame("pong")), Delivery::Delivered);
        drop(rx);
        assert!(matches!(hub.send_to(id, frame("pong")), Delivery::Dropped(_)));
        assert_eq!(hub.send_to(id, frame("pong")), Delivery::UnknownConnection);
    }

    #[test]
    fn sweep_drops_silent_connections() {
        let mut hub = BroadcastHub::new();
        let start = Instant::now();
        let (tx_quiet, _rx_quiet) = mpsc::channel(4);
        let (tx_alive, _rx_alive) = mpsc::channel(4);
        let (quiet, _) = hub.subscribe("live", tx_quiet, start);
        let (alive, _) = hub.subscribe("live", tx_alive, start);

        assert!(hub.heartbeat(alive, start + Duration::from_secs(50)));
        let changes = hub.sweep_stale(start + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(changes.len(), 1);
        assert!(hub.channel_of(quiet).is_none());
        assert_eq!(hub.channel_of(alive), Some("live"));
        assert!(!hub.heartbeat(quiet, start + Duration::from_secs(62)));
        assert_eq!(hub.presence("live"), 1);
    }

    #[test]
    fn presence_equals_open_connections() {
        let mut hub = BroadcastHub::new();
        let now = Instant::now();
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = mpsc::channel(4);
            receivers.push(rx);
            ids.push(hub.subscribe("live", tx, now).0);
        }
        hub.unsubscribe(ids[1]);
        hub.unsubscribe(ids[1]);
        hub.unsubscribe(ids[3]);
        assert_eq!(hub.presence("live"), 3);
        assert_eq!(hub.connection_count(), 3);
    }
}
