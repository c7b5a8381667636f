//! Stream state snapshots and change notification
//!
//! Consumers never touch the transport; they observe a per-stream
//! `StreamSnapshot` that is re-published on every state transition.

use crate::probe::PathKind;
use crate::quality::QualitySample;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the per-stream change channel. A consumer that lags this
/// far behind re-reads the current snapshot and resubscribes.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake or transport establishment in progress
    Connecting,
    /// Live media is flowing over the WebRTC transport
    Connected,
    /// The transport dropped and did not recover within the grace window
    Disconnected,
    /// Reconnect attempts are exhausted; a forced reconnect can revive it
    Failed,
    /// Deliberate downgrade to the HTTP-streaming fallback; not an error
    Fallback,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Read-only view of a stream connection
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    /// Stream identifier
    pub id: String,
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Path class the stream is using (or would use)
    pub path: PathKind,
    /// Resolved WHEP endpoint, once a path has been picked
    pub primary_url: Option<String>,
    /// Resolved HTTP-streaming playlist for the same stream
    pub fallback_url: Option<String>,
    /// Latest quality sample while connected
    pub quality: Option<QualitySample>,
    /// Reconnect attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// Whether an inbound media track has arrived on the transport
    pub has_media: bool,
}

impl StreamSnapshot {
    pub(crate) fn initial(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: ConnectionState::Connecting,
            path: PathKind::Unknown,
            primary_url: None,
            fallback_url: None,
            quality: None,
            reconnect_attempts: 0,
            has_media: false,
        }
    }
}

/// Holds the current snapshot and fans out updates to subscribers
pub(crate) struct StateBroadcaster {
    current: parking_lot::RwLock<StreamSnapshot>,
    tx: broadcast::Sender<StreamSnapshot>,
}

impl StateBroadcaster {
    pub(crate) fn new(initial: StreamSnapshot) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            current: parking_lot::RwLock::new(initial),
            tx,
        }
    }

    /// Current snapshot, readable without awaiting
    pub(crate) fn current(&self) -> StreamSnapshot {
        self.current.read().clone()
    }

    /// Subscribe to subsequent snapshot updates
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StreamSnapshot> {
        self.tx.subscribe()
    }

    /// Mutate the snapshot and publish the result to all subscribers
    pub(crate) fn update<F>(&self, mutate: F) -> StreamSnapshot
    where
        F: FnOnce(&mut StreamSnapshot),
    {
        let snapshot = {
            let mut guard = self.current.write();
            let before = guard.state;
            mutate(&mut guard);
            if guard.state != before {
                debug!("stream {} state: {} -> {}", guard.id, before, guard.state);
            }
            guard.clone()
        };
        // No receivers is fine; updates are not an error path
        let _ = self.tx.send(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_publishes_to_subscribers() {
        let b = StateBroadcaster::new(StreamSnapshot::initial("cam0"));
        let mut rx = b.subscribe();

        b.update(|s| s.state = ConnectionState::Connected);

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.state, ConnectionState::Connected);
        assert_eq!(b.current().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transitions_arrive_in_order() {
        let b = StateBroadcaster::new(StreamSnapshot::initial("cam0"));
        let mut rx = b.subscribe();

        b.update(|s| s.state = ConnectionState::Connected);
        b.update(|s| s.state = ConnectionState::Disconnected);
        b.update(|s| s.state = ConnectionState::Connecting);

        assert_eq!(rx.recv().await.unwrap().state, ConnectionState::Connected);
        assert_eq!(rx.recv().await.unwrap().state, ConnectionState::Disconnected);
        assert_eq!(rx.recv().await.unwrap().state, ConnectionState::Connecting);
    }

    #[test]
    fn test_update_without_subscribers_is_fine() {
        let b = StateBroadcaster::new(StreamSnapshot::initial("cam0"));
        let snap = b.update(|s| s.reconnect_attempts = 3);
        assert_eq!(snap.reconnect_attempts, 3);
    }
}
