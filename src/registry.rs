//! Keyed stream-connection registry
//!
//! A single long-lived `StreamRegistry` owns every stream connection.
//! Acquisition is reference counted: the first `acquire` for an id builds
//! the transport, further acquisitions share it, and the entry is torn
//! down exactly when the last consumer releases. Entry creation happens
//! under the registry map lock and the build itself is guarded by the
//! connection's in-flight marker, so concurrent acquisitions can never
//! produce two transports for one id.

use crate::config::MediaClientConfig;
use crate::connection::StreamConnection;
use crate::events::{ConnectionState, StreamSnapshot};
use crate::loader::{self, PreloadReport};
use crate::probe::PathProber;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use webrtc::track::track_remote::TrackRemote;

/// Registry of stream connections, keyed by stream id
pub struct StreamRegistry {
    config: Arc<MediaClientConfig>,
    prober: Arc<PathProber>,
    streams: RwLock<HashMap<String, Arc<StreamConnection>>>,
}

/// A consumer's reference to a stream connection
///
/// The handle gives read access to snapshots, state changes and the
/// derived media track. It does not release on drop; call
/// [`StreamRegistry::release`] with the same id when done, once per
/// acquisition.
pub struct StreamHandle {
    connection: Arc<StreamConnection>,
}

impl StreamHandle {
    /// Stream id this handle refers to
    pub fn id(&self) -> &str {
        self.connection.id()
    }

    /// Current state snapshot, readable without awaiting
    pub fn snapshot(&self) -> StreamSnapshot {
        self.connection.snapshot()
    }

    /// Subscribe to subsequent state changes
    pub fn changes(&self) -> broadcast::Receiver<StreamSnapshot> {
        self.connection.subscribe()
    }

    /// Inbound media track, once the transport has produced one
    pub fn media(&self) -> Option<Arc<TrackRemote>> {
        self.connection.media()
    }
}

impl StreamRegistry {
    /// Create a registry over a validated configuration
    pub fn new(config: MediaClientConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let prober = Arc::new(PathProber::new(Arc::clone(&config))?);

        Ok(Self {
            config,
            prober,
            streams: RwLock::new(HashMap::new()),
        })
    }

    /// The path prober backing this registry
    pub fn prober(&self) -> &Arc<PathProber> {
        &self.prober
    }

    /// Registry configuration
    pub fn config(&self) -> &MediaClientConfig {
        &self.config
    }

    /// Acquire a reference to a stream, building its connection on first
    /// acquisition
    ///
    /// Returns immediately with a (possibly still-connecting) handle; the
    /// handshake proceeds in the background. Acquiring a stream whose
    /// connection is `Failed` or `Disconnected` kicks a rebuild with a
    /// fresh attempt counter.
    pub async fn acquire(&self, id: &str) -> Result<StreamHandle> {
        if id.is_empty() {
            return Err(Error::InvalidConfig("stream id must be non-empty".to_string()));
        }

        let mut streams = self.streams.write().await;
        let connection = match streams.get(id) {
            Some(existing) => {
                let refs = existing.add_ref();
                debug!("stream {}: acquired (refs={})", id, refs);

                let state = existing.snapshot().state;
                if matches!(state, ConnectionState::Failed | ConnectionState::Disconnected) {
                    existing.force_reconnect();
                }
                Arc::clone(existing)
            }
            None => {
                info!("stream {}: first acquisition, building connection", id);
                let connection = StreamConnection::new(
                    id,
                    Arc::clone(&self.config),
                    Arc::clone(&self.prober),
                )?;
                connection.add_ref();
                streams.insert(id.to_string(), Arc::clone(&connection));
                connection.spawn_build();
                connection
            }
        };

        Ok(StreamHandle { connection })
    }

    /// Release one reference to a stream
    ///
    /// A release without a matching acquire is a no-op. When the count
    /// reaches zero the connection is fully torn down and removed.
    pub async fn release(&self, id: &str) {
        let connection = self.streams.read().await.get(id).cloned();
        let Some(connection) = connection else {
            debug!("stream {}: release for unknown id ignored", id);
            return;
        };

        let remaining = connection.release_ref();
        debug!("stream {}: released (refs={})", id, remaining);
        if remaining > 0 {
            return;
        }

        // Re-check under the write lock: an acquire may have raced the
        // count back up before we got here
        let removed = {
            let mut streams = self.streams.write().await;
            if connection.ref_count() == 0 {
                streams.remove(id)
            } else {
                None
            }
        };

        if let Some(connection) = removed {
            info!("stream {}: last reference released, tearing down", id);
            connection.shutdown().await;
        }
    }

    /// Reset the attempt counter and rebuild the stream's transport
    ///
    /// Valid from any state, including terminal `Failed`.
    pub async fn force_reconnect(&self, id: &str) -> Result<()> {
        let streams = self.streams.read().await;
        let connection = streams
            .get(id)
            .ok_or_else(|| Error::StreamNotFound(id.to_string()))?;
        connection.force_reconnect();
        Ok(())
    }

    /// Read-only snapshot of a stream, if registered
    pub async fn snapshot(&self, id: &str) -> Option<StreamSnapshot> {
        self.streams.read().await.get(id).map(|c| c.snapshot())
    }

    /// Best-effort warm-up of several streams
    ///
    /// On a constrained path the streams load one at a time; see
    /// [`crate::config::LoaderConfig`]. The report carries the acquired
    /// handles; the caller adopts them or releases each id.
    pub async fn preload(&self, ids: &[String]) -> PreloadReport {
        loader::run(self, &self.config.loader, ids).await
    }

    /// Number of registered streams (diagnostics and tests)
    pub async fn active_count(&self) -> usize {
        self.streams.read().await.len()
    }
}
