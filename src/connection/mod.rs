//! Stream connection: WHEP handshake, transport ownership, reconnect
//!
//! One `StreamConnection` exists per stream id. It exclusively owns the
//! underlying `RTCPeerConnection`; the transport is replaced wholesale on
//! every (re)connect attempt and never mutated in place. Consumers observe
//! snapshots and receive the derived media track, nothing else.
//!
//! Every transport carries an epoch number. Callbacks and timers capture
//! the epoch they were created under and become inert once the transport
//! is replaced, so a stale ICE event from a torn-down peer connection can
//! never corrupt the state machine.

pub mod backoff;
pub mod stats;
pub(crate) mod timers;

use crate::config::MediaClientConfig;
use crate::events::{ConnectionState, StateBroadcaster, StreamSnapshot};
use crate::probe::{PathKind, PathProber};
use crate::quality::{QualityAction, QualityAssessor, QualitySample};
use crate::whep::WhepClient;
use crate::{Error, Result};
use self::stats::{PeerStats, StatsSource};
use self::timers::{TimerRole, TimerSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

/// Connection record for one stream id
pub(crate) struct StreamConnection {
    id: String,
    config: Arc<MediaClientConfig>,
    prober: Arc<PathProber>,
    whep: WhepClient,
    broadcaster: StateBroadcaster,

    /// Exclusively-owned transport; replaced wholesale on every rebuild
    transport: tokio::sync::Mutex<Option<Arc<RTCPeerConnection>>>,
    /// Inbound media track, once the transport has produced one
    media: parking_lot::RwLock<Option<Arc<TrackRemote>>>,

    timers: TimerSet,
    sampler: parking_lot::Mutex<Option<JoinHandle<()>>>,
    assessor: parking_lot::Mutex<QualityAssessor>,

    ref_count: AtomicUsize,
    attempts: AtomicU32,
    epoch: AtomicU64,
    building: AtomicBool,
    closed: AtomicBool,
}

impl StreamConnection {
    pub(crate) fn new(
        id: &str,
        config: Arc<MediaClientConfig>,
        prober: Arc<PathProber>,
    ) -> Result<Arc<Self>> {
        let whep = WhepClient::new(&config.handshake)?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            config,
            prober,
            whep,
            broadcaster: StateBroadcaster::new(StreamSnapshot::initial(id)),
            transport: tokio::sync::Mutex::new(None),
            media: parking_lot::RwLock::new(None),
            timers: TimerSet::new(),
            sampler: parking_lot::Mutex::new(None),
            assessor: parking_lot::Mutex::new(QualityAssessor::new()),
            ref_count: AtomicUsize::new(0),
            attempts: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            building: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    // ------------------------------------------------------------------
    // Consumer-facing accessors
    // ------------------------------------------------------------------

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        self.broadcaster.current()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StreamSnapshot> {
        self.broadcaster.subscribe()
    }

    pub(crate) fn media(&self) -> Option<Arc<TrackRemote>> {
        self.media.read().clone()
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    pub(crate) fn add_ref(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the reference count, floored at zero
    pub(crate) fn release_ref(&self) -> usize {
        self.ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|before| before - 1)
            .unwrap_or(0)
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Build / rebuild
    // ------------------------------------------------------------------

    /// Start a build unless one is already in flight
    ///
    /// This is the in-flight-build marker that serializes logical races:
    /// two acquisitions landing before the first handshake finishes share
    /// the one transport being built.
    pub(crate) fn spawn_build(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.building.swap(true, Ordering::SeqCst) {
            debug!("stream {}: build already in flight", self.id);
            return;
        }

        let attempts = self.attempts.load(Ordering::SeqCst);
        self.broadcaster.update(|s| {
            s.state = ConnectionState::Connecting;
            s.reconnect_attempts = attempts;
        });

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let result = conn.build().await;
            conn.building.store(false, Ordering::SeqCst);
            if let Err(e) = result {
                conn.on_failure(e).await;
            }
        });
    }

    /// Tear down the current transport (if any) and negotiate a new one
    async fn build(self: &Arc<Self>) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_sampler();
        self.close_transport().await;
        *self.media.write() = None;

        // Resolve the base URL for this attempt from a fresh probe round,
        // falling back to the last known-good path when the round fails
        let selected = match self.prober.select().await {
            Ok(selected) => selected,
            Err(e) => match self.prober.last_good().await {
                Some(previous) => previous,
                None => return Err(e),
            },
        };

        let primary_url = WhepClient::endpoint_url(&selected.base_url, &self.id);
        let fallback_base = self
            .config
            .endpoints
            .fallback_base
            .clone()
            .unwrap_or_else(|| selected.base_url.clone());
        let fallback_url = WhepClient::playlist_url(&fallback_base, &self.id);

        self.broadcaster.update(|s| {
            s.path = selected.path;
            s.primary_url = Some(primary_url.clone());
            s.fallback_url = Some(fallback_url);
            s.has_media = false;
            s.quality = None;
        });

        info!(
            "stream {}: connecting via {} path ({})",
            self.id, selected.path, primary_url
        );

        let pc = self.new_peer_connection().await?;

        // Register the transport before any network round trip so a
        // concurrent teardown can close it
        {
            let mut slot = self.transport.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                drop(slot);
                let _ = pc.close().await;
                return Ok(());
            }
            *slot = Some(Arc::clone(&pc));
        }

        self.wire_callbacks(&pc, epoch);

        // Receive-only offer; WHEP sends the fully-gathered SDP in one POST
        let offer = pc.create_offer(None).await.map_err(Error::WebRtc)?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(Error::WebRtc)?;
        let _ = tokio::time::timeout(self.config.handshake.fetch_timeout(), gathered.recv()).await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("local description missing after gathering".to_string()))?;

        let answer_sdp = self.whep.negotiate(&primary_url, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(Error::WebRtc)?;
        pc.set_remote_description(answer).await.map_err(Error::WebRtc)?;

        // The answer is applied; ICE now has a bounded window to connect
        let weak = Arc::downgrade(self);
        self.timers.arm(
            TimerRole::IceDeadline,
            self.config.handshake.ice_timeout(),
            async move {
                if let Some(conn) = weak.upgrade() {
                    conn.on_ice_deadline(epoch).await;
                }
            },
        );

        Ok(())
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(Error::WebRtc)?;

        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(Error::WebRtc)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: if self.config.stun_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.config.stun_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(Error::WebRtc)?);

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(Error::WebRtc)?;
        }

        Ok(pc)
    }

    fn wire_callbacks(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>, epoch: u64) {
        let weak = Arc::downgrade(self);
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_ice_state(epoch, state).await;
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_track(epoch, track);
                }
            })
        }));
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    async fn handle_ice_state(self: &Arc<Self>, epoch: u64, state: RTCIceConnectionState) {
        if self.is_stale(epoch) {
            return;
        }
        debug!("stream {}: ICE state {}", self.id, state);

        match state {
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                self.on_connected(epoch).await;
            }
            RTCIceConnectionState::Disconnected => {
                // Often a brief blip; give it a grace window before acting
                let weak = Arc::downgrade(self);
                self.timers.arm(
                    TimerRole::DisconnectGrace,
                    self.config.handshake.disconnect_grace(),
                    async move {
                        if let Some(conn) = weak.upgrade() {
                            conn.on_disconnect_elapsed(epoch).await;
                        }
                    },
                );
            }
            RTCIceConnectionState::Failed => {
                self.on_failure(Error::Ice("ICE reported failure".to_string())).await;
            }
            _ => {}
        }
    }

    async fn on_connected(self: &Arc<Self>, epoch: u64) {
        self.timers.cancel(TimerRole::IceDeadline);
        if self.timers.cancel(TimerRole::DisconnectGrace) {
            debug!("stream {}: recovered within disconnect grace", self.id);
        }
        self.attempts.store(0, Ordering::SeqCst);

        let snapshot = self.broadcaster.update(|s| {
            s.state = ConnectionState::Connected;
            s.reconnect_attempts = 0;
        });
        info!("stream {}: connected via {} path", self.id, snapshot.path);

        let pc = self.transport.lock().await.clone();
        if let Some(pc) = pc {
            self.start_sampler(epoch, pc);
        }
    }

    fn handle_track(self: &Arc<Self>, epoch: u64, track: Arc<TrackRemote>) {
        if self.is_stale(epoch) {
            return;
        }
        debug!(
            "stream {}: inbound {} track {}",
            self.id,
            track.kind(),
            track.id()
        );

        let mut media = self.media.write();
        // Keep the first track; a video track replaces a held audio track
        let replace = match media.as_ref() {
            None => true,
            Some(held) => {
                held.kind() != RTPCodecType::Video && track.kind() == RTPCodecType::Video
            }
        };
        if replace {
            *media = Some(track);
            drop(media);
            self.broadcaster.update(|s| s.has_media = true);
        }
    }

    async fn on_ice_deadline(self: &Arc<Self>, epoch: u64) {
        if self.is_stale(epoch) {
            return;
        }
        // The deadline is armed right after the answer is applied; ICE may
        // have connected in the window between the two
        if self.snapshot().state == ConnectionState::Connected {
            return;
        }
        warn!(
            "stream {}: ICE did not connect within {:?}",
            self.id,
            self.config.handshake.ice_timeout()
        );
        self.on_failure(Error::Timeout("ICE establishment deadline".to_string())).await;
    }

    async fn on_disconnect_elapsed(self: &Arc<Self>, epoch: u64) {
        if self.is_stale(epoch) {
            return;
        }
        if self.snapshot().state != ConnectionState::Connected {
            return;
        }
        warn!("stream {}: disconnect outlasted grace window", self.id);

        self.stop_sampler();
        self.broadcaster.update(|s| s.state = ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Translate a transport or handshake error into a state transition.
    /// Nothing propagates to consumers beyond the snapshot fields.
    async fn on_failure(self: &Arc<Self>, error: Error) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        warn!("stream {}: connection failure: {}", self.id, error);

        self.stop_sampler();
        self.close_transport().await;
        *self.media.write() = None;
        self.broadcaster.update(|s| {
            s.state = ConnectionState::Failed;
            s.has_media = false;
        });

        if error.is_retryable() {
            self.schedule_reconnect();
        }
    }

    // ------------------------------------------------------------------
    // Reconnect scheduling
    // ------------------------------------------------------------------

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.ref_count() == 0 {
            // No consumers left; stay terminal instead of retrying
            debug!("stream {}: no consumers, not scheduling reconnect", self.id);
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let policy = &self.config.reconnect;
        if !policy.should_retry(attempt) {
            warn!(
                "stream {}: reconnect attempts exhausted ({}), leaving failed",
                self.id, attempt
            );
            return;
        }

        let delay = policy.delay_for(attempt);
        info!(
            "stream {}: reconnect attempt {} in {:?}",
            self.id,
            attempt + 1,
            delay
        );
        self.broadcaster.update(|s| s.reconnect_attempts = attempt + 1);

        let weak = Arc::downgrade(self);
        self.timers.arm(TimerRole::Reconnect, delay, async move {
            if let Some(conn) = weak.upgrade() {
                conn.spawn_build();
            }
        });
    }

    /// Reset the attempt counter and rebuild, from any state
    pub(crate) fn force_reconnect(self: &Arc<Self>) {
        info!("stream {}: forced reconnect", self.id);
        self.attempts.store(0, Ordering::SeqCst);
        *self.assessor.lock() = QualityAssessor::new();
        self.timers.cancel(TimerRole::Reconnect);
        self.timers.cancel(TimerRole::QualityGrace);
        self.spawn_build();
    }

    // ------------------------------------------------------------------
    // Quality monitoring and fallback
    // ------------------------------------------------------------------

    fn start_sampler(self: &Arc<Self>, epoch: u64, pc: Arc<RTCPeerConnection>) {
        let weak = Arc::downgrade(self);
        let source = PeerStats::new(pc);
        let interval = self.config.quality.sample_interval();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(conn) = weak.upgrade() else { break };
                if conn.is_stale(epoch) {
                    break;
                }
                if let Some(sample) = source.sample(&conn.config.quality).await {
                    conn.handle_sample(epoch, sample);
                }
            }
        });

        if let Some(previous) = self.sampler.lock().replace(handle) {
            previous.abort();
        }
    }

    fn handle_sample(self: &Arc<Self>, epoch: u64, sample: QualitySample) {
        debug!(
            "stream {}: quality {} (rtt {:.0}ms, loss {:.1}%, jitter {:.0}ms)",
            self.id, sample.level, sample.rtt_ms, sample.packet_loss_pct, sample.jitter_ms
        );

        let action = self.assessor.lock().observe(sample.level);
        self.broadcaster.update(|s| s.quality = Some(sample));

        match action {
            QualityAction::ArmFallbackGrace => {
                let weak = Arc::downgrade(self);
                self.timers.arm(
                    TimerRole::QualityGrace,
                    self.config.quality.degrade_grace(),
                    async move {
                        if let Some(conn) = weak.upgrade() {
                            conn.on_quality_grace(epoch).await;
                        }
                    },
                );
            }
            QualityAction::CancelFallbackGrace => {
                self.timers.cancel(TimerRole::QualityGrace);
            }
            QualityAction::None => {}
        }
    }

    async fn on_quality_grace(self: &Arc<Self>, epoch: u64) {
        if self.is_stale(epoch) {
            return;
        }
        if !self.assessor.lock().is_degraded() {
            return;
        }
        self.enter_fallback().await;
    }

    /// Deliberate downgrade to the HTTP-streaming fallback. The WebRTC
    /// transport is closed; consumers are told to render the playlist URL.
    async fn enter_fallback(self: &Arc<Self>) {
        info!(
            "stream {}: sustained poor quality, switching to HTTP fallback",
            self.id
        );

        self.stop_sampler();
        self.timers.cancel(TimerRole::IceDeadline);
        self.timers.cancel(TimerRole::DisconnectGrace);
        self.timers.cancel(TimerRole::QualityGrace);
        self.close_transport().await;
        *self.media.write() = None;

        self.broadcaster.update(|s| {
            s.state = ConnectionState::Fallback;
            s.path = PathKind::FallbackHttp;
            s.has_media = false;
        });
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn stop_sampler(&self) {
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
    }

    async fn close_transport(&self) {
        let pc = self.transport.lock().await.take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                debug!("stream {}: transport close: {}", self.id, e);
            }
        }
    }

    /// Full teardown when the last reference is released
    pub(crate) async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.timers.cancel_all();
        self.stop_sampler();
        self.close_transport().await;
        *self.media.write() = None;
        info!("stream {}: torn down", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    fn test_config() -> Arc<MediaClientConfig> {
        Arc::new(MediaClientConfig {
            endpoints: EndpointConfig {
                direct: Some("http://127.0.0.1:1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn new_connection() -> Arc<StreamConnection> {
        let config = test_config();
        let prober = Arc::new(PathProber::new(Arc::clone(&config)).unwrap());
        StreamConnection::new("cam0", config, prober).unwrap()
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let conn = new_connection();
        let snap = conn.snapshot();
        assert_eq!(snap.state, ConnectionState::Connecting);
        assert_eq!(snap.path, PathKind::Unknown);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(!snap.has_media);
    }

    #[tokio::test]
    async fn test_ref_count_floors_at_zero() {
        let conn = new_connection();
        assert_eq!(conn.add_ref(), 1);
        assert_eq!(conn.add_ref(), 2);
        assert_eq!(conn.release_ref(), 1);
        assert_eq!(conn.release_ref(), 0);
        // Extra release is a no-op
        assert_eq!(conn.release_ref(), 0);
        assert_eq!(conn.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_not_scheduled_without_consumers() {
        let conn = new_connection();
        // No add_ref: failure must leave the stream terminal
        conn.on_failure(Error::Timeout("test".to_string())).await;
        assert_eq!(conn.snapshot().state, ConnectionState::Failed);
        assert_eq!(conn.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_failure_schedules_reconnect_with_consumers() {
        let conn = new_connection();
        conn.add_ref();
        conn.on_failure(Error::Timeout("test".to_string())).await;
        assert_eq!(conn.snapshot().state, ConnectionState::Failed);
        assert_eq!(conn.snapshot().reconnect_attempts, 1);
    }

    #[tokio::test]
    async fn test_force_reconnect_resets_attempts() {
        let conn = new_connection();
        conn.add_ref();
        conn.attempts.store(7, Ordering::SeqCst);
        conn.force_reconnect();
        assert_eq!(conn.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(conn.snapshot().state, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let conn = new_connection();
        conn.shutdown().await;
        conn.shutdown().await;
        // A closed connection refuses new builds
        conn.spawn_build();
        assert!(!conn.building.load(Ordering::SeqCst));
    }
}
