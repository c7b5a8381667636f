//! Resilient media-connection layer for the Camlink capture appliance
//!
//! The appliance is reachable over several network paths (direct LAN,
//! VPN mesh, relay tunnel). This crate picks the best path, establishes a
//! low-latency WebRTC pull stream (WHEP) per camera, keeps each stream
//! alive across path changes and transient failures, monitors live
//! quality, and downgrades to HTTP streaming when the live path degrades.
//! Multiple UI surfaces may acquire the same camera concurrently without
//! ever creating duplicate transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  UI surfaces                                             │
//! │  ↓ acquire/release/force_reconnect/preload               │
//! │  StreamRegistry (one connection per stream id, refcounted)│
//! │  ├─ PathProber (parallel probes, priority selection)     │
//! │  └─ StreamConnection (per id)                            │
//! │     ├─ WhepClient (HTTP offer/answer)                    │
//! │     ├─ RTCPeerConnection (exclusively owned, epoch-tagged)│
//! │     ├─ TimerSet (reconnect / ICE deadline / grace timers)│
//! │     └─ quality sampler (fallback hysteresis)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use camlink_media::{MediaClientConfig, StreamRegistry};
//!
//! let mut config = MediaClientConfig::default();
//! config.endpoints.direct = Some("http://192.168.8.10:8889".to_string());
//! config.endpoints.relay = Some("https://cam.example.com".to_string());
//!
//! let registry = StreamRegistry::new(config)?;
//! let handle = registry.acquire("cam0").await?;
//! let mut changes = handle.changes();
//! while let Ok(snapshot) = changes.recv().await {
//!     println!("cam0 is now {}", snapshot.state);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod config;
pub mod error;

// Internal modules with re-exported types
mod connection;
mod events;
mod loader;
mod probe;
mod quality;
mod registry;
mod whep;

// Re-exports for the public API
pub use config::{
    EndpointConfig, HandshakeConfig, LoaderConfig, MediaClientConfig, ProbeConfig, ProbeStyle,
};
pub use connection::backoff::ReconnectPolicy;
pub use connection::stats::StatsSource;
pub use error::{Error, Result};
pub use events::{ConnectionState, StreamSnapshot};
pub use loader::{PreloadOutcome, PreloadReport};
pub use probe::{classify_base, PathKind, PathProber, ProbeResult, SelectedPath};
pub use quality::{QualityConfig, QualityLevel, QualitySample};
pub use registry::{StreamHandle, StreamRegistry};
pub use whep::WhepClient;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
