//! Configuration types for the media-connection layer
//!
//! Every empirically-tuned duration and threshold is a config field so
//! deployments can adjust them without rebuilding; the defaults are the
//! values the appliance ships with.

use crate::connection::backoff::ReconnectPolicy;
use crate::quality::QualityConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the stream registry and its connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaClientConfig {
    /// Candidate base URLs for reaching the appliance
    pub endpoints: EndpointConfig,

    /// Path probing behavior
    pub probe: ProbeConfig,

    /// WHEP handshake and transport deadlines
    pub handshake: HandshakeConfig,

    /// Reconnect backoff policy
    pub reconnect: ReconnectPolicy,

    /// Quality sampling and fallback thresholds
    pub quality: QualityConfig,

    /// Progressive preload behavior
    pub loader: LoaderConfig,

    /// STUN server URLs. Empty by default: the appliance is reached over
    /// host-routable paths (LAN, VPN mesh, tunnel), where server-reflexive
    /// candidates only add handshake latency.
    pub stun_servers: Vec<String>,
}

/// Candidate base URLs for the appliance, one per path class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Directly routable device address (e.g. `http://192.168.8.10:8889`)
    pub direct: Option<String>,

    /// VPN-mesh address (e.g. `http://100.74.21.5:8889`)
    pub vpn_mesh: Option<String>,

    /// Relay/tunnel address (e.g. `https://cam.example.com`)
    pub relay: Option<String>,

    /// Override base for the HTTP-streaming fallback. When unset the
    /// fallback playlist resolves against the winning probe base.
    pub fallback_base: Option<String>,
}

impl EndpointConfig {
    /// True when no candidate base URL is configured at all
    pub fn is_empty(&self) -> bool {
        self.direct.is_none() && self.vpn_mesh.is_none() && self.relay.is_none()
    }
}

/// Which request a reachability probe issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStyle {
    /// `OPTIONS` against the WHEP path root (default)
    Options,
    /// `GET /health` on the base URL
    Health,
}

/// Path probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe request style
    pub style: ProbeStyle,

    /// Timeout for direct and VPN-mesh probes in milliseconds
    pub local_timeout_ms: u64,

    /// Timeout for relay probes in milliseconds (relays answer slower)
    pub relay_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            style: ProbeStyle::Options,
            local_timeout_ms: 2_000,
            relay_timeout_ms: 3_000,
        }
    }
}

impl ProbeConfig {
    /// Probe timeout for a given path class
    pub fn timeout_for(&self, relay: bool) -> Duration {
        if relay {
            Duration::from_millis(self.relay_timeout_ms)
        } else {
            Duration::from_millis(self.local_timeout_ms)
        }
    }
}

/// Deadlines for the WHEP handshake and transport establishment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Bound on the offer/answer HTTP exchange in milliseconds
    pub fetch_timeout_ms: u64,

    /// Deadline for ICE to reach a connected state after the answer is
    /// applied, in milliseconds
    pub ice_timeout_ms: u64,

    /// Grace period after an ICE disconnect before the stream is treated
    /// as disconnected, in milliseconds
    pub disconnect_grace_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            ice_timeout_ms: 8_000,
            disconnect_grace_ms: 3_000,
        }
    }
}

impl HandshakeConfig {
    /// Handshake fetch deadline
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// ICE establishment deadline
    pub fn ice_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_timeout_ms)
    }

    /// Disconnect grace window
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Progressive preload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How long a stream must stay continuously connected before the next
    /// one is started, in milliseconds
    pub stability_window_ms: u64,

    /// Per-stream deadline during sequential preload, in milliseconds
    pub per_stream_deadline_ms: u64,

    /// Always load one stream at a time, regardless of the active path
    pub force_sequential: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            stability_window_ms: 2_000,
            per_stream_deadline_ms: 10_000,
            force_sequential: false,
        }
    }
}

impl LoaderConfig {
    /// Stability window duration
    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    /// Per-stream deadline duration
    pub fn per_stream_deadline(&self) -> Duration {
        Duration::from_millis(self.per_stream_deadline_ms)
    }
}

impl Default for MediaClientConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            probe: ProbeConfig::default(),
            handshake: HandshakeConfig::default(),
            reconnect: ReconnectPolicy::default(),
            quality: QualityConfig::default(),
            loader: LoaderConfig::default(),
            stun_servers: Vec::new(),
        }
    }
}

impl MediaClientConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when no endpoint is configured, an
    /// endpoint URL has a non-HTTP scheme, or a policy parameter is out of
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one endpoint (direct, vpn_mesh or relay) is required".to_string(),
            ));
        }

        for base in [
            self.endpoints.direct.as_deref(),
            self.endpoints.vpn_mesh.as_deref(),
            self.endpoints.relay.as_deref(),
            self.endpoints.fallback_base.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            validate_base_url(base)?;
        }

        self.reconnect.validate()?;
        self.quality.validate()?;

        if self.handshake.fetch_timeout_ms == 0 || self.handshake.ice_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "handshake timeouts must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Check that a base URL parses and uses an HTTP scheme
fn validate_base_url(base: &str) -> Result<()> {
    let parsed = url::Url::parse(base)
        .map_err(|e| Error::InvalidConfig(format!("endpoint `{}` is not a URL: {}", base, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::InvalidConfig(format!(
            "endpoint `{}` must use http:// or https://",
            base
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MediaClientConfig {
        MediaClientConfig {
            endpoints: EndpointConfig {
                direct: Some("http://192.168.8.10:8889".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_timeouts() {
        let cfg = MediaClientConfig::default();
        assert_eq!(cfg.handshake.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.handshake.ice_timeout(), Duration::from_secs(8));
        assert_eq!(cfg.handshake.disconnect_grace(), Duration::from_secs(3));
        assert_eq!(cfg.probe.timeout_for(false), Duration::from_secs(2));
        assert_eq!(cfg.probe.timeout_for(true), Duration::from_secs(3));
        assert!(cfg.stun_servers.is_empty());
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let cfg = MediaClientConfig::default();
        let err = cfg.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_minimal_passes() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let mut cfg = minimal();
        cfg.endpoints.relay = Some("rtsp://cam.example.com".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut cfg = minimal();
        cfg.handshake.fetch_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let cfg = minimal();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MediaClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.endpoints.direct, cfg.endpoints.direct);
        assert_eq!(back.handshake.ice_timeout_ms, cfg.handshake.ice_timeout_ms);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"endpoints":{"relay":"https://cam.example.com"}}"#;
        let cfg: MediaClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.endpoints.relay.as_deref(), Some("https://cam.example.com"));
        assert_eq!(cfg.handshake.fetch_timeout_ms, 5_000);
        assert!(cfg.validate().is_ok());
    }
}
