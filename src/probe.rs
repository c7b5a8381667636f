//! Path probing and selection
//!
//! The appliance is reachable over up to three path classes: a directly
//! routable address, a VPN-mesh address and a relay tunnel. The prober
//! issues a cheap reachability check against every configured candidate in
//! parallel and selects a winner by fixed priority, never by raw probe
//! latency: a relay will often answer a health check faster than a direct
//! path while still carrying materially worse media latency and jitter.

use crate::config::{MediaClientConfig, ProbeStyle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Network path class, ordered by media preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathKind {
    /// Directly routable local-network address
    Direct,
    /// Virtual-mesh-network address
    VpnMesh,
    /// Tunnel/relay address reached through an intermediary
    Relay,
    /// HTTP-streaming fallback (reported while a stream is degraded)
    FallbackHttp,
    /// Not yet classified
    Unknown,
}

impl PathKind {
    /// Selection priority; lower wins
    pub fn priority(&self) -> u8 {
        match self {
            PathKind::Direct => 0,
            PathKind::VpnMesh => 1,
            PathKind::Relay => 2,
            PathKind::FallbackHttp => 3,
            PathKind::Unknown => 4,
        }
    }

    /// True for paths worth preserving across a failed probe round
    pub fn is_preferred(&self) -> bool {
        matches!(self, PathKind::Direct | PathKind::VpnMesh)
    }
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PathKind::Direct => "direct",
            PathKind::VpnMesh => "vpn-mesh",
            PathKind::Relay => "relay",
            PathKind::FallbackHttp => "fallback-http",
            PathKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of probing one candidate base URL. Ephemeral: produced once per
/// probe round and used to seed URL resolution for new stream connections.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Path class of the candidate
    pub path: PathKind,
    /// Candidate base URL
    pub base_url: String,
    /// Observed probe round trip
    pub latency: Duration,
    /// Whether the candidate answered with a reachable status
    pub success: bool,
}

/// The path a probe round settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPath {
    /// Path class of the winner
    pub path: PathKind,
    /// Winning base URL
    pub base_url: String,
}

/// Probes candidate paths and remembers the last known-good selection
pub struct PathProber {
    config: Arc<MediaClientConfig>,
    http: reqwest::Client,
    last_good: RwLock<Option<SelectedPath>>,
}

impl PathProber {
    /// Create a prober over the configured candidate endpoints
    pub fn new(config: Arc<MediaClientConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            config,
            http,
            last_good: RwLock::new(None),
        })
    }

    /// Candidate (path, base URL) pairs in priority order
    fn candidates(&self) -> Vec<(PathKind, String)> {
        let ep = &self.config.endpoints;
        let mut out = Vec::new();
        if let Some(direct) = &ep.direct {
            if classify_base(direct) == PathKind::Relay {
                warn!("configured direct endpoint {} has a public host", direct);
            }
            out.push((PathKind::Direct, direct.clone()));
        }
        if let Some(mesh) = &ep.vpn_mesh {
            out.push((PathKind::VpnMesh, mesh.clone()));
        }
        if let Some(relay) = &ep.relay {
            out.push((PathKind::Relay, relay.clone()));
        }
        out
    }

    /// Probe every configured candidate in parallel
    pub async fn probe(&self) -> Vec<ProbeResult> {
        let futures: Vec<_> = self
            .candidates()
            .into_iter()
            .map(|(path, base)| {
                let timeout = self.config.probe.timeout_for(path == PathKind::Relay);
                self.probe_one(path, base, timeout)
            })
            .collect();

        futures::future::join_all(futures).await
    }

    /// Run a probe round and select a base URL for new connections
    ///
    /// Among successful probes the winner is picked by path priority. When
    /// the whole round fails but a preferred (direct/VPN-mesh) path was
    /// previously known good, that path is retained: one flaky round must
    /// not downgrade live media onto the relay.
    pub async fn select(&self) -> Result<SelectedPath> {
        let results = self.probe().await;
        let winner = pick(&results).cloned();

        match winner {
            Some(result) => {
                let selected = SelectedPath {
                    path: result.path,
                    base_url: result.base_url,
                };
                info!(
                    "path probe selected {} ({}) in {:?}",
                    selected.path, selected.base_url, result.latency
                );
                *self.last_good.write().await = Some(selected.clone());
                Ok(selected)
            }
            None => {
                let previous = self.last_good.read().await.clone();
                match previous {
                    Some(prev) if prev.path.is_preferred() => {
                        warn!(
                            "probe round failed entirely; retaining known-good {} path {}",
                            prev.path, prev.base_url
                        );
                        Ok(prev)
                    }
                    Some(prev) => Ok(prev),
                    None => Err(Error::NoReachablePath(
                        "no candidate path answered and none was previously known".to_string(),
                    )),
                }
            }
        }
    }

    /// Last selection, if any round has succeeded
    pub async fn last_good(&self) -> Option<SelectedPath> {
        self.last_good.read().await.clone()
    }

    async fn probe_one(&self, path: PathKind, base_url: String, timeout: Duration) -> ProbeResult {
        let url = match self.config.probe.style {
            ProbeStyle::Options => base_url.trim_end_matches('/').to_string(),
            ProbeStyle::Health => format!("{}/health", base_url.trim_end_matches('/')),
        };

        let request = match self.config.probe.style {
            ProbeStyle::Options => self.http.request(reqwest::Method::OPTIONS, &url),
            ProbeStyle::Health => self.http.get(&url),
        };

        let started = Instant::now();
        let success = match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) => reachable_status(response.status().as_u16()),
            Ok(Err(e)) => {
                debug!("probe {} failed: {}", base_url, e);
                false
            }
            Err(_) => {
                debug!("probe {} timed out after {:?}", base_url, timeout);
                false
            }
        };
        let latency = started.elapsed();

        debug!(
            "probe {} ({}) -> success={} latency={:?}",
            base_url, path, success, latency
        );

        ProbeResult {
            path,
            base_url,
            latency,
            success,
        }
    }
}

/// Pick the winner among a probe round by path priority, ignoring latency
pub(crate) fn pick(results: &[ProbeResult]) -> Option<&ProbeResult> {
    results
        .iter()
        .filter(|r| r.success)
        .min_by_key(|r| r.path.priority())
}

/// Statuses that count as "reachable" for a probe. 405 covers endpoints
/// that reject OPTIONS but are plainly alive.
pub(crate) fn reachable_status(status: u16) -> bool {
    matches!(status, 200 | 204 | 405)
}

/// Heuristic check that a URL's host is a private or local address
fn looks_direct(base: &str) -> bool {
    let Ok(parsed) = url::Url::parse(base) else {
        return false;
    };
    match parsed.host() {
        Some(url::Host::Ipv4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".lan")
        }
        None => false,
    }
}

/// Classify a host for reporting purposes when a base URL arrives without
/// a configured slot (e.g. a hand-entered override in the CLI).
pub fn classify_base(base: &str) -> PathKind {
    if looks_direct(base) {
        PathKind::Direct
    } else if url::Url::parse(base)
        .ok()
        .and_then(|u| u.host().map(|h| matches!(h, url::Host::Ipv4(ip) if ip.octets()[0] == 100)))
        .unwrap_or(false)
    {
        // CGNAT range used by common mesh VPNs
        PathKind::VpnMesh
    } else {
        PathKind::Relay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(path: PathKind, success: bool, latency_ms: u64) -> ProbeResult {
        ProbeResult {
            path,
            base_url: format!("http://{}", path),
            latency: Duration::from_millis(latency_ms),
            success,
        }
    }

    #[test]
    fn test_pick_prefers_direct_over_faster_relay() {
        let round = vec![
            result(PathKind::Relay, true, 10),
            result(PathKind::Direct, true, 50),
        ];
        let winner = pick(&round).unwrap();
        assert_eq!(winner.path, PathKind::Direct);
    }

    #[test]
    fn test_pick_skips_failed_candidates() {
        let round = vec![
            result(PathKind::Direct, false, 2000),
            result(PathKind::VpnMesh, true, 80),
            result(PathKind::Relay, true, 30),
        ];
        let winner = pick(&round).unwrap();
        assert_eq!(winner.path, PathKind::VpnMesh);
    }

    #[test]
    fn test_pick_none_when_all_fail() {
        let round = vec![
            result(PathKind::Direct, false, 2000),
            result(PathKind::Relay, false, 3000),
        ];
        assert!(pick(&round).is_none());
    }

    #[test]
    fn test_reachable_status() {
        assert!(reachable_status(200));
        assert!(reachable_status(204));
        assert!(reachable_status(405));
        assert!(!reachable_status(404));
        assert!(!reachable_status(502));
    }

    #[test]
    fn test_path_priority_ordering() {
        assert!(PathKind::Direct.priority() < PathKind::VpnMesh.priority());
        assert!(PathKind::VpnMesh.priority() < PathKind::Relay.priority());
    }

    #[test]
    fn test_looks_direct() {
        assert!(looks_direct("http://192.168.8.10:8889"));
        assert!(looks_direct("http://camlink.local:8889"));
        assert!(!looks_direct("https://cam.example.com"));
    }

    #[test]
    fn test_classify_base() {
        assert_eq!(classify_base("http://10.0.0.4:8889"), PathKind::Direct);
        assert_eq!(classify_base("http://100.74.21.5:8889"), PathKind::VpnMesh);
        assert_eq!(classify_base("https://cam.example.com"), PathKind::Relay);
    }
}
