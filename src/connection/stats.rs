//! Transport statistics sampling
//!
//! The quality monitor reads stats through the `StatsSource` trait so the
//! hysteresis machinery can be driven by scripted samples in tests. The
//! production source reads the nominated ICE candidate pair and the
//! inbound video RTP stream from the peer connection's stats report.

use crate::quality::{QualityConfig, QualitySample};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Source of transport quality samples
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Take one sample; `None` when the transport has no usable stats yet
    async fn sample(&self, config: &QualityConfig) -> Option<QualitySample>;
}

/// Reads samples from a live `RTCPeerConnection`
///
/// Packet loss is computed over the window since the previous sample, not
/// over the connection lifetime, so one early burst does not poison every
/// later reading.
pub(crate) struct PeerStats {
    pc: Arc<RTCPeerConnection>,
    previous: Mutex<Option<RtpCounters>>,
}

#[derive(Debug, Clone, Copy)]
struct RtpCounters {
    received: u64,
    lost: i64,
}

impl PeerStats {
    pub(crate) fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            pc,
            previous: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StatsSource for PeerStats {
    async fn sample(&self, config: &QualityConfig) -> Option<QualitySample> {
        let report = self.pc.get_stats().await;

        let mut rtt_ms = None;
        let mut counters = None;
        let mut jitter_ms = 0.0;

        for (_id, entry) in report.reports.iter() {
            match entry {
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    let rtt = pair.current_round_trip_time * 1000.0;
                    if rtt > 0.0 {
                        rtt_ms = Some(rtt);
                    }
                }
                StatsReportType::InboundRTP(inbound) if inbound.kind == "video" => {
                    counters = Some(RtpCounters {
                        received: inbound.packets_received,
                        lost: inbound.packets_lost,
                    });
                    jitter_ms = inbound.jitter * 1000.0;
                }
                _ => {}
            }
        }

        let rtt_ms = rtt_ms?;
        let loss_pct = counters
            .map(|now| {
                let mut previous = self.previous.lock();
                let pct = windowed_loss_pct(previous.as_ref(), &now);
                *previous = Some(now);
                pct
            })
            .unwrap_or(0.0);

        Some(QualitySample {
            rtt_ms,
            packet_loss_pct: loss_pct,
            jitter_ms,
            level: config.classify(rtt_ms, loss_pct),
            sampled_at: SystemTime::now(),
        })
    }
}

/// Loss percentage over the delta window between two cumulative readings
fn windowed_loss_pct(previous: Option<&RtpCounters>, now: &RtpCounters) -> f64 {
    let (received, lost) = match previous {
        Some(prev) => (
            now.received.saturating_sub(prev.received),
            (now.lost - prev.lost).max(0) as u64,
        ),
        None => (now.received, now.lost.max(0) as u64),
    };

    let total = received + lost;
    if total == 0 {
        return 0.0;
    }
    (lost as f64 / total as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windowed_loss_first_sample_uses_totals() {
        let now = RtpCounters {
            received: 90,
            lost: 10,
        };
        let pct = windowed_loss_pct(None, &now);
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_windowed_loss_uses_delta() {
        let prev = RtpCounters {
            received: 900,
            lost: 100,
        };
        // 100 more received, none lost since the previous sample
        let now = RtpCounters {
            received: 1000,
            lost: 100,
        };
        let pct = windowed_loss_pct(Some(&prev), &now);
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn test_windowed_loss_empty_window() {
        let prev = RtpCounters {
            received: 500,
            lost: 5,
        };
        let now = prev;
        assert_eq!(windowed_loss_pct(Some(&prev), &now), 0.0);
    }
}
