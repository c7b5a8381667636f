//! Connection quality classification and fallback hysteresis
//!
//! Transport statistics are sampled on a fixed interval while a stream is
//! connected. Each sample classifies into an ordered level; the stream
//! takes the worst level implied by any single metric. A single poor
//! sample never flips the stream; only a full grace window of sustained
//! poor quality does.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::debug;

/// Ordered quality levels, best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// Well within interactive latency budgets
    Excellent,
    /// Fine for monitoring and production use
    Good,
    /// Noticeable but tolerable degradation
    Fair,
    /// Degraded enough to consider the fallback
    Poor,
    /// Effectively unusable for live video
    Bad,
}

impl QualityLevel {
    /// Levels that arm (or keep) the fallback grace timer
    pub fn is_degraded(&self) -> bool {
        matches!(self, QualityLevel::Poor | QualityLevel::Bad)
    }

    /// Levels that clear the degraded flag
    pub fn is_healthy(&self) -> bool {
        matches!(self, QualityLevel::Excellent | QualityLevel::Good)
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Bad => "bad",
        };
        f.write_str(s)
    }
}

/// One quality sample from the live transport
#[derive(Debug, Clone, Serialize)]
pub struct QualitySample {
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
    /// Packet loss on the inbound video stream, percent
    pub packet_loss_pct: f64,
    /// Jitter in milliseconds
    pub jitter_ms: f64,
    /// Classified level
    pub level: QualityLevel,
    /// When the sample was taken
    pub sampled_at: SystemTime,
}

impl QualitySample {
    /// Convenience score 0-100; higher is better
    pub fn score(&self) -> u32 {
        let mut score = 100u32;

        if self.rtt_ms > 100.0 {
            let deduction = ((self.rtt_ms - 100.0) / 10.0).min(30.0) as u32;
            score = score.saturating_sub(deduction);
        }

        let loss_deduction = (self.packet_loss_pct * 10.0).min(40.0) as u32;
        score = score.saturating_sub(loss_deduction);

        if self.jitter_ms > 30.0 {
            let deduction = ((self.jitter_ms - 30.0) / 5.0).min(20.0) as u32;
            score = score.saturating_sub(deduction);
        }

        score
    }
}

/// Quality sampling and fallback configuration
///
/// The upper-bound fields are the highest value of each metric that still
/// qualifies for the corresponding level; anything beyond the `poor`
/// bound classifies as `Bad`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Interval between transport stat samples, milliseconds
    pub sample_interval_ms: u64,

    /// Sustained-poor window before the stream flips to fallback,
    /// milliseconds
    pub degrade_grace_ms: u64,

    /// RTT upper bound for Excellent, milliseconds
    pub rtt_excellent_ms: f64,
    /// RTT upper bound for Good, milliseconds
    pub rtt_good_ms: f64,
    /// RTT upper bound for Fair, milliseconds
    pub rtt_fair_ms: f64,
    /// RTT upper bound for Poor, milliseconds
    pub rtt_poor_ms: f64,

    /// Loss upper bound for Excellent, percent
    pub loss_excellent_pct: f64,
    /// Loss upper bound for Good, percent
    pub loss_good_pct: f64,
    /// Loss upper bound for Fair, percent
    pub loss_fair_pct: f64,
    /// Loss upper bound for Poor, percent
    pub loss_poor_pct: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
            degrade_grace_ms: 5_000,
            rtt_excellent_ms: 150.0,
            rtt_good_ms: 300.0,
            rtt_fair_ms: 500.0,
            rtt_poor_ms: 800.0,
            loss_excellent_pct: 1.0,
            loss_good_pct: 3.0,
            loss_fair_pct: 8.0,
            loss_poor_pct: 15.0,
        }
    }
}

impl QualityConfig {
    /// Sampling interval
    pub fn sample_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sample_interval_ms)
    }

    /// Fallback grace window
    pub fn degrade_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.degrade_grace_ms)
    }

    /// Classify a raw measurement pair into a level
    ///
    /// Each metric maps to a level independently; the sample takes the
    /// worst of the two. Crossing a single threshold is enough to degrade.
    pub fn classify(&self, rtt_ms: f64, loss_pct: f64) -> QualityLevel {
        let by_rtt = if rtt_ms <= self.rtt_excellent_ms {
            QualityLevel::Excellent
        } else if rtt_ms <= self.rtt_good_ms {
            QualityLevel::Good
        } else if rtt_ms <= self.rtt_fair_ms {
            QualityLevel::Fair
        } else if rtt_ms <= self.rtt_poor_ms {
            QualityLevel::Poor
        } else {
            QualityLevel::Bad
        };

        let by_loss = if loss_pct <= self.loss_excellent_pct {
            QualityLevel::Excellent
        } else if loss_pct <= self.loss_good_pct {
            QualityLevel::Good
        } else if loss_pct <= self.loss_fair_pct {
            QualityLevel::Fair
        } else if loss_pct <= self.loss_poor_pct {
            QualityLevel::Poor
        } else {
            QualityLevel::Bad
        };

        by_rtt.max(by_loss)
    }

    /// Validate threshold ordering
    pub fn validate(&self) -> Result<()> {
        let rtt_ordered = self.rtt_excellent_ms < self.rtt_good_ms
            && self.rtt_good_ms < self.rtt_fair_ms
            && self.rtt_fair_ms < self.rtt_poor_ms;
        let loss_ordered = self.loss_excellent_pct < self.loss_good_pct
            && self.loss_good_pct < self.loss_fair_pct
            && self.loss_fair_pct < self.loss_poor_pct;

        if !rtt_ordered || !loss_ordered {
            return Err(Error::InvalidConfig(
                "quality thresholds must be strictly increasing".to_string(),
            ));
        }
        if self.sample_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "quality sample interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the connection should do after observing a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QualityAction {
    /// Nothing to change
    None,
    /// First degraded sample: arm the fallback grace timer
    ArmFallbackGrace,
    /// Quality recovered: cancel a pending grace timer, clear the flag
    CancelFallbackGrace,
}

/// Tracks the degraded flag across samples and decides timer actions
///
/// The hysteresis lives here so it can be tested with scripted samples;
/// the connection owns the actual timer.
#[derive(Debug, Default)]
pub(crate) struct QualityAssessor {
    degraded: bool,
}

impl QualityAssessor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Observe a classified sample and return the timer action
    pub(crate) fn observe(&mut self, level: QualityLevel) -> QualityAction {
        if level.is_degraded() {
            if self.degraded {
                // Grace timer already pending; let it run out
                QualityAction::None
            } else {
                debug!("quality degraded to {}, arming fallback grace", level);
                self.degraded = true;
                QualityAction::ArmFallbackGrace
            }
        } else if level.is_healthy() && self.degraded {
            debug!("quality recovered to {}, clearing degraded flag", level);
            self.degraded = false;
            QualityAction::CancelFallbackGrace
        } else {
            QualityAction::None
        }
    }

    /// Whether the last samples left the stream flagged as degraded
    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded
    }
}
