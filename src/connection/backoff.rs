//! Reconnect backoff policy

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controls how reconnection attempts are scheduled after a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum attempts before the stream is left in terminal failed state
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_ms: u64,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Jitter fraction applied symmetrically (0.2 = +/-20%)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Base delay for a given attempt number (0-indexed), before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let ms = (self.initial_ms as f64) * self.multiplier.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_ms as f64) as u64)
    }

    /// Delay for a given attempt with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        // rand::random is in [0, 1); map to [-jitter, +jitter]
        let factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
        Duration::from_millis((base * factor).max(0.0) as u64)
    }

    /// Check if another attempt is allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<()> {
        if self.initial_ms == 0 || self.max_ms < self.initial_ms {
            return Err(Error::InvalidConfig(
                "reconnect delays must satisfy 0 < initial_ms <= max_ms".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "reconnect multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::InvalidConfig(
                "reconnect jitter must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}
