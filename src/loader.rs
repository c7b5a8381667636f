//! Progressive stream preload
//!
//! On a good path every requested stream is acquired at once. On a
//! constrained path (relay, or forced by config) streams load one at a
//! time: each must hold `Connected` for a stability window before the
//! next is started, bounded by a per-stream deadline so one dead camera
//! never stalls the rest of the queue.

use crate::config::LoaderConfig;
use crate::events::ConnectionState;
use crate::probe::PathKind;
use crate::registry::{StreamHandle, StreamRegistry};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of warming up one stream
pub struct PreloadOutcome {
    /// Stream id
    pub id: String,
    /// Whether the stream produced stable live media (or a valid fallback)
    /// within its deadline
    pub ready: bool,
    /// State observed when the outcome was decided
    pub state: ConnectionState,
    /// The acquired handle, for the caller to adopt or release
    pub handle: Option<StreamHandle>,
}

/// Per-id report of a preload run
pub struct PreloadReport {
    /// One outcome per requested id, in request order
    pub outcomes: Vec<PreloadOutcome>,
}

impl PreloadReport {
    /// True when every requested stream became ready
    pub fn all_ready(&self) -> bool {
        self.outcomes.iter().all(|o| o.ready)
    }

    /// Ids that failed to become ready within their deadline
    pub fn failed_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.ready)
            .map(|o| o.id.as_str())
            .collect()
    }
}

/// Run a preload over the registry
pub(crate) async fn run(
    registry: &StreamRegistry,
    config: &LoaderConfig,
    ids: &[String],
) -> PreloadReport {
    let constrained = config.force_sequential
        || matches!(
            registry.prober().last_good().await,
            Some(selected) if selected.path == PathKind::Relay
        );

    info!(
        "preloading {} stream(s) ({})",
        ids.len(),
        if constrained { "sequential" } else { "concurrent" }
    );

    let outcomes = if constrained {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push(warm_one(registry, config, id).await);
        }
        outcomes
    } else {
        futures::future::join_all(ids.iter().map(|id| warm_one(registry, config, id))).await
    };

    let report = PreloadReport { outcomes };
    if !report.all_ready() {
        warn!("preload finished with failures: {:?}", report.failed_ids());
    }
    report
}

/// Acquire one stream and wait for it to stabilize or time out
async fn warm_one(registry: &StreamRegistry, config: &LoaderConfig, id: &str) -> PreloadOutcome {
    let handle = match registry.acquire(id).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("preload {}: acquire failed: {}", id, e);
            return PreloadOutcome {
                id: id.to_string(),
                ready: false,
                state: ConnectionState::Failed,
                handle: None,
            };
        }
    };

    let deadline = Instant::now() + config.per_stream_deadline();
    let window = config.stability_window();
    let mut changes = handle.changes();

    loop {
        let snapshot = handle.snapshot();

        if Instant::now() >= deadline {
            let ready = matches!(
                snapshot.state,
                ConnectionState::Connected | ConnectionState::Fallback
            );
            debug!("preload {}: deadline reached in state {}", id, snapshot.state);
            return outcome(id, ready, snapshot.state, handle);
        }

        match snapshot.state {
            // Fallback is a playable outcome, not a failure
            ConnectionState::Fallback => {
                return outcome(id, true, ConnectionState::Fallback, handle);
            }
            ConnectionState::Connected => {
                let hold_until = Instant::now() + window;
                let stable = hold_connected(&mut changes, hold_until.min(deadline)).await;
                if stable && Instant::now() < deadline {
                    debug!("preload {}: stable for {:?}", id, window);
                    return outcome(id, true, ConnectionState::Connected, handle);
                }
                // Left Connected inside the window (or hit the deadline):
                // loop and re-evaluate from the fresh snapshot
            }
            _ => {
                match tokio::time::timeout_at(deadline, changes.recv()).await {
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
                    Ok(Err(RecvError::Closed)) | Err(_) => {
                        let snapshot = handle.snapshot();
                        let ready = matches!(
                            snapshot.state,
                            ConnectionState::Connected | ConnectionState::Fallback
                        );
                        return outcome(id, ready, snapshot.state, handle);
                    }
                }
            }
        }
    }
}

/// Wait until `hold_until`, returning false if the stream leaves
/// `Connected` before then
async fn hold_connected(
    changes: &mut tokio::sync::broadcast::Receiver<crate::events::StreamSnapshot>,
    hold_until: Instant,
) -> bool {
    loop {
        let now = Instant::now();
        if now >= hold_until {
            return true;
        }
        match tokio::time::timeout_at(hold_until, changes.recv()).await {
            // Quiet for the whole window
            Err(_) => return true,
            Ok(Ok(snapshot)) => {
                if snapshot.state != ConnectionState::Connected {
                    return false;
                }
            }
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => return true,
        }
    }
}

fn outcome(id: &str, ready: bool, state: ConnectionState, handle: StreamHandle) -> PreloadOutcome {
    PreloadOutcome {
        id: id.to_string(),
        ready,
        state,
        handle: Some(handle),
    }
}
