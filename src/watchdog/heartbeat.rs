//! Periodic heartbeat bound to one watchdog connection

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Something that can emit one heartbeat
#[async_trait]
pub trait HeartbeatEmitter: Send + Sync {
    /// Returns false once the connection can no longer carry heartbeats
    async fn emit(&self) -> bool;
}

/// Why the heartbeat loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    Cancelled,
    /// The emitter reported the connection is gone
    Stopped,
}

/// Emit a heartbeat every `interval` until cancelled.
///
/// Each wait starts after the previous heartbeat was sent, so ticks drift
/// with send latency instead of bunching up.
pub async fn run_heartbeat<E: HeartbeatEmitter + ?Sized>(
    emitter: &E,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    debug!(interval_secs = interval.as_secs_f64(), "Heartbeat started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Heartbeat cancelled");
                return HeartbeatResult::Cancelled;
            }
            () = tokio::time::sleep(interval) => {}
        }

        // Cancellation wins over a heartbeat that became due at the same time
        if cancel.is_cancelled() {
            return HeartbeatResult::Cancelled;
        }

        if !emitter.emit().await {
            warn!("Heartbeat stopped: connection no longer open");
            return HeartbeatResult::Stopped;
        }
    }
}
