//! EventSink implementations.

use std::sync::Mutex;

use crate::domain::GuardEvent;
use crate::ports::EventSink;

/// Logs every event through `tracing` with structured fields.
///
/// Routine transitions go to `debug`, ownership problems and reclaims to
/// `warn`/`info` so they stand out in production logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &GuardEvent) {
        let key = event.key().to_string();
        match event {
            GuardEvent::Acquired { run_id, policy, .. } => {
                tracing::debug!(%key, %run_id, %policy, "lock acquired");
            }
            GuardEvent::Rejected { reason, .. } => {
                tracing::debug!(%key, %reason, "acquisition rejected");
            }
            GuardEvent::TakenOver {
                previous_run_id,
                previous_status,
                run_id,
                ..
            } => {
                tracing::info!(%key, %previous_run_id, %previous_status, %run_id, "abandoned lock taken over");
            }
            GuardEvent::Renewed { run_id, .. } => {
                tracing::trace!(%key, %run_id, "lock renewed");
            }
            GuardEvent::Released { run_id, status, .. } => {
                tracing::debug!(%key, %run_id, %status, "lock released");
            }
            GuardEvent::LockLost { run_id, .. } => {
                tracing::warn!(%key, %run_id, "lock lost");
            }
            GuardEvent::Reclaimed {
                run_id, idle_secs, ..
            } => {
                tracing::info!(%key, %run_id, idle_secs, "stale lock reclaimed as FAILED");
            }
            GuardEvent::Purged { run_id, status, .. } => {
                tracing::info!(%key, %run_id, %status, "leftover lock record purged");
            }
            GuardEvent::StatusWriteFailed {
                run_id,
                status,
                error,
                ..
            } => {
                tracing::warn!(%key, %run_id, %status, %error, "terminal status write failed");
            }
        }
    }
}

/// Keeps events in memory (テスト・デモ用).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<GuardEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of the recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(GuardEvent::name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &GuardEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
