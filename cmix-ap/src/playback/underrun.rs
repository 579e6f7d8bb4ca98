//! Queue fill monitor (backpressure)
//!
//! Checked by the audio callback after each period's consumption. When the
//! total queued bytes stay below `threshold_bytes` for `debounce_checks`
//! consecutive checks the monitor flips to "not ready" and emits a single
//! `UnderrunPause` event. It never touches the transport itself: a
//! controller on the event channel decides whether to pause. Recovery above
//! the threshold flips back to "ready" and emits `ReadyToPlay` once.

use cmix_common::{CmixEvent, EventBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Readiness transition reported by one `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderrunTransition {
    /// Entered the not-ready state; a pause request was emitted
    Underrun,
    /// Back at or above the threshold
    Recovered,
}

/// Tracks queue fill level against the minimum playable threshold
#[derive(Debug)]
pub struct UnderrunMonitor {
    threshold_bytes: usize,

    /// Consecutive below-threshold checks required before signalling
    debounce_checks: u32,

    /// Current run of below-threshold checks
    below_count: u32,

    /// Audio-thread copy of the readiness state
    ready: bool,

    /// Readiness mirrored for control threads
    ready_flag: Arc<AtomicBool>,

    events: EventBus,
}

impl UnderrunMonitor {
    /// Create a monitor; a `debounce_checks` of 0 behaves like 1
    pub fn new(threshold_bytes: usize, debounce_checks: u32, events: EventBus) -> Self {
        Self {
            threshold_bytes,
            debounce_checks: debounce_checks.max(1),
            below_count: 0,
            ready: true,
            ready_flag: Arc::new(AtomicBool::new(true)),
            events,
        }
    }

    /// Compare `queued_bytes` against the threshold and signal transitions
    pub fn check(&mut self, queued_bytes: usize) -> Option<UnderrunTransition> {
        if queued_bytes < self.threshold_bytes {
            self.below_count = self.below_count.saturating_add(1);
            if self.ready && self.below_count >= self.debounce_checks {
                self.set_ready(false);
                warn!(
                    "Queue underrun: {} bytes queued, {} required, requesting pause",
                    queued_bytes, self.threshold_bytes
                );
                self.events.emit(CmixEvent::UnderrunPause {
                    queued_bytes: queued_bytes as u64,
                    threshold_bytes: self.threshold_bytes as u64,
                });
                return Some(UnderrunTransition::Underrun);
            }
            return None;
        }

        self.below_count = 0;
        if !self.ready {
            self.set_ready(true);
            info!("Queue recovered: {} bytes queued", queued_bytes);
            self.events.emit(CmixEvent::ReadyToPlay {
                queued_bytes: queued_bytes as u64,
            });
            return Some(UnderrunTransition::Recovered);
        }
        None
    }

    fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
        self.ready_flag.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Shared readiness flag for control threads
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready_flag)
    }

    pub fn debounce_checks(&self) -> u32 {
        self.debounce_checks
    }
}
