//! Event types for the CMIX event system
//!
//! Provides the shared event definitions and the `EventBus` used to notify
//! control-side consumers of what happened on the real-time audio thread.

mod playback_types;

pub use playback_types::PlayState;

use crate::rational::Rational;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// CMIX event types
///
/// Events are emitted via `EventBus` and can be serialized for logging or
/// forwarding to a UI process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CmixEvent {
    /// Transport state changed through the engine facade
    PlaybackStateChanged {
        old_state: PlayState,
        new_state: PlayState,
    },

    /// The timeline selector moved to another atom
    AtomChanged {
        atom_index: usize,
        loop_count: u64,
    },

    /// Playback wrapped from the last atom back to the first
    ///
    /// Queue producers must start filling queues keyed with the new loop count.
    LoopWrapped { loop_count: u64 },

    /// Queued audio fell below the playable threshold
    ///
    /// A pause *request*: the real-time thread never pauses itself. The
    /// controller consuming this event decides whether to call `pause()`.
    UnderrunPause {
        queued_bytes: u64,
        threshold_bytes: u64,
    },

    /// Queued audio recovered to at least the playable threshold
    ReadyToPlay { queued_bytes: u64 },

    /// The clock was moved by a seek; producers should re-prime their queues
    Seeked { pts: Rational, atom_index: usize },
}

/// Bounded, non-blocking event channel
///
/// Unlike a broadcast bus, `emit` never waits and never takes a lock that a
/// control thread could hold, so it is safe to call from the audio callback.
/// When the channel is full the event is dropped and counted.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: mpsc::Sender<CmixEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Creates a new bus and the single receiver that drains it
    ///
    /// # Panics
    /// Panics if `capacity` is zero (tokio rejects zero-capacity channels).
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CmixEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emit an event without blocking
    ///
    /// Returns `true` if the event was queued. A full channel drops the event
    /// and increments the dropped counter; a closed channel (no consumer) is
    /// silently ignored.
    pub fn emit(&self, event: CmixEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of events dropped because the channel was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the receiving side is still alive
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
