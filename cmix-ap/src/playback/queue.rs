//! Per-layer PCM queues
//!
//! The decoder side pushes `AudioQueueEntry` chunks keyed by
//! `QueueKey(layer, loop_count)`; the mixer consumes them front to back,
//! tracking partial consumption of the front entry with an
//! `AudioQueueCursor`.
//!
//! **Locking:** `SharedLayerQueues` wraps the store in a `std::sync::Mutex`.
//! Producers lock normally. The audio callback only ever uses `try_with`,
//! which never waits: if a producer holds the lock the callback renders
//! silence for that period instead.

use crate::audio::types::{AudioSpec, SAMPLE_BYTES};
use crate::error::{Error, Result};
use cmix_common::Rational;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::warn;
use uuid::Uuid;

/// Queue identity for one layer during one loop iteration
///
/// Each pass over a looping timeline reads a distinct queue, so data
/// decoded for the previous pass is never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub layer: Uuid,
    pub loop_count: u64,
}

impl QueueKey {
    pub fn new(layer: Uuid, loop_count: u64) -> Self {
        Self { layer, loop_count }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.layer, self.loop_count)
    }
}

/// One decoded chunk: interleaved little-endian f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioQueueEntry {
    /// PTS of the first sample
    pub pts: Rational,
    data: Vec<u8>,
}

impl AudioQueueEntry {
    /// Wrap raw sample bytes; the length must be a whole number of `spec` frames
    ///
    /// A partial frame would shift the channel order of every later entry in
    /// the same queue.
    pub fn new(pts: Rational, data: Vec<u8>, spec: &AudioSpec) -> Result<Self> {
        let frame_bytes = spec.frame_bytes();
        if data.len() % frame_bytes != 0 {
            return Err(Error::Misaligned(format!(
                "queue entry of {} bytes is not a whole number of {}-byte frames",
                data.len(),
                frame_bytes
            )));
        }
        Ok(Self { pts, data })
    }

    /// Encode f32 samples as a queue entry
    ///
    /// `samples` are interleaved and must hold whole frames; unlike `new`
    /// this is not checked.
    pub fn from_samples(pts: Rational, samples: &[f32]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * SAMPLE_BYTES);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { pts, data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Consumption state of a queue's front entry
///
/// While `in_progress`, `byte_offset < front.len()`. Reset to the default
/// whenever the front entry is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioQueueCursor {
    pub byte_offset: usize,
    pub in_progress: bool,
}

impl AudioQueueCursor {
    /// Bytes of `entry` not yet consumed
    pub fn remaining(&self, entry: &AudioQueueEntry) -> usize {
        if self.in_progress {
            entry.len().saturating_sub(self.byte_offset)
        } else {
            entry.len()
        }
    }
}

/// Read/consume side of the per-layer queues, as used by the mixer
pub trait LayerQueueStore {
    fn is_empty(&self, key: &QueueKey) -> bool;

    fn front(&self, key: &QueueKey) -> Option<&AudioQueueEntry>;

    /// Pop the front entry, reset the cursor, return the remaining entry count
    fn pop_front(&mut self, key: &QueueKey) -> usize;

    fn cursor(&self, key: &QueueKey) -> AudioQueueCursor;

    fn set_cursor(&mut self, key: &QueueKey, cursor: AudioQueueCursor);

    /// Unconsumed bytes across every queue
    fn total_queued_bytes(&self) -> usize;
}

#[derive(Debug, Default)]
struct LayerQueue {
    entries: VecDeque<AudioQueueEntry>,
    cursor: AudioQueueCursor,
    /// Sum of `entries[..].len()`
    bytes: usize,
}

/// In-memory `LayerQueueStore`
#[derive(Debug, Default)]
pub struct LayerQueues {
    queues: HashMap<QueueKey, LayerQueue>,
}

impl LayerQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to the back of `key`'s queue
    pub fn push(&mut self, key: QueueKey, entry: AudioQueueEntry) {
        if entry.is_empty() {
            return;
        }
        let queue = self.queues.entry(key).or_default();
        queue.bytes += entry.len();
        queue.entries.push_back(entry);
    }

    /// Unconsumed bytes in one queue
    pub fn queued_bytes(&self, key: &QueueKey) -> usize {
        self.queues.get(key).map_or(0, queued_bytes)
    }

    /// Drop every queue
    pub fn clear(&mut self) {
        self.queues.clear();
    }

    /// Drop every queue belonging to loop iteration `loop_count`
    pub fn remove_loop(&mut self, loop_count: u64) {
        self.queues.retain(|key, _| key.loop_count != loop_count);
    }

    /// Drop queues of loop iterations that have already played
    pub fn remove_loops_before(&mut self, loop_count: u64) {
        self.queues.retain(|key, _| key.loop_count >= loop_count);
    }
}

fn queued_bytes(queue: &LayerQueue) -> usize {
    let consumed = if queue.cursor.in_progress {
        queue.cursor.byte_offset
    } else {
        0
    };
    queue.bytes.saturating_sub(consumed)
}

impl LayerQueueStore for LayerQueues {
    fn is_empty(&self, key: &QueueKey) -> bool {
        self.queues.get(key).map_or(true, |q| q.entries.is_empty())
    }

    fn front(&self, key: &QueueKey) -> Option<&AudioQueueEntry> {
        self.queues.get(key).and_then(|q| q.entries.front())
    }

    fn pop_front(&mut self, key: &QueueKey) -> usize {
        let Some(queue) = self.queues.get_mut(key) else {
            return 0;
        };
        if let Some(entry) = queue.entries.pop_front() {
            queue.bytes -= entry.len();
        }
        queue.cursor = AudioQueueCursor::default();
        queue.entries.len()
    }

    fn cursor(&self, key: &QueueKey) -> AudioQueueCursor {
        self.queues.get(key).map(|q| q.cursor).unwrap_or_default()
    }

    fn set_cursor(&mut self, key: &QueueKey, cursor: AudioQueueCursor) {
        if let Some(queue) = self.queues.get_mut(key) {
            queue.cursor = cursor;
        }
    }

    fn total_queued_bytes(&self) -> usize {
        self.queues.values().map(queued_bytes).sum()
    }
}

/// Thread-safe handle to the queues shared by producers and the audio callback
#[derive(Debug, Clone, Default)]
pub struct SharedLayerQueues {
    inner: Arc<Mutex<LayerQueues>>,
}

impl SharedLayerQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer-side push (blocking lock)
    pub fn push(&self, key: QueueKey, entry: AudioQueueEntry) {
        self.with_lock(|queues| queues.push(key, entry));
    }

    /// Run `f` with the queues locked, waiting for the lock if needed
    ///
    /// Never call this from the audio callback.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut LayerQueues) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Layer queue lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }

    /// Run `f` only if the lock is free right now
    ///
    /// Returns `None` without waiting when another thread holds the lock.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut LayerQueues) -> R) -> Option<R> {
        match self.inner.try_lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => Some(f(&mut poisoned.into_inner())),
        }
    }

    pub fn total_queued_bytes(&self) -> usize {
        self.with_lock(|queues| queues.total_queued_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;

    fn key() -> QueueKey {
        QueueKey::new(Uuid::new_v4(), 0)
    }

    fn mono() -> AudioSpec {
        AudioSpec::new(SampleFormat::F32Le, 1000, 1).unwrap()
    }

    fn entry(bytes: usize) -> AudioQueueEntry {
        AudioQueueEntry::new(Rational::ZERO, vec![0u8; bytes], &mono()).unwrap()
    }

    #[test]
    fn test_misaligned_entry_rejected() {
        let result = AudioQueueEntry::new(Rational::ZERO, vec![0u8; 6], &mono());
        assert!(matches!(result, Err(Error::Misaligned(_))));
    }

    #[test]
    fn test_partial_stereo_frame_rejected() {
        let stereo = AudioSpec::new(SampleFormat::F32Le, 48_000, 2).unwrap();
        // Three samples: one and a half frames
        let result = AudioQueueEntry::new(Rational::ZERO, vec![0u8; 12], &stereo);
        assert!(matches!(result, Err(Error::Misaligned(_))));
        assert!(AudioQueueEntry::new(Rational::ZERO, vec![0u8; 16], &stereo).is_ok());
    }

    #[test]
    fn test_from_samples_encodes_little_endian() {
        let entry = AudioQueueEntry::from_samples(Rational::ZERO, &[1.0, -0.5]);
        assert_eq!(entry.len(), 8);
        assert_eq!(&entry.data()[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&entry.data()[4..8], &(-0.5f32).to_le_bytes());
    }

    #[test]
    fn test_push_pop_fifo() {
        let mut queues = LayerQueues::new();
        let k = key();
        assert!(queues.is_empty(&k));

        queues.push(k, AudioQueueEntry::new(Rational::ZERO, vec![1u8; 8], &mono()).unwrap());
        queues.push(k, AudioQueueEntry::new(Rational::ONE, vec![2u8; 4], &mono()).unwrap());
        assert_eq!(queues.front(&k).unwrap().pts, Rational::ZERO);
        assert_eq!(queues.total_queued_bytes(), 12);

        assert_eq!(queues.pop_front(&k), 1);
        assert_eq!(queues.front(&k).unwrap().pts, Rational::ONE);
        assert_eq!(queues.pop_front(&k), 0);
        assert!(queues.is_empty(&k));
    }

    #[test]
    fn test_cursor_reduces_queued_bytes_and_resets_on_pop() {
        let mut queues = LayerQueues::new();
        let k = key();
        queues.push(k, entry(16));
        queues.set_cursor(
            &k,
            AudioQueueCursor {
                byte_offset: 12,
                in_progress: true,
            },
        );
        assert_eq!(queues.queued_bytes(&k), 4);
        assert_eq!(queues.cursor(&k).remaining(queues.front(&k).unwrap()), 4);

        queues.pop_front(&k);
        assert_eq!(queues.cursor(&k), AudioQueueCursor::default());
        assert_eq!(queues.total_queued_bytes(), 0);
    }

    #[test]
    fn test_loop_keys_are_distinct() {
        let mut queues = LayerQueues::new();
        let layer = Uuid::new_v4();
        queues.push(QueueKey::new(layer, 0), entry(8));
        queues.push(QueueKey::new(layer, 1), entry(4));

        assert_eq!(queues.queued_bytes(&QueueKey::new(layer, 1)), 4);
        queues.remove_loop(0);
        assert!(queues.is_empty(&QueueKey::new(layer, 0)));
        assert!(!queues.is_empty(&QueueKey::new(layer, 1)));

        queues.remove_loops_before(2);
        assert_eq!(queues.total_queued_bytes(), 0);
    }

    #[test]
    fn test_empty_entries_are_not_queued() {
        let mut queues = LayerQueues::new();
        let k = key();
        queues.push(k, entry(0));
        assert!(queues.is_empty(&k));
    }

    #[test]
    fn test_try_with_does_not_wait_for_held_lock() {
        let shared = SharedLayerQueues::new();
        let k = key();
        shared.push(k, entry(8));

        let result = shared.with_lock(|_held| shared.try_with(|q| q.total_queued_bytes()));
        assert_eq!(result, None);
        assert_eq!(shared.try_with(|q| q.total_queued_bytes()), Some(8));
    }
}
