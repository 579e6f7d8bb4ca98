//! Real-time render context
//!
//! `FrameRenderer` is what an output backend calls from its audio callback.
//! Every call produces exactly the requested amount of output and advances
//! the playback clock by the same amount. Per period:
//!
//! 1. `TimelineSelector` picks the atom (and applies any boundary transition)
//! 2. `mix_frame` sums the overlapping layers
//! 3. `UnderrunMonitor` checks the remaining queue fill
//! 4. `adjust_volume` applies master volume and the corruption guard
//! 5. `bytes_played` advances
//!
//! Nothing here blocks or returns errors. Failure paths render silence and
//! are counted in `RenderStats`.

use crate::audio::types::SAMPLE_BYTES;
use crate::audio::volume::adjust_volume;
use crate::playback::mixer::mix_frame;
use crate::playback::queue::{LayerQueueStore, SharedLayerQueues};
use crate::playback::state::PlaybackState;
use crate::playback::timeline::TimelineSelector;
use crate::playback::underrun::UnderrunMonitor;
use cmix_common::PlayState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Lock-free counters updated by the audio callback
#[derive(Debug, Default)]
pub struct RenderStats {
    callbacks: AtomicU64,
    silent_periods: AtomicU64,
    starved_periods: AtomicU64,
    lock_contention: AtomicU64,
    corrupted_buffers: AtomicU64,
    bytes_rendered: AtomicU64,
}

/// Point-in-time copy of `RenderStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RenderStatsSnapshot {
    pub callbacks: u64,
    /// Periods rendered as silence (not playing, empty timeline, no layers)
    pub silent_periods: u64,
    /// Periods where at least one layer queue ran dry
    pub starved_periods: u64,
    /// Periods skipped because a producer held the queue lock
    pub lock_contention: u64,
    /// Buffers silenced by the corruption guard
    pub corrupted_buffers: u64,
    pub bytes_rendered: u64,
    /// Events lost to a full event channel; filled in by `AudioEngine::stats`
    pub events_dropped: u64,
}

impl RenderStats {
    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            silent_periods: self.silent_periods.load(Ordering::Relaxed),
            starved_periods: self.starved_periods.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            corrupted_buffers: self.corrupted_buffers.load(Ordering::Relaxed),
            bytes_rendered: self.bytes_rendered.load(Ordering::Relaxed),
            events_dropped: 0,
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Callback context owned by the output backend
///
/// Holds shared handles only; it never owns the engine.
#[derive(Debug)]
pub struct FrameRenderer {
    state: Arc<PlaybackState>,
    queues: SharedLayerQueues,
    selector: TimelineSelector,
    monitor: UnderrunMonitor,
    stats: Arc<RenderStats>,
    /// Reused f32 buffer for byte-oriented output
    scratch: Vec<f32>,
}

impl FrameRenderer {
    pub fn new(
        state: Arc<PlaybackState>,
        queues: SharedLayerQueues,
        selector: TimelineSelector,
        monitor: UnderrunMonitor,
    ) -> Self {
        Self {
            state,
            queues,
            selector,
            monitor,
            stats: Arc::new(RenderStats::default()),
            scratch: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> &Arc<PlaybackState> {
        &self.state
    }

    /// Pre-size the byte-path scratch buffer so `render` does not allocate
    pub fn reserve_period(&mut self, samples: usize) {
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0.0);
        }
    }

    /// Fill `out` with the next period as little-endian f32 bytes
    ///
    /// `out.len()` is the requested byte count. Trailing bytes that do not
    /// form a whole sample are written as zero.
    pub fn render(&mut self, out: &mut [u8]) {
        let samples = out.len() / SAMPLE_BYTES;
        self.reserve_period(samples);

        let mut scratch = std::mem::take(&mut self.scratch);
        self.render_samples(&mut scratch[..samples]);
        for (bytes, sample) in out.chunks_exact_mut(SAMPLE_BYTES).zip(&scratch[..samples]) {
            bytes.copy_from_slice(&sample.to_le_bytes());
        }
        self.scratch = scratch;

        out[samples * SAMPLE_BYTES..].fill(0);
    }

    /// Fill `out` with the next period of interleaved f32 samples
    pub fn render_samples(&mut self, out: &mut [f32]) {
        RenderStats::incr(&self.stats.callbacks);
        out.fill(0.0);
        let requested = (out.len() * SAMPLE_BYTES) as u64;

        if self.state.play_state() == PlayState::Playing {
            self.mix_period(out, requested);
        } else {
            RenderStats::incr(&self.stats.silent_periods);
        }

        self.state.advance_bytes_played(requested);
        self.stats
            .bytes_rendered
            .fetch_add(requested, Ordering::Relaxed);
    }

    fn mix_period(&mut self, out: &mut [f32], requested: u64) {
        let timeline = self.state.load_timeline();
        let atom = match self
            .selector
            .select_current_atom(&self.state, &timeline, requested)
        {
            Some(atom) if atom.has_layers() => atom,
            _ => {
                RenderStats::incr(&self.stats.silent_periods);
                return;
            }
        };

        // Read after selection so a wrap is already reflected
        let spec = self.state.audio_spec();
        let clock = self.state.clock();
        let cur_pts = clock.current_time(&spec);
        let next_pts = cur_pts + spec.bytes_to_duration(requested);

        let mixed = self.queues.try_with(|queues| {
            let summary = mix_frame(queues, out, atom, cur_pts, next_pts, clock.loop_count, &spec);
            (summary, queues.total_queued_bytes())
        });

        match mixed {
            Some((summary, queued_bytes)) => {
                trace!(
                    "Mixed {} layer(s), {} bytes at {}",
                    summary.active_layers,
                    summary.bytes_mixed,
                    cur_pts
                );
                if summary.starved_layers > 0 {
                    RenderStats::incr(&self.stats.starved_periods);
                }
                self.monitor.check(queued_bytes);
            }
            None => {
                debug!("Queue lock busy, rendering silence at {}", cur_pts);
                RenderStats::incr(&self.stats.lock_contention);
            }
        }

        let rms = adjust_volume(out, self.state.volume());
        if rms.is_nan() {
            RenderStats::incr(&self.stats.corrupted_buffers);
        }
    }
}
