//! Audio engine facade
//!
//! **Responsibilities:**
//! - Owns the output stream exclusively (control side only)
//! - Transport control: play, pause, stop, destroy, seek
//! - Non-blocking clock reads for any thread (`current_time`)
//! - Publishes timelines and exposes the layer queues to producers
//!
//! Every transport call holds the stream mutex for its whole duration, so
//! concurrent callers are serialized and the play-state swap decides which
//! caller performs the side effects. A repeated call is a no-op. The audio
//! callback never touches this mutex.

use crate::audio::output::OutputStream;
use crate::audio::types::AudioSpec;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::driver::{FrameRenderer, RenderStats, RenderStatsSnapshot};
use crate::playback::queue::SharedLayerQueues;
use crate::playback::state::PlaybackState;
use crate::playback::timeline::{Timeline, TimelineSelector};
use crate::playback::underrun::UnderrunMonitor;
use cmix_common::{CmixEvent, EventBus, PlayState, Rational};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Control-thread API over one playback session
pub struct AudioEngine {
    state: Arc<PlaybackState>,
    queues: SharedLayerQueues,
    events: EventBus,

    /// `None` once destroyed
    stream: Mutex<Option<Box<dyn OutputStream>>>,
    stream_name: String,

    stats: Arc<RenderStats>,

    /// Mirrors the underrun monitor's readiness
    ready: Arc<AtomicBool>,
    min_playable_queue_bytes: usize,

    flush_timeout: Duration,
    drain_timeout: Duration,
}

impl AudioEngine {
    /// Create the session state and start `stream` corked and stopped
    pub fn new(
        config: &EngineConfig,
        spec: AudioSpec,
        mut stream: Box<dyn OutputStream>,
        events: EventBus,
    ) -> Result<Self> {
        let state = Arc::new(PlaybackState::new(spec, config.initial_volume));
        let queues = SharedLayerQueues::new();

        let monitor = UnderrunMonitor::new(
            config.min_playable_queue_bytes,
            config.underrun_debounce_checks,
            events.clone(),
        );
        let ready = monitor.ready_flag();
        let renderer = FrameRenderer::new(
            Arc::clone(&state),
            queues.clone(),
            TimelineSelector::new(events.clone()),
            monitor,
        );
        let stats = renderer.stats();

        stream.start(renderer)?;
        if !stream.is_corked() {
            stream.cork()?;
        }
        let stream_name = stream.name().to_string();
        info!("Audio engine ready: {} on '{}'", spec, stream_name);

        Ok(Self {
            state,
            queues,
            events,
            stream: Mutex::new(Some(stream)),
            stream_name,
            stats,
            ready,
            min_playable_queue_bytes: config.min_playable_queue_bytes,
            flush_timeout: config.flush_timeout(),
            drain_timeout: config.drain_timeout(),
        })
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<Box<dyn OutputStream>>> {
        self.stream.lock().unwrap_or_else(|poisoned| {
            warn!("Output stream lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn emit_state_change(&self, old_state: PlayState, new_state: PlayState) {
        info!("Playback state: {} -> {}", old_state, new_state);
        self.events.emit(CmixEvent::PlaybackStateChanged {
            old_state,
            new_state,
        });
    }

    // === Transport ===

    /// Start or resume playback
    pub fn play(&self) -> Result<()> {
        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(Error::EngineDestroyed)?;

        let old = self.state.swap_play_state(PlayState::Playing);
        if old == PlayState::Playing {
            return Ok(());
        }
        if let Err(e) = stream.uncork() {
            error!("Failed to uncork output: {}", e);
        }
        self.emit_state_change(old, PlayState::Playing);
        Ok(())
    }

    /// Pause: cork the stream and discard unplayed device samples
    pub fn pause(&self) -> Result<()> {
        self.halt(PlayState::Paused)
    }

    /// Stop: like pause, but leaves the transport STOPPED
    ///
    /// The clock is not reset; `current_atom_index` and `bytes_played` keep
    /// their values.
    pub fn stop(&self) -> Result<()> {
        self.halt(PlayState::Stopped)
    }

    fn halt(&self, target: PlayState) -> Result<()> {
        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(Error::EngineDestroyed)?;

        let old = self.state.swap_play_state(target);
        if old == target {
            return Ok(());
        }
        if let Err(e) = stream.cork() {
            error!("Failed to cork output: {}", e);
        }
        flush_logged(&mut **stream, self.flush_timeout);
        self.emit_state_change(old, target);
        Ok(())
    }

    /// Stop transport and release the output stream
    ///
    /// If playing, waits (bounded) for rendered audio to play out first.
    /// Safe to call any number of times; also runs on drop.
    pub fn destroy(&self) {
        let Some(mut stream) = self.lock_stream().take() else {
            return;
        };

        let old = self.state.swap_play_state(PlayState::Stopped);
        if old == PlayState::Playing {
            match stream.drain(self.drain_timeout) {
                Ok(()) => debug!("Output drained"),
                Err(e) => warn!("Drain on teardown failed: {}", e),
            }
        }
        if let Err(e) = stream.cork() {
            warn!("Failed to cork output on teardown: {}", e);
        }
        stream.close();

        if old != PlayState::Stopped {
            self.emit_state_change(old, PlayState::Stopped);
        }
        info!("Audio engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock_stream().is_none()
    }

    /// Move the clock to `pts`, clamped to the timeline bounds
    ///
    /// Queued layer data and unplayed device samples are discarded; a
    /// `Seeked` event tells producers where to refill from. Returns the
    /// position actually sought to.
    pub fn seek(&self, pts: Rational) -> Result<Rational> {
        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(Error::EngineDestroyed)?;

        let timeline = self.state.timeline();
        let (Some(start), Some(end)) = (timeline.start(), timeline.end()) else {
            return Err(Error::Timeline("cannot seek in an empty timeline".to_string()));
        };
        let target = pts.max(start).min(end);
        let atom_index = timeline
            .atom_index_at(target)
            .or_else(|| timeline.atoms().iter().position(|a| a.from >= target))
            .unwrap_or(0);

        self.queues.with_lock(|queues| queues.clear());
        self.state.seek_clock(atom_index, target);
        flush_logged(&mut **stream, self.flush_timeout);

        info!("Seeked to {} (atom {})", target, atom_index);
        self.events.emit(CmixEvent::Seeked {
            pts: target,
            atom_index,
        });
        Ok(target)
    }

    // === Clock ===

    /// Current playback position; non-blocking, callable from any thread
    pub fn current_time(&self) -> Rational {
        self.state.current_time()
    }

    pub fn play_state(&self) -> PlayState {
        self.state.play_state()
    }

    pub fn loop_count(&self) -> u64 {
        self.state.loop_count()
    }

    pub fn current_atom_index(&self) -> usize {
        self.state.current_atom_index()
    }

    // === Session data ===

    /// Publish a new timeline; resets the clock to atom 0, time 0, loop 0
    ///
    /// Queues keyed by the old loop numbering are dropped.
    pub fn set_timeline(&self, timeline: Timeline) -> Result<()> {
        let guard = self.lock_stream();
        if guard.is_none() {
            return Err(Error::EngineDestroyed);
        }
        info!(
            "Publishing timeline: {} atoms, {:?} .. {:?}",
            timeline.len(),
            timeline.start(),
            timeline.end()
        );
        self.queues.with_lock(|queues| queues.clear());
        self.state.publish_timeline(timeline);
        Ok(())
    }

    pub fn timeline(&self) -> Arc<Timeline> {
        self.state.timeline()
    }

    /// Set master volume; returns the clamped value
    pub fn set_volume(&self, volume: f32) -> f32 {
        let applied = self.state.set_volume(volume);
        debug!("Volume set to {}", applied);
        applied
    }

    pub fn volume(&self) -> f32 {
        self.state.volume()
    }

    /// Change the audio format the clock converts bytes with
    ///
    /// The device is not renegotiated; the caller is responsible for
    /// matching it.
    pub fn set_audio_spec(&self, spec: AudioSpec) {
        self.state.set_audio_spec(spec);
        info!("Audio spec set to {}", spec);
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.state.audio_spec()
    }

    /// Producer handle to the per-layer queues
    pub fn queues(&self) -> SharedLayerQueues {
        self.queues.clone()
    }

    pub fn state(&self) -> Arc<PlaybackState> {
        Arc::clone(&self.state)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // === Diagnostics ===

    pub fn stats(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            events_dropped: self.events.dropped_count(),
            ..self.stats.snapshot()
        }
    }

    /// Readiness as last reported by the underrun monitor
    pub fn is_ready_to_play(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether the queues currently hold at least the playable minimum
    ///
    /// Takes the queue lock; for control threads only.
    pub fn has_playable_queue(&self) -> bool {
        self.queues.total_queued_bytes() >= self.min_playable_queue_bytes
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn flush_logged(stream: &mut dyn OutputStream, timeout: Duration) {
    match stream.flush(timeout) {
        Ok(()) => {}
        Err(e @ Error::Timeout(_)) => warn!("Flush incomplete: {}", e),
        Err(e) => error!("Failed to flush output: {}", e),
    }
}
