//! Shared playback state
//!
//! Accessed concurrently by control threads and the real-time audio
//! callback. Nothing here blocks:
//!
//! - transport scalars (`play_state`, `volume`, `audio_spec`) are plain atomics;
//! - the clock fields (`current_atom_index`, `start_time`, `bytes_played`,
//!   `loop_count`) are individual atomics published together through a
//!   sequence counter, so `current_time()` never pairs a fresh
//!   `bytes_played = 0` with a stale `start_time`;
//! - the timeline is an immutable snapshot swapped with `ArcSwap`.
//!
//! Invariant: `current_time = start_time + bytes_to_duration(bytes_played)`.

use crate::audio::types::{AtomicAudioSpec, AudioSpec};
use crate::playback::timeline::Timeline;
use arc_swap::{ArcSwap, Guard};
use cmix_common::{PlayState, Rational};
use std::sync::atomic::{fence, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Spins before a waiting clock reader starts yielding its time slice
const SPINS_BEFORE_YIELD: u32 = 64;

/// Consistent view of the playback clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub atom_index: usize,
    /// PTS the clock read when the current atom-run began
    pub start_time: Rational,
    /// Bytes emitted to the device since `start_time`
    pub bytes_played: u64,
    /// Number of wraps from the last atom back to the first
    pub loop_count: u64,
}

impl ClockSnapshot {
    pub fn current_time(&self, spec: &AudioSpec) -> Rational {
        self.start_time + spec.bytes_to_duration(self.bytes_played)
    }
}

impl Default for ClockSnapshot {
    fn default() -> Self {
        Self {
            atom_index: 0,
            start_time: Rational::ZERO,
            bytes_played: 0,
            loop_count: 0,
        }
    }
}

/// Clock fields behind a sequence lock
///
/// Writers take the sequence from even to odd (CAS), store the fields, then
/// release it at the next even value. Readers retry until they observe the
/// same even sequence before and after loading the fields. Write sections
/// are a handful of stores, so readers spin only briefly.
#[derive(Debug)]
struct TimelineClock {
    seq: AtomicU64,
    atom_index: AtomicUsize,
    start_num: AtomicI64,
    start_den: AtomicI64,
    bytes_played: AtomicU64,
    loop_count: AtomicU64,
}

impl TimelineClock {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            atom_index: AtomicUsize::new(0),
            start_num: AtomicI64::new(0),
            start_den: AtomicI64::new(1),
            bytes_played: AtomicU64::new(0),
            loop_count: AtomicU64::new(0),
        }
    }

    fn load_fields(&self) -> ClockSnapshot {
        let num = self.start_num.load(Ordering::Relaxed);
        let den = self.start_den.load(Ordering::Relaxed);
        ClockSnapshot {
            atom_index: self.atom_index.load(Ordering::Relaxed),
            // den is never stored as zero
            start_time: Rational::checked_new(num, den).unwrap_or(Rational::ZERO),
            bytes_played: self.bytes_played.load(Ordering::Relaxed),
            loop_count: self.loop_count.load(Ordering::Relaxed),
        }
    }

    fn read(&self) -> ClockSnapshot {
        let mut spins = 0u32;
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 0 {
                let snapshot = self.load_fields();
                fence(Ordering::Acquire);
                if self.seq.load(Ordering::Relaxed) == before {
                    return snapshot;
                }
            }
            backoff(&mut spins);
        }
    }

    /// Apply `f` to the current values and publish the result as one unit.
    fn update<R>(&self, f: impl FnOnce(&mut ClockSnapshot) -> R) -> R {
        let mut spins = 0u32;
        let seq = loop {
            let current = self.seq.load(Ordering::Relaxed);
            if current & 1 == 0
                && self
                    .seq
                    .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                break current;
            }
            backoff(&mut spins);
        };
        // Releases the sequence even if `f` unwinds; fields are only stored after it returns
        let _release = SeqRelease {
            seq: &self.seq,
            next: seq + 2,
        };
        fence(Ordering::Release);

        let mut clock = self.load_fields();
        let result = f(&mut clock);

        self.atom_index.store(clock.atom_index, Ordering::Relaxed);
        self.start_num.store(clock.start_time.num(), Ordering::Relaxed);
        self.start_den.store(clock.start_time.den(), Ordering::Relaxed);
        self.bytes_played.store(clock.bytes_played, Ordering::Relaxed);
        self.loop_count.store(clock.loop_count, Ordering::Relaxed);
        result
    }
}

struct SeqRelease<'a> {
    seq: &'a AtomicU64,
    next: u64,
}

impl Drop for SeqRelease<'_> {
    fn drop(&mut self) {
        self.seq.store(self.next, Ordering::Release);
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

/// Process-wide playback state for one session
#[derive(Debug)]
pub struct PlaybackState {
    clock: TimelineClock,
    play_state: AtomicU8,
    /// f32 bits
    volume: AtomicU32,
    audio_spec: AtomicAudioSpec,
    timeline: ArcSwap<Timeline>,
}

impl PlaybackState {
    /// New state: stopped, empty timeline, clock at zero
    pub fn new(spec: AudioSpec, volume: f32) -> Self {
        Self {
            clock: TimelineClock::new(),
            play_state: AtomicU8::new(PlayState::Stopped.as_u8()),
            volume: AtomicU32::new(sanitize_volume(volume).to_bits()),
            audio_spec: AtomicAudioSpec::new(spec),
            timeline: ArcSwap::from_pointee(Timeline::default()),
        }
    }

    // === Clock ===

    /// `start_time + bytes_to_duration(bytes_played)`, from one consistent snapshot
    pub fn current_time(&self) -> Rational {
        self.clock.read().current_time(&self.audio_spec())
    }

    pub fn clock(&self) -> ClockSnapshot {
        self.clock.read()
    }

    pub fn current_atom_index(&self) -> usize {
        self.clock.read().atom_index
    }

    pub fn loop_count(&self) -> u64 {
        self.clock.read().loop_count
    }

    pub fn bytes_played(&self) -> u64 {
        self.clock.read().bytes_played
    }

    pub fn start_time(&self) -> Rational {
        self.clock.read().start_time
    }

    /// Count `bytes` as emitted to the device
    pub fn advance_bytes_played(&self, bytes: u64) {
        self.clock
            .update(|clock| clock.bytes_played = clock.bytes_played.saturating_add(bytes));
    }

    /// Run a multi-field clock transition as a single published update
    pub(crate) fn transition<R>(&self, f: impl FnOnce(&mut ClockSnapshot) -> R) -> R {
        self.clock.update(f)
    }

    /// Put the clock at `pts` inside atom `atom_index` (loop count unchanged)
    pub fn seek_clock(&self, atom_index: usize, pts: Rational) {
        self.clock.update(|clock| {
            clock.atom_index = atom_index;
            clock.start_time = pts;
            clock.bytes_played = 0;
        });
    }

    /// Back to atom 0, time 0, loop 0
    pub fn reset_clock(&self) {
        self.clock.update(|clock| *clock = ClockSnapshot::default());
    }

    // === Transport ===

    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.play_state.load(Ordering::Acquire))
    }

    /// Store `state`, returning the previous value
    ///
    /// Using the returned value to decide on side effects keeps repeated
    /// control calls idempotent even when they race.
    pub fn swap_play_state(&self, state: PlayState) -> PlayState {
        PlayState::from_u8(self.play_state.swap(state.as_u8(), Ordering::AcqRel))
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Set master volume; negative and NaN values are clamped to 0
    pub fn set_volume(&self, volume: f32) -> f32 {
        let clamped = sanitize_volume(volume);
        self.volume.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.audio_spec.load()
    }

    /// Change the output spec without moving the clock
    ///
    /// `bytes_played` is measured in the old spec, so it is folded into
    /// `start_time` before the new spec takes effect.
    pub fn set_audio_spec(&self, spec: AudioSpec) {
        self.clock.update(|clock| {
            let old = self.audio_spec.load();
            clock.start_time = clock.current_time(&old);
            clock.bytes_played = 0;
            self.audio_spec.store(spec);
        });
    }

    // === Timeline ===

    /// Lock-free borrow of the current timeline snapshot (audio thread)
    pub fn load_timeline(&self) -> Guard<Arc<Timeline>> {
        self.timeline.load()
    }

    /// Owned handle to the current timeline snapshot
    pub fn timeline(&self) -> Arc<Timeline> {
        self.timeline.load_full()
    }

    /// Publish a new timeline and restart the clock at its beginning
    pub fn publish_timeline(&self, timeline: Timeline) {
        self.timeline.store(Arc::new(timeline));
        self.reset_clock();
    }
}

fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.max(0.0)
    }
}
