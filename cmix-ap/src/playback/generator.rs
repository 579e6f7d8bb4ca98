//! Sine-tone queue producer
//!
//! Stands in for a decoder: keeps every audible layer's queue filled with a
//! sine tone up to `lead` ahead of the playback clock. Each layer gets its
//! own frequency (220 Hz times 1 to 4, by position in the timeline) so
//! overlaps are audible.
//!
//! When the lead reaches past the end of the timeline, the start of the next
//! loop iteration is pre-filled under the next loop count, so the wrap plays
//! without a gap.

use crate::audio::types::AudioSpec;
use crate::playback::queue::{AudioQueueEntry, QueueKey, SharedLayerQueues};
use crate::playback::state::PlaybackState;
use crate::playback::timeline::Timeline;
use cmix_common::{CmixEvent, Rational};
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, trace};

const BASE_FREQUENCY_HZ: f64 = 220.0;
const AMPLITUDE: f32 = 0.25;

/// Fills layer queues with generated tones
#[derive(Debug)]
pub struct ToneProducer {
    state: Arc<PlaybackState>,
    queues: SharedLayerQueues,
    lead: Rational,
    chunk_frames: usize,
    /// Next PTS to generate, per queue
    next_pts: HashMap<QueueKey, Rational>,
}

impl ToneProducer {
    pub fn new(
        state: Arc<PlaybackState>,
        queues: SharedLayerQueues,
        lead: Rational,
        chunk_frames: usize,
    ) -> Self {
        Self {
            state,
            queues,
            lead,
            chunk_frames: chunk_frames.max(1),
            next_pts: HashMap::new(),
        }
    }

    /// Forget generation positions; the next `fill` starts from the clock
    pub fn reset(&mut self) {
        self.next_pts.clear();
    }

    /// React to engine events
    pub fn handle_event(&mut self, event: &CmixEvent) {
        match event {
            CmixEvent::Seeked { pts, .. } => {
                debug!("Producer re-priming from {}", pts);
                self.reset();
            }
            CmixEvent::LoopWrapped { loop_count } => {
                self.next_pts.retain(|key, _| key.loop_count >= *loop_count);
                self.queues
                    .with_lock(|queues| queues.remove_loops_before(*loop_count));
            }
            _ => {}
        }
    }

    /// Top up every queue to `lead` ahead of the clock; returns bytes pushed
    pub fn fill(&mut self) -> usize {
        let timeline = self.state.timeline();
        let (Some(start), Some(end)) = (timeline.start(), timeline.end()) else {
            return 0;
        };
        let spec = self.state.audio_spec();
        let clock = self.state.clock();
        let now = clock.current_time(&spec);
        let horizon = now + self.lead;

        let mut entries = Vec::new();
        self.generate(&timeline, &spec, clock.loop_count, now, horizon, &mut entries);
        if horizon > end {
            let overflow = horizon - end;
            self.generate(
                &timeline,
                &spec,
                clock.loop_count + 1,
                start,
                start + overflow,
                &mut entries,
            );
        }

        if entries.is_empty() {
            return 0;
        }
        let bytes: usize = entries.iter().map(|(_, e)| e.len()).sum();
        trace!("Producer pushing {} chunks ({} bytes)", entries.len(), bytes);
        self.queues.with_lock(|queues| {
            for (key, entry) in entries {
                queues.push(key, entry);
            }
        });
        bytes
    }

    fn generate(
        &mut self,
        timeline: &Timeline,
        spec: &AudioSpec,
        loop_count: u64,
        from: Rational,
        until: Rational,
        entries: &mut Vec<(QueueKey, AudioQueueEntry)>,
    ) {
        let frame_bytes = spec.frame_bytes() as u64;
        let mut seen = HashSet::new();
        let layers = timeline.atoms().iter().flat_map(|atom| atom.layers.iter());

        for (index, layer) in layers.enumerate() {
            if layer.to <= from || layer.from >= until {
                continue;
            }
            let key = QueueKey::new(layer.uuid, loop_count);
            if !seen.insert(key) {
                continue;
            }

            let frequency = BASE_FREQUENCY_HZ * (1 + index % 4) as f64;
            let limit = until.min(layer.to);
            let cursor = self.next_pts.entry(key).or_insert(layer.from.max(from));

            while *cursor < limit {
                let frames_left = spec.duration_to_bytes(limit - *cursor) / frame_bytes;
                let frames = (self.chunk_frames as u64).min(frames_left) as usize;
                if frames == 0 {
                    // Less than a frame short of the horizon: resume on the next fill
                    if limit == layer.to {
                        *cursor = layer.to;
                    }
                    break;
                }
                let samples = tone(spec, *cursor, frames, frequency, AMPLITUDE);
                entries.push((key, AudioQueueEntry::from_samples(*cursor, &samples)));
                *cursor += spec.bytes_to_duration(frames as u64 * frame_bytes);
            }
        }
    }
}

/// Interleaved sine samples starting at `pts`
fn tone(spec: &AudioSpec, pts: Rational, frames: usize, frequency: f64, amplitude: f32) -> Vec<f32> {
    let channels = spec.channels() as usize;
    let rate = spec.sample_rate() as f64;
    let start = pts.as_f64();
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = start + i as f64 / rate;
        let value = amplitude * (2.0 * PI * frequency * t).sin() as f32;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    samples
}
