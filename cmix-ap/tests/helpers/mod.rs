//! Test helpers for cmix-ap integration tests
//!
//! Provides reusable test infrastructure components:
//! - `TestEngine`: an `AudioEngine` on a loopback output with its event receiver
//! - Timeline and queue builders on a 1 kHz mono spec (4000 bytes per second),
//!   so byte counts in tests stay readable
//! - Output decoding and event collection

#![allow(dead_code)]

use cmix_ap::audio::{AudioSpec, LoopbackHandle, LoopbackOutput, SampleFormat};
use cmix_ap::config::EngineConfig;
use cmix_ap::playback::{
    AtomProfile, AudioQueueEntry, LayerProfile, QueueKey, SharedLayerQueues, Timeline,
};
use cmix_ap::AudioEngine;
use cmix_common::{CmixEvent, EventBus, Rational};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

/// Bytes per second of `test_spec()`
pub const BYTES_PER_SEC: u64 = 4000;

/// 1 kHz mono f32
pub fn test_spec() -> AudioSpec {
    AudioSpec::new(SampleFormat::F32Le, 1000, 1).unwrap()
}

pub fn secs(value: i64) -> Rational {
    Rational::from_integer(value)
}

pub fn millis(value: i64) -> Rational {
    Rational::from_millis(value)
}

/// Bytes of `test_spec()` audio lasting `duration`
pub fn bytes_for(duration: Rational) -> u64 {
    test_spec().duration_to_bytes(duration)
}

/// Layer with a fresh UUID
pub fn layer(from: Rational, to: Rational, gain: f32) -> LayerProfile {
    LayerProfile::new(Uuid::new_v4(), from, to, gain)
}

/// Contiguous atoms with the given boundaries and no layers
pub fn empty_atoms(bounds: &[i64]) -> Timeline {
    let atoms = bounds
        .windows(2)
        .map(|w| AtomProfile::new(secs(w[0]), secs(w[1]), vec![]))
        .collect();
    Timeline::new(atoms).unwrap()
}

/// Single atom `[from, to)` holding `layers`
pub fn single_atom(from: Rational, to: Rational, layers: Vec<LayerProfile>) -> Timeline {
    Timeline::new(vec![AtomProfile::new(from, to, layers)]).unwrap()
}

/// Queue `samples` constant samples of `value` for `layer` in loop `loop_count`
pub fn queue_constant(
    queues: &SharedLayerQueues,
    layer: &LayerProfile,
    loop_count: u64,
    samples: usize,
    value: f32,
) {
    queues.push(
        QueueKey::new(layer.uuid, loop_count),
        AudioQueueEntry::from_samples(layer.from, &vec![value; samples]),
    );
}

/// Decode little-endian f32 output bytes
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Everything currently waiting on the event channel
pub fn drain_events(rx: &mut Receiver<CmixEvent>) -> Vec<CmixEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Engine on a manually pulled loopback output
pub struct TestEngine {
    pub engine: AudioEngine,
    pub output: LoopbackHandle,
    pub events: Receiver<CmixEvent>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let (bus, events) = EventBus::new(256);
        let (output, handle) = LoopbackOutput::new();
        let engine = AudioEngine::new(&config, test_spec(), Box::new(output), bus).unwrap();
        Self {
            engine,
            output: handle,
            events,
        }
    }

    /// Publish `timeline` and discard any events emitted so far
    pub fn with_timeline(self, timeline: Timeline) -> Self {
        self.engine.set_timeline(timeline).unwrap();
        self
    }

    /// Pull one callback of `bytes` and decode it
    pub fn pull(&self, bytes: usize) -> Option<Vec<f32>> {
        self.output.pull(bytes).map(|out| decode(&out))
    }

    pub fn events(&mut self) -> Vec<CmixEvent> {
        drain_events(&mut self.events)
    }
}

/// Engine settings for tests: no underrun threshold, short timeouts
pub fn test_config() -> EngineConfig {
    EngineConfig {
        min_playable_queue_bytes: 0,
        flush_timeout_ms: 20,
        drain_timeout_ms: 20,
        ..EngineConfig::default()
    }
}
