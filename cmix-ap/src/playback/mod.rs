//! Timeline playback: shared state, atom selection, mixing and transport

pub mod driver;
pub mod engine;
pub mod generator;
pub mod mixer;
pub mod queue;
pub mod state;
pub mod timeline;
pub mod underrun;

pub use driver::{FrameRenderer, RenderStats, RenderStatsSnapshot};
pub use engine::AudioEngine;
pub use generator::ToneProducer;
pub use queue::{
    AudioQueueCursor, AudioQueueEntry, LayerQueueStore, LayerQueues, QueueKey, SharedLayerQueues,
};
pub use state::{ClockSnapshot, PlaybackState};
pub use timeline::{AtomProfile, LayerProfile, Timeline, TimelineSelector};
pub use underrun::{UnderrunMonitor, UnderrunTransition};
