//! Audio output: sample format, volume stage and device backends

pub mod loopback;
pub mod output;
pub mod types;
pub mod volume;

pub use loopback::{LoopbackHandle, LoopbackOutput, TransportCounts};
pub use output::{list_devices, CpalOutput, OutputStream};
pub use types::{AudioSpec, SampleFormat};
