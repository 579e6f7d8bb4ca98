//! # CMIX Audio Player Library (cmix-ap)
//!
//! Real-time timeline mixer: turns a timeline of overlapping, gain-adjusted
//! audio layers into a continuous PCM stream for an audio device, while
//! keeping a playback clock other subsystems can read without blocking.
//!
//! **Architecture:** control threads drive `AudioEngine`; the device callback
//! runs `FrameRenderer` (atom selection → layer mixing → master volume →
//! underrun check) against lock-free shared state.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::AudioEngine;
