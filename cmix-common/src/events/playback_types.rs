//! Playback-related type definitions
//!
//! Transport state shared by the engine, its event stream and any UI.

use serde::{Deserialize, Serialize};

/// Transport state enumeration
///
/// Stored in an `AtomicU8` by the engine, hence the explicit discriminants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlayState {
    Stopped = 0,
    Paused = 1,
    Playing = 2,
}

impl PlayState {
    /// Decode from the atomic representation.
    ///
    /// Unknown values map to `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Paused,
            2 => PlayState::Playing,
            _ => PlayState::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for PlayState {
    fn default() -> Self {
        PlayState::Stopped
    }
}

impl std::fmt::Display for PlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayState::Stopped => write!(f, "stopped"),
            PlayState::Paused => write!(f, "paused"),
            PlayState::Playing => write!(f, "playing"),
        }
    }
}
