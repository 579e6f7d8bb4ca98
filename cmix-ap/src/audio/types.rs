//! Core audio data types
//!
//! Defines the output stream format and the byte/time conversions the clock
//! and the mixer depend on.
//!
//! **Format:**
//! - Samples are little-endian f32 (-1.0 to 1.0 nominal)
//! - Channels interleaved: [L, R, L, R, ...]
//! - All byte offsets are whole frames, so a sample is never split

use crate::error::{Error, Result};
use cmix_common::Rational;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Size of one f32 sample in bytes
pub const SAMPLE_BYTES: usize = 4;

/// PCM sample encoding of the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SampleFormat {
    /// 32-bit IEEE float, little-endian
    F32Le = 1,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32Le => SAMPLE_BYTES,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SampleFormat::F32Le),
            _ => None,
        }
    }
}

/// Output stream specification: format, rate and channel count
///
/// Rate and channel count are always non-zero; construct through `new` or
/// deserialization, both of which validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AudioSpecFields")]
pub struct AudioSpec {
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
}

/// Unvalidated wire form of `AudioSpec`
#[derive(Deserialize)]
struct AudioSpecFields {
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl TryFrom<AudioSpecFields> for AudioSpec {
    type Error = Error;

    fn try_from(fields: AudioSpecFields) -> Result<Self> {
        AudioSpec::new(fields.format, fields.sample_rate, fields.channels)
    }
}

impl AudioSpec {
    /// Create a validated spec (non-zero rate and channel count)
    pub fn new(format: SampleFormat, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Config("sample_rate must be greater than zero".to_string()));
        }
        if channels == 0 {
            return Err(Error::Config("channels must be greater than zero".to_string()));
        }
        Ok(Self {
            format,
            sample_rate,
            channels,
        })
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes in one frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.frame_bytes() as u64
    }

    /// Exact duration of `bytes` of audio in this format
    pub fn bytes_to_duration(&self, bytes: u64) -> Rational {
        Rational::new(
            i64::try_from(bytes).unwrap_or(i64::MAX),
            self.bytes_per_second() as i64,
        )
    }

    /// Byte count for `duration`, floored to a whole frame
    ///
    /// Negative durations map to zero.
    pub fn duration_to_bytes(&self, duration: Rational) -> u64 {
        if duration.is_negative() {
            return 0;
        }
        let bytes = duration.floor_mul(self.bytes_per_second() as i64).max(0) as u64;
        self.align_down(bytes)
    }

    /// Round a byte count down to a whole frame
    pub fn align_down(&self, bytes: u64) -> u64 {
        let frame = self.frame_bytes() as u64;
        bytes - bytes % frame
    }

    fn pack(&self) -> u64 {
        (self.format as u64) << 48 | (self.channels as u64) << 32 | self.sample_rate as u64
    }

    fn unpack(bits: u64) -> Option<Self> {
        let format = SampleFormat::from_u8((bits >> 48) as u8)?;
        Self::new(format, bits as u32, (bits >> 32) as u16).ok()
    }
}

impl Default for AudioSpec {
    /// 44.1kHz stereo f32
    fn default() -> Self {
        Self {
            format: SampleFormat::F32Le,
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl std::fmt::Display for AudioSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}Hz {}ch",
            self.format, self.sample_rate, self.channels
        )
    }
}

/// `AudioSpec` packed into a single `AtomicU64`
///
/// Readers on the audio thread always see a complete spec, never a rate from
/// one update paired with a channel count from another.
#[derive(Debug)]
pub struct AtomicAudioSpec {
    bits: AtomicU64,
}

impl AtomicAudioSpec {
    pub fn new(spec: AudioSpec) -> Self {
        Self {
            bits: AtomicU64::new(spec.pack()),
        }
    }

    pub fn load(&self) -> AudioSpec {
        AudioSpec::unpack(self.bits.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn store(&self, spec: AudioSpec) {
        self.bits.store(spec.pack(), Ordering::Release);
    }
}
