//! Master volume and corruption guard
//!
//! Runs once per callback on the fully mixed buffer. Besides scaling every
//! sample it measures the RMS of the result; a non-finite RMS means the
//! buffer holds garbage (typically a decoder fault upstream) and the whole
//! buffer is silenced before it can reach the device.

use tracing::error;

/// Scale `buf` by `volume` in place and return the RMS of the scaled buffer.
///
/// If the RMS is NaN or infinite the buffer is zeroed and `f32::NAN` is
/// returned so the caller can count the event. An empty buffer has RMS 0.
pub fn adjust_volume(buf: &mut [f32], volume: f32) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }

    let mut sum_of_squares = 0.0f64;
    for sample in buf.iter_mut() {
        *sample *= volume;
        let s = *sample as f64;
        sum_of_squares += s * s;
    }

    let rms = (sum_of_squares / buf.len() as f64).sqrt() as f32;
    if !rms.is_finite() {
        buf.fill(0.0);
        error!(
            "Corrupted audio buffer (rms={}, {} samples) - output silenced",
            rms,
            buf.len()
        );
        return f32::NAN;
    }

    rms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_buffer_has_zero_rms() {
        let mut buf = vec![0.0f32; 512];
        assert_eq!(adjust_volume(&mut buf, 1.0), 0.0);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_volume_scales_samples_and_rms() {
        let mut buf = vec![0.5f32; 64];
        let rms = adjust_volume(&mut buf, 0.5);
        assert!(buf.iter().all(|&s| (s - 0.25).abs() < 1e-7));
        assert!((rms - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_rms_of_alternating_signal() {
        let mut buf: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let rms = adjust_volume(&mut buf, 1.0);
        assert!((rms - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_sample_silences_whole_buffer() {
        let mut buf = vec![0.3f32; 256];
        buf[17] = f32::NAN;
        let rms = adjust_volume(&mut buf, 1.0);
        assert!(rms.is_nan());
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_infinite_sample_times_zero_volume_is_silenced() {
        // inf * 0.0 = NaN
        let mut buf = vec![0.1f32; 32];
        buf[0] = f32::INFINITY;
        let rms = adjust_volume(&mut buf, 0.0);
        assert!(rms.is_nan());
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_empty_buffer() {
        let mut buf: Vec<f32> = Vec::new();
        assert_eq!(adjust_volume(&mut buf, 1.0), 0.0);
    }
}
