//! Layer mixer
//!
//! Sums every layer audible in the current period into the f32 output
//! buffer. Each layer reads its own queue (`QueueKey(uuid, loop_count)`),
//! scaled by its gain:
//!
//! ```text
//! out[i] = out[i] + gain * in[i]
//! ```
//!
//! No limiting happens here; the master volume stage runs on the summed
//! buffer afterwards.
//!
//! # Sub-period alignment
//!
//! A layer starting after the period start contributes nothing before
//! `duration_to_bytes(layer.from - cur_pts)`. A layer ending inside the
//! period contributes nothing after `duration_to_bytes(layer.to - cur_pts)`.
//! Both offsets are whole frames, so sample boundaries are never split.

use crate::audio::types::{AudioSpec, SAMPLE_BYTES};
use crate::playback::queue::{AudioQueueCursor, LayerQueueStore, QueueKey};
use crate::playback::timeline::{AtomProfile, LayerProfile};
use cmix_common::Rational;
use tracing::debug;

/// Result of mixing one layer into one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillOutcome {
    /// Bytes taken from the layer's queue
    pub bytes_mixed: usize,
    /// The queue ran dry before the region was filled
    pub starved: bool,
}

/// Result of mixing a whole period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MixSummary {
    /// Layers overlapping the period
    pub active_layers: usize,
    /// Active layers whose queues ran dry
    pub starved_layers: usize,
    pub bytes_mixed: usize,
}

/// Mix one layer's queue into the byte region `[start_byte, end_byte)` of `out`
///
/// `out` holds decoded f32 samples, so byte `b` is sample `b / 4`. The
/// region is clamped to the buffer and rounded down to whole samples.
/// Consumption continues from the queue cursor; fully consumed entries are
/// popped, a partially consumed one leaves the cursor at the next unread byte.
pub fn fill_layer<Q: LayerQueueStore + ?Sized>(
    queues: &mut Q,
    out: &mut [f32],
    start_byte: usize,
    end_byte: usize,
    key: &QueueKey,
    gain: f32,
) -> FillOutcome {
    let out_bytes = out.len() * SAMPLE_BYTES;
    let start = align_sample(start_byte.min(out_bytes));
    let end = align_sample(end_byte.min(out_bytes));
    let mut outcome = FillOutcome::default();
    let mut pos = start;

    while pos < end {
        let Some(front) = queues.front(key) else {
            debug!(
                "Queue {} starved: {} of {} bytes left silent",
                key,
                end - pos,
                end - start
            );
            outcome.starved = true;
            break;
        };

        let cursor = queues.cursor(key);
        let offset = if cursor.in_progress {
            cursor.byte_offset.min(front.len())
        } else {
            0
        };
        let remaining = cursor.remaining(front);
        let take = remaining.min(end - pos);

        mix_samples(
            &mut out[pos / SAMPLE_BYTES..(pos + take) / SAMPLE_BYTES],
            &front.data()[offset..offset + take],
            gain,
        );
        pos += take;
        outcome.bytes_mixed += take;

        if take == remaining {
            queues.pop_front(key);
        } else {
            queues.set_cursor(
                key,
                AudioQueueCursor {
                    byte_offset: offset + take,
                    in_progress: true,
                },
            );
        }
    }

    outcome
}

/// Mix every layer of `atom` overlapping `[cur_pts, next_pts]` into `out`
pub fn mix_frame<Q: LayerQueueStore + ?Sized>(
    queues: &mut Q,
    out: &mut [f32],
    atom: &AtomProfile,
    cur_pts: Rational,
    next_pts: Rational,
    loop_count: u64,
    spec: &AudioSpec,
) -> MixSummary {
    let region = out.len() * SAMPLE_BYTES;
    let mut summary = MixSummary::default();

    for layer in atom.layers.iter().filter(|l| l.overlaps(cur_pts, next_pts)) {
        let (start, end) = layer_region(layer, cur_pts, next_pts, region, spec);
        if start >= end {
            continue;
        }
        summary.active_layers += 1;

        let key = QueueKey::new(layer.uuid, loop_count);
        let outcome = fill_layer(queues, out, start, end, &key, layer.gain.max(0.0));
        summary.bytes_mixed += outcome.bytes_mixed;
        if outcome.starved {
            summary.starved_layers += 1;
        }
    }

    summary
}

/// Byte range of the period a layer is audible in
fn layer_region(
    layer: &LayerProfile,
    cur_pts: Rational,
    next_pts: Rational,
    region: usize,
    spec: &AudioSpec,
) -> (usize, usize) {
    let start = to_usize(spec.duration_to_bytes(layer.from - cur_pts)).min(region);
    let end = if layer.to >= next_pts {
        region
    } else {
        to_usize(spec.duration_to_bytes(layer.to - cur_pts)).min(region)
    };
    (start, end)
}

fn to_usize(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

fn align_sample(bytes: usize) -> usize {
    bytes - bytes % SAMPLE_BYTES
}

fn mix_samples(out: &mut [f32], data: &[u8], gain: f32) {
    for (sample, bytes) in out.iter_mut().zip(data.chunks_exact(SAMPLE_BYTES)) {
        *sample += gain * f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
}
