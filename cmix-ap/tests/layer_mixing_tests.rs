//! Integration tests for layer mixing
//!
//! These tests verify that the mixer correctly handles:
//! - Additive mixing of overlapping layers with per-layer gain
//! - Layers starting inside a period (sub-buffer alignment)
//! - Partial consumption of queue entries across periods
//! - Loop-keyed queues

mod helpers;

use cmix_ap::playback::mixer::{fill_layer, mix_frame};
use cmix_ap::playback::{
    AtomProfile, AudioQueueEntry, LayerQueueStore, LayerQueues, QueueKey,
};
use cmix_common::Rational;
use helpers::*;

const EPSILON: f32 = 1e-6;

fn assert_samples_eq(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "Sample count mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < EPSILON, "sample {}: got {}, expected {}", i, a, e);
    }
}

#[test]
fn test_overlapping_layers_mix_additively() {
    // Layer 1 covers the whole period, layer 2 starts 2 ms (8 bytes) in
    let l1 = layer(secs(0), secs(1), 0.5);
    let l2 = layer(millis(2), secs(1), 0.25);
    let atom = AtomProfile::new(secs(0), secs(1), vec![l1.clone(), l2.clone()]);

    let s1: Vec<f32> = (0..8).map(|i| 0.1 * (i + 1) as f32).collect();
    let s2: Vec<f32> = (0..6).map(|i| -0.05 * (i + 1) as f32).collect();

    let mut queues = LayerQueues::new();
    queues.push(QueueKey::new(l1.uuid, 0), AudioQueueEntry::from_samples(l1.from, &s1));
    queues.push(QueueKey::new(l2.uuid, 0), AudioQueueEntry::from_samples(l2.from, &s2));

    let mut out = vec![0.0f32; 8];
    let summary = mix_frame(
        &mut queues,
        &mut out,
        &atom,
        Rational::ZERO,
        millis(8),
        0,
        &test_spec(),
    );

    let expected: Vec<f32> = (0..8)
        .map(|i| {
            let second = if i >= 2 { 0.25 * s2[i - 2] } else { 0.0 };
            0.5 * s1[i] + second
        })
        .collect();
    assert_samples_eq(&out, &expected);

    assert_eq!(summary.active_layers, 2);
    assert_eq!(summary.starved_layers, 0);
    assert_eq!(summary.bytes_mixed, 32 + 24);
    assert_eq!(queues.total_queued_bytes(), 0, "Both queues fully consumed");
}

#[test]
fn test_layer_starting_mid_period_leaves_prefix_silent() {
    let late = layer(millis(2), secs(1), 1.0);
    let atom = AtomProfile::new(secs(0), secs(1), vec![late.clone()]);
    let mut queues = LayerQueues::new();
    queues.push(
        QueueKey::new(late.uuid, 0),
        AudioQueueEntry::from_samples(late.from, &[1.0; 16]),
    );

    let mut out = vec![0.0f32; 4];
    mix_frame(&mut queues, &mut out, &atom, Rational::ZERO, millis(4), 0, &test_spec());

    assert_samples_eq(&out, &[0.0, 0.0, 1.0, 1.0]);
    assert_eq!(
        queues.queued_bytes(&QueueKey::new(late.uuid, 0)),
        (16 - 2) * 4,
        "Only the audible part is consumed"
    );
}

#[test]
fn test_partial_consumption_across_periods() {
    // One 10-sample entry consumed 3 samples at a time
    let key = QueueKey::new(uuid::Uuid::new_v4(), 0);
    let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
    let mut queues = LayerQueues::new();
    queues.push(key, AudioQueueEntry::from_samples(Rational::ZERO, &samples));

    let mut delivered = Vec::new();
    for period in 0..3 {
        let mut out = vec![0.0f32; 3];
        let outcome = fill_layer(&mut queues, &mut out, 0, 12, &key, 1.0);
        assert_eq!(outcome.bytes_mixed, 12, "period {}", period);
        assert!(!outcome.starved, "period {}", period);

        let cursor = queues.cursor(&key);
        assert!(cursor.in_progress);
        assert_eq!(cursor.byte_offset, 12 * (period + 1));
        delivered.extend(out);
    }

    // Last sample, then the queue runs dry
    let mut out = vec![0.0f32; 3];
    let outcome = fill_layer(&mut queues, &mut out, 0, 12, &key, 1.0);
    assert_eq!(outcome.bytes_mixed, 4);
    assert!(outcome.starved);
    assert_samples_eq(&out, &[9.0, 0.0, 0.0]);
    delivered.push(out[0]);

    assert_samples_eq(&delivered, &samples);
    assert!(LayerQueueStore::is_empty(&queues, &key));
    assert!(!queues.cursor(&key).in_progress, "Cursor resets with the pop");
}

#[test]
fn test_mixer_reads_current_loop_queue_only() {
    let bed = layer(secs(0), secs(1), 1.0);
    let atom = AtomProfile::new(secs(0), secs(1), vec![bed.clone()]);
    let mut queues = LayerQueues::new();
    queues.push(
        QueueKey::new(bed.uuid, 0),
        AudioQueueEntry::from_samples(bed.from, &[0.25; 4]),
    );
    queues.push(
        QueueKey::new(bed.uuid, 1),
        AudioQueueEntry::from_samples(bed.from, &[0.75; 4]),
    );

    let mut out = vec![0.0f32; 4];
    mix_frame(&mut queues, &mut out, &atom, Rational::ZERO, millis(4), 1, &test_spec());

    assert_samples_eq(&out, &[0.75; 4]);
    assert_eq!(queues.queued_bytes(&QueueKey::new(bed.uuid, 0)), 16, "Loop 0 untouched");
}

#[test]
fn test_starved_layer_is_reported() {
    let bed = layer(secs(0), secs(1), 1.0);
    let atom = AtomProfile::new(secs(0), secs(1), vec![bed.clone()]);
    let mut queues = LayerQueues::new();
    queues.push(
        QueueKey::new(bed.uuid, 0),
        AudioQueueEntry::from_samples(bed.from, &[0.5; 2]),
    );

    let mut out = vec![0.0f32; 4];
    let summary = mix_frame(&mut queues, &mut out, &atom, Rational::ZERO, millis(4), 0, &test_spec());

    assert_eq!(summary.starved_layers, 1);
    assert_samples_eq(&out, &[0.5, 0.5, 0.0, 0.0]);
}
