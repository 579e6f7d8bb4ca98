//! Integration tests for underrun detection
//!
//! Verifies that pause requests and recovery notifications fire exactly once
//! per transition, both on the monitor itself and through the render path.

mod helpers;

use cmix_ap::config::EngineConfig;
use cmix_ap::playback::{UnderrunMonitor, UnderrunTransition};
use cmix_common::{CmixEvent, EventBus};
use helpers::*;

fn count_pauses(events: &[CmixEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CmixEvent::UnderrunPause { .. }))
        .count()
}

fn count_ready(events: &[CmixEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CmixEvent::ReadyToPlay { .. }))
        .count()
}

#[test]
fn test_pause_request_fires_once_per_transition() {
    let (bus, mut rx) = EventBus::new(64);
    let mut monitor = UnderrunMonitor::new(100, 1, bus);

    // Sustained underrun: one request
    assert_eq!(monitor.check(50), Some(UnderrunTransition::Underrun));
    assert_eq!(monitor.check(40), None);
    assert_eq!(monitor.check(0), None);
    assert!(!monitor.is_ready());

    // Recovery: one notification
    assert_eq!(monitor.check(150), Some(UnderrunTransition::Recovered));
    assert_eq!(monitor.check(200), None);
    assert!(monitor.is_ready());

    // A second dip is a new transition
    assert_eq!(monitor.check(10), Some(UnderrunTransition::Underrun));

    let events = drain_events(&mut rx);
    assert_eq!(count_pauses(&events), 2);
    assert_eq!(count_ready(&events), 1);
    assert_eq!(
        events[0],
        CmixEvent::UnderrunPause {
            queued_bytes: 50,
            threshold_bytes: 100
        }
    );
}

#[test]
fn test_threshold_is_inclusive_for_ready() {
    let (bus, _rx) = EventBus::new(8);
    let mut monitor = UnderrunMonitor::new(100, 1, bus);

    assert_eq!(monitor.check(100), None, "Exactly the threshold is playable");
    assert_eq!(monitor.check(99), Some(UnderrunTransition::Underrun));
    assert_eq!(monitor.check(100), Some(UnderrunTransition::Recovered));
}

#[test]
fn test_debounce_requires_consecutive_checks() {
    let (bus, mut rx) = EventBus::new(64);
    let mut monitor = UnderrunMonitor::new(100, 3, bus);

    assert_eq!(monitor.check(10), None);
    assert_eq!(monitor.check(10), None);
    // A good check resets the count
    assert_eq!(monitor.check(500), None);
    assert_eq!(monitor.check(10), None);
    assert_eq!(monitor.check(10), None);
    assert!(monitor.is_ready());
    assert_eq!(monitor.check(10), Some(UnderrunTransition::Underrun));

    assert_eq!(count_pauses(&drain_events(&mut rx)), 1);
}

#[test]
fn test_full_event_channel_does_not_block_or_repeat() {
    let (bus, mut rx) = EventBus::new(1);
    bus.emit(CmixEvent::LoopWrapped { loop_count: 1 });
    let mut monitor = UnderrunMonitor::new(100, 1, bus.clone());

    // Transition still recorded even though the event is dropped
    assert_eq!(monitor.check(0), Some(UnderrunTransition::Underrun));
    assert_eq!(bus.dropped_count(), 1);
    assert!(!monitor.is_ready());
    assert!(!monitor.ready_flag().load(std::sync::atomic::Ordering::Acquire));

    assert_eq!(monitor.check(0), None, "No retry once the state flipped");
    assert_eq!(drain_events(&mut rx).len(), 1);
}

#[test]
fn test_render_path_requests_pause_once() {
    let config = EngineConfig {
        min_playable_queue_bytes: 1000,
        ..test_config()
    };
    let bed = layer(secs(0), secs(10), 1.0);
    let mut t = TestEngine::with_config(config).with_timeline(single_atom(
        secs(0),
        secs(10),
        vec![bed.clone()],
    ));
    queue_constant(&t.engine.queues(), &bed, 0, 100, 0.5);
    t.engine.play().unwrap();

    // 400 queued bytes is below the threshold from the first period
    for _ in 0..5 {
        t.pull(40).expect("playing stream delivers callbacks");
    }
    let events = t.events();
    assert_eq!(count_pauses(&events), 1, "events: {:?}", events);
    assert!(!t.engine.is_ready_to_play());
    assert!(!t.engine.has_playable_queue());

    // The render thread never pauses itself
    assert_eq!(t.engine.play_state(), cmix_common::PlayState::Playing);

    // Producer catches up
    queue_constant(&t.engine.queues(), &bed, 0, 1000, 0.5);
    t.pull(40).unwrap();
    let events = t.events();
    assert_eq!(count_ready(&events), 1);
    assert!(t.engine.is_ready_to_play());
    assert!(t.engine.has_playable_queue());
}

#[test]
fn test_silent_atom_skips_underrun_check() {
    let config = EngineConfig {
        min_playable_queue_bytes: 1000,
        ..test_config()
    };
    let mut t = TestEngine::with_config(config).with_timeline(empty_atoms(&[0, 10]));
    t.engine.play().unwrap();
    t.pull(400).unwrap();

    assert_eq!(count_pauses(&t.events()), 0);
    assert!(t.engine.is_ready_to_play());
}
