//! Timeline profiles and atom selection
//!
//! A `Timeline` is an ordered list of atoms, each carrying the layers
//! audible inside it. It is published as an immutable snapshot and never
//! mutated in place.
//!
//! `TimelineSelector` runs once per audio callback, before any mixing, and
//! moves the clock across atom boundaries:
//!
//! - no boundary crossed: nothing changes;
//! - boundary inside the timeline: `current_atom_index += 1`, clock untouched
//!   (atoms are contiguous, so `start_time + bytes_played` stays valid);
//! - boundary past the last atom: wrap to atom 0, `start_time = 0`,
//!   `bytes_played = 0`, `loop_count += 1`.
//!
//! One request may cross several boundaries. Advancing is bounded to at most
//! one wrap per call.

use crate::audio::types::AudioSpec;
use crate::error::{Error, Result};
use crate::playback::state::PlaybackState;
use cmix_common::{CmixEvent, EventBus, Rational};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One audio track active within part of an atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerProfile {
    /// Layer identity; with the loop count it keys the layer's queue
    pub uuid: Uuid,
    /// Global timeline time the layer starts
    pub from: Rational,
    /// Global timeline time the layer ends
    pub to: Rational,
    /// Linear gain (>= 0)
    #[serde(default = "default_gain")]
    pub gain: f32,
}

fn default_gain() -> f32 {
    1.0
}

impl LayerProfile {
    pub fn new(uuid: Uuid, from: Rational, to: Rational, gain: f32) -> Self {
        Self { uuid, from, to, gain }
    }

    /// Whether the layer is audible anywhere in `[cur_pts, next_pts]`
    pub fn overlaps(&self, cur_pts: Rational, next_pts: Rational) -> bool {
        self.from <= next_pts && self.to >= cur_pts
    }
}

/// One contiguous timeline segment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AtomProfile {
    pub from: Rational,
    pub to: Rational,
    #[serde(default)]
    pub layers: Vec<LayerProfile>,
}

impl AtomProfile {
    pub fn new(from: Rational, to: Rational, layers: Vec<LayerProfile>) -> Self {
        Self { from, to, layers }
    }

    pub fn duration(&self) -> Rational {
        self.to - self.from
    }

    pub fn has_layers(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn contains(&self, pts: Rational) -> bool {
        self.from <= pts && pts < self.to
    }
}

/// Immutable, ordered atom sequence for one composition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "TimelineRepr", into = "TimelineRepr")]
pub struct Timeline {
    atoms: Vec<AtomProfile>,
}

#[derive(Serialize, Deserialize)]
struct TimelineRepr {
    atoms: Vec<AtomProfile>,
}

impl TryFrom<TimelineRepr> for Timeline {
    type Error = Error;

    fn try_from(repr: TimelineRepr) -> Result<Self> {
        Timeline::new(repr.atoms)
    }
}

impl From<Timeline> for TimelineRepr {
    fn from(timeline: Timeline) -> Self {
        Self {
            atoms: timeline.atoms,
        }
    }
}

impl Timeline {
    /// Validate and build a timeline
    ///
    /// Rejects reversed atom or layer bounds. Negative and NaN gains are
    /// clamped to 0. Gaps between consecutive atoms are accepted with a
    /// warning, since the clock would jump at those boundaries.
    pub fn new(mut atoms: Vec<AtomProfile>) -> Result<Self> {
        for (index, atom) in atoms.iter_mut().enumerate() {
            if atom.from > atom.to {
                return Err(Error::Timeline(format!(
                    "atom {} ends ({}) before it starts ({})",
                    index, atom.to, atom.from
                )));
            }
            for layer in atom.layers.iter_mut() {
                if layer.from > layer.to {
                    return Err(Error::Timeline(format!(
                        "layer {} in atom {} ends ({}) before it starts ({})",
                        layer.uuid, index, layer.to, layer.from
                    )));
                }
                if layer.to < atom.from || layer.from > atom.to {
                    warn!(
                        "Layer {} [{}, {}] does not overlap atom {} [{}, {}]",
                        layer.uuid, layer.from, layer.to, index, atom.from, atom.to
                    );
                }
                if layer.gain.is_nan() || layer.gain < 0.0 {
                    warn!("Layer {} has gain {}, clamping to 0", layer.uuid, layer.gain);
                    layer.gain = 0.0;
                }
            }
        }

        for (index, pair) in atoms.windows(2).enumerate() {
            if pair[0].to != pair[1].from {
                warn!(
                    "Atoms {} and {} are not contiguous ({} != {}), clock will jump",
                    index,
                    index + 1,
                    pair[0].to,
                    pair[1].from
                );
            }
        }

        Ok(Self { atoms })
    }

    /// Load a timeline from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let timeline = Self::from_json_str(&content)?;
        info!(
            "Loaded timeline from {} ({} atoms)",
            path.display(),
            timeline.len()
        );
        Ok(timeline)
    }

    pub fn atoms(&self) -> &[AtomProfile] {
        &self.atoms
    }

    pub fn get(&self, index: usize) -> Option<&AtomProfile> {
        self.atoms.get(index)
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn start(&self) -> Option<Rational> {
        self.atoms.first().map(|a| a.from)
    }

    pub fn end(&self) -> Option<Rational> {
        self.atoms.last().map(|a| a.to)
    }

    /// Index of the atom containing `pts`
    ///
    /// `pts` equal to the end of the last atom maps to the last atom.
    pub fn atom_index_at(&self, pts: Rational) -> Option<usize> {
        if let Some(index) = self.atoms.iter().position(|a| a.contains(pts)) {
            return Some(index);
        }
        match self.atoms.last() {
            Some(last) if last.to == pts => Some(self.atoms.len() - 1),
            _ => None,
        }
    }
}

/// Transition taken by one `select_current_atom` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Advance {
    steps: usize,
    wrapped: bool,
    index: usize,
    loop_count: u64,
}

/// Selects the active atom for each callback and advances the clock
#[derive(Debug, Clone)]
pub struct TimelineSelector {
    events: EventBus,
}

impl TimelineSelector {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Return the atom active for a request of `requested_bytes`, moving the
    /// clock across any boundaries the request crosses first.
    ///
    /// Must run before any mixing in the same callback: the mixer's
    /// `current_time()` and `loop_count()` reads rely on the transition having
    /// been applied. Returns `None` for an empty timeline.
    pub fn select_current_atom<'t>(
        &self,
        state: &PlaybackState,
        timeline: &'t Timeline,
        requested_bytes: u64,
    ) -> Option<&'t AtomProfile> {
        if timeline.is_empty() {
            return None;
        }

        let spec = state.audio_spec();
        let request = spec.bytes_to_duration(requested_bytes);

        // Fast path: a plain read, no clock write when nothing changes
        let snapshot = state.clock();
        if let Some(cur) = timeline.get(snapshot.atom_index) {
            if snapshot.current_time(&spec) + request <= cur.to {
                return Some(cur);
            }
        }

        let advance = state.transition(|clock| advance_clock(clock, timeline, &spec, request));

        if advance.steps > 0 || advance.wrapped {
            self.publish(&advance);
        }

        timeline.get(advance.index)
    }

    fn publish(&self, advance: &Advance) {
        if advance.wrapped {
            info!("Timeline wrapped, loop {}", advance.loop_count);
            self.events.emit(CmixEvent::LoopWrapped {
                loop_count: advance.loop_count,
            });
        }
        debug!(
            "Atom changed to {} (loop {}, {} step(s))",
            advance.index, advance.loop_count, advance.steps
        );
        self.events.emit(CmixEvent::AtomChanged {
            atom_index: advance.index,
            loop_count: advance.loop_count,
        });
    }
}

fn advance_clock(
    clock: &mut crate::playback::state::ClockSnapshot,
    timeline: &Timeline,
    spec: &AudioSpec,
    request: Rational,
) -> Advance {
    let mut advance = Advance::default();

    if clock.atom_index >= timeline.len() {
        warn!(
            "Atom index {} out of range ({} atoms), resetting to 0",
            clock.atom_index,
            timeline.len()
        );
        clock.atom_index = 0;
    }

    // Each atom is visited at most twice: before and after the single wrap
    for _ in 0..2 * timeline.len() {
        let Some(cur) = timeline.get(clock.atom_index) else {
            break;
        };
        let next_pts = clock.current_time(spec) + request;
        if next_pts <= cur.to {
            break;
        }

        if clock.atom_index + 1 == timeline.len() {
            if advance.wrapped {
                warn!(
                    "Request of {} spans the whole timeline, deferring to next callback",
                    request
                );
                break;
            }
            clock.atom_index = 0;
            clock.start_time = Rational::ZERO;
            clock.bytes_played = 0;
            clock.loop_count += 1;
            advance.wrapped = true;
        } else {
            clock.atom_index += 1;
        }
        advance.steps += 1;
    }

    advance.index = clock.atom_index;
    advance.loop_count = clock.loop_count;
    advance
}
