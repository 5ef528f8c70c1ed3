//! Bitfield edge and level events
//!
//! Bitfield fields pack several small state machines into one byte. For
//! annotation, consumers select which states produce:
//!
//! - **edges**: a marker at every sample where a bitfield enters the state
//! - **levels**: contiguous sample ranges during which a bitfield holds the state
//!
//! [`for_each_edge`] and [`for_each_level`] scan a sample window directly.
//! [`BitfieldEvents`] keeps the resulting markers and extends them
//! incrementally as new samples arrive.
//!
//! # Window changes
//!
//! `update(min, max)` with the same `min` and a larger `max` scans only the
//! new samples. Any other change of `min`, or a smaller `max`, clears every
//! marker and rebuilds the window from scratch. Both paths produce the same
//! markers as a fresh rebuild.

use crate::config::{Bitfield, FrameLayout};
use crate::storage::TelemetryStore;
use crate::types::Rgba;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of one bitfield: its container's location and lowest bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BitfieldId {
    pub location: usize,
    pub lsb: u8,
}

/// One state of one bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitfieldState {
    pub bitfield: BitfieldId,
    pub value: u32,
}

/// States that should produce edge and level markers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSelection {
    #[serde(default)]
    pub edges: Vec<BitfieldState>,
    #[serde(default)]
    pub levels: Vec<BitfieldState>,
}

/// Display details of a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub bitfield: BitfieldId,
    pub value: u32,
    pub label: String,
    pub color: Rgba,
}

/// All bitfield states that changed at one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMarker {
    pub sample_number: usize,
    pub timestamp: i64,
    pub labels: Vec<String>,
    pub colors: Vec<Rgba>,
}

/// Inclusive sample range during which a bitfield held one state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRange {
    pub value: u32,
    pub label: String,
    pub color: Rgba,
    pub first: usize,
    pub last: usize,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
}

/// Ordered, non-overlapping level ranges of one bitfield
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMarker {
    pub bitfield: BitfieldId,
    pub ranges: Vec<LevelRange>,
}

#[derive(Debug, Clone)]
struct BitfieldPlan {
    id: BitfieldId,
    column: usize,
    bitfield: Bitfield,
    states: Vec<StateInfo>,
    edge: Vec<bool>,
    level: Vec<bool>,
}

impl BitfieldPlan {
    fn wants_edges(&self) -> bool {
        self.edge.iter().any(|&b| b)
    }

    fn wants_levels(&self) -> bool {
        self.level.iter().any(|&b| b)
    }

    /// States of samples `first..=last`
    fn states(&self, store: &TelemetryStore, first: usize, last: usize) -> Vec<u32> {
        store
            .samples(self.column, first, last)
            .into_iter()
            .map(|raw| self.bitfield.state_of(raw))
            .collect()
    }
}

/// Selection resolved against a layout
#[derive(Debug, Clone, Default)]
pub struct EventPlan {
    bitfields: Vec<BitfieldPlan>,
}

impl EventPlan {
    /// Resolve `selection` against `layout`. States that do not exist in the
    /// layout are ignored.
    pub fn new(layout: &FrameLayout, selection: &EventSelection) -> Self {
        let mut bitfields: Vec<BitfieldPlan> = Vec::new();
        let mut plan_for = |state: &BitfieldState| -> Option<usize> {
            if let Some(i) = bitfields.iter().position(|p| p.id == state.bitfield) {
                return Some(i);
            }
            let field = layout
                .datasets()
                .find(|f| f.location == state.bitfield.location)?;
            let bitfield = field
                .bitfields
                .iter()
                .find(|b| b.lsb == state.bitfield.lsb)?
                .clone();
            let column = layout.column_of(field.location)?;
            let count = bitfield.state_count() as usize;
            let states = (0..count as u32)
                .map(|value| StateInfo {
                    bitfield: state.bitfield,
                    value,
                    label: bitfield.state_name(value),
                    color: bitfield.state_color(value, field.color),
                })
                .collect();
            bitfields.push(BitfieldPlan {
                id: state.bitfield,
                column,
                bitfield,
                states,
                edge: vec![false; count],
                level: vec![false; count],
            });
            Some(bitfields.len() - 1)
        };

        let mut marks = Vec::new();
        for (state, is_edge) in selection
            .edges
            .iter()
            .map(|s| (s, true))
            .chain(selection.levels.iter().map(|s| (s, false)))
        {
            match plan_for(state) {
                Some(index) => marks.push((index, state.value as usize, is_edge)),
                None => tracing::warn!("Ignoring unknown bitfield state {:?}", state),
            }
        }
        for (index, value, is_edge) in marks {
            let plan = &mut bitfields[index];
            let slots = if is_edge { &mut plan.edge } else { &mut plan.level };
            if let Some(slot) = slots.get_mut(value) {
                *slot = true;
            }
        }
        bitfields.sort_by_key(|p| p.id);
        Self { bitfields }
    }

    pub fn is_empty(&self) -> bool {
        self.bitfields.is_empty()
    }
}

/// Clamp a window to the published samples
fn clamp_window(store: &TelemetryStore, min: usize, max: usize) -> Option<(usize, usize)> {
    let count = store.sample_count();
    if count == 0 {
        return None;
    }
    let max = max.min(count - 1);
    (min <= max).then_some((min, max))
}

/// Call `f` for every selected edge at a sample in `(min, max]`
pub fn for_each_edge(
    store: &TelemetryStore,
    plan: &EventPlan,
    min: usize,
    max: usize,
    mut f: impl FnMut(&StateInfo, usize),
) {
    let Some((min, max)) = clamp_window(store, min, max) else {
        return;
    };
    for bf in plan.bitfields.iter().filter(|p| p.wants_edges()) {
        let states = bf.states(store, min, max);
        for (i, pair) in states.windows(2).enumerate() {
            let (previous, current) = (pair[0], pair[1]);
            if previous != current && bf.edge[current as usize] {
                f(&bf.states[current as usize], min + i + 1);
            }
        }
    }
}

/// Call `f` with `(state, first, last)` for every run of a selected level
/// state inside `[min, max]`. The last run of a bitfield ends at `max`.
pub fn for_each_level(
    store: &TelemetryStore,
    plan: &EventPlan,
    min: usize,
    max: usize,
    mut f: impl FnMut(&StateInfo, usize, usize),
) {
    let Some((min, max)) = clamp_window(store, min, max) else {
        return;
    };
    for bf in plan.bitfields.iter().filter(|p| p.wants_levels()) {
        let states = bf.states(store, min, max);
        let mut start = 0;
        for i in 1..=states.len() {
            if i == states.len() || states[i] != states[start] {
                let state = states[start] as usize;
                if bf.level[state] {
                    f(&bf.states[state], min + start, min + i - 1);
                }
                start = i;
            }
        }
    }
}

/// Edge and level markers for one connection, updated incrementally
#[derive(Debug, Clone, Default)]
pub struct BitfieldEvents {
    plan: EventPlan,
    window: Option<(usize, usize)>,
    edges: BTreeMap<usize, EdgeMarker>,
    levels: BTreeMap<BitfieldId, LevelMarker>,
}

impl BitfieldEvents {
    pub fn new(layout: &FrameLayout, selection: &EventSelection) -> Self {
        Self::with_plan(EventPlan::new(layout, selection))
    }

    pub fn with_plan(plan: EventPlan) -> Self {
        Self {
            plan,
            ..Self::default()
        }
    }

    /// Bring the markers up to date for `[min, max]`
    pub fn update(&mut self, store: &TelemetryStore, min: usize, max: usize) {
        let Some((min, max)) = clamp_window(store, min, max) else {
            self.clear();
            return;
        };

        match self.window {
            Some((old_min, old_max)) if old_min == min && old_max == max => return,
            Some((old_min, old_max)) if old_min == min && old_max < max => {
                self.scan(store, old_max, max);
            }
            _ => {
                self.clear();
                self.scan(store, min, max);
            }
        }
        self.window = Some((min, max));
    }

    /// Drop every marker
    pub fn clear(&mut self) {
        self.edges.clear();
        self.levels.clear();
        self.window = None;
    }

    /// Scan `[from, to]`. Levels that end at `from` are extended in place.
    fn scan(&mut self, store: &TelemetryStore, from: usize, to: usize) {
        let edges = &mut self.edges;
        for_each_edge(store, &self.plan, from, to, |state, n| {
            let marker = edges.entry(n).or_insert_with(|| EdgeMarker {
                sample_number: n,
                timestamp: store.timestamp(n).unwrap_or(0),
                labels: Vec::new(),
                colors: Vec::new(),
            });
            marker.labels.push(state.label.clone());
            marker.colors.push(state.color);
        });

        let levels = &mut self.levels;
        for_each_level(store, &self.plan, from, to, |state, first, last| {
            let marker = levels.entry(state.bitfield).or_insert_with(|| LevelMarker {
                bitfield: state.bitfield,
                ranges: Vec::new(),
            });
            let last_timestamp = store.timestamp(last).unwrap_or(0);
            if let Some(previous) = marker.ranges.last_mut() {
                if previous.last == first && previous.value == state.value {
                    previous.last = last;
                    previous.last_timestamp = last_timestamp;
                    return;
                }
            }
            marker.ranges.push(LevelRange {
                value: state.value,
                label: state.label.clone(),
                color: state.color,
                first,
                last,
                first_timestamp: store.timestamp(first).unwrap_or(0),
                last_timestamp,
            });
        });
    }

    /// Edge markers in sample order
    pub fn edges(&self) -> impl Iterator<Item = &EdgeMarker> {
        self.edges.values()
    }

    /// Level markers in bitfield order
    pub fn levels(&self) -> impl Iterator<Item = &LevelMarker> {
        self.levels.values()
    }

    pub fn level(&self, bitfield: BitfieldId) -> Option<&LevelMarker> {
        self.levels.get(&bitfield)
    }

    /// Window covered by the current markers
    pub fn window(&self) -> Option<(usize, usize)> {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Field;
    use crate::types::{FieldType, Protocol};
    use proptest::prelude::*;
    use std::sync::Arc;

    const FLAGS: usize = 1;

    fn layout() -> FrameLayout {
        FrameLayout::new(Protocol::Binary)
            .with_field(Field::new(0, "value", FieldType::U8))
            .with_field(
                Field::new(FLAGS, "flags", FieldType::Bitfield)
                    .with_bitfield(Bitfield::new(0, 0).with_names(["idle", "busy"]))
                    .with_bitfield(Bitfield::new(1, 2)),
            )
    }

    fn bit0(value: u32) -> BitfieldState {
        BitfieldState {
            bitfield: BitfieldId {
                location: FLAGS,
                lsb: 0,
            },
            value,
        }
    }

    fn bits12(value: u32) -> BitfieldState {
        BitfieldState {
            bitfield: BitfieldId {
                location: FLAGS,
                lsb: 1,
            },
            value,
        }
    }

    fn selection() -> EventSelection {
        EventSelection {
            edges: vec![bit0(1), bits12(2), bits12(3)],
            levels: vec![bit0(0), bit0(1), bits12(1)],
        }
    }

    fn store_with(flags: &[u8]) -> Arc<TelemetryStore> {
        let store = TelemetryStore::new(2, 10_000);
        let mut writer = store.writer().unwrap();
        for (i, &f) in flags.iter().enumerate() {
            writer.append_frame(&[0.0, f as f64], i as i64 * 10).unwrap();
        }
        store
    }

    fn fresh(store: &TelemetryStore, min: usize, max: usize) -> BitfieldEvents {
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(store, min, max);
        events
    }

    fn snapshot(events: &BitfieldEvents) -> (Vec<EdgeMarker>, Vec<LevelMarker>) {
        (events.edges().cloned().collect(), events.levels().cloned().collect())
    }

    #[test]
    fn test_edges_only_for_selected_states() {
        let store = store_with(&[0, 1, 1, 0, 1, 0b100, 0b110]);
        let plan = EventPlan::new(&layout(), &selection());
        let mut edges = Vec::new();
        for_each_edge(&store, &plan, 0, 100, |s, n| edges.push((s.label.clone(), n)));
        assert_eq!(
            edges,
            vec![
                ("busy".to_string(), 1),
                ("busy".to_string(), 4),
                ("Bits [2:1] = 2".to_string(), 5),
                ("Bits [2:1] = 3".to_string(), 6),
            ]
        );
    }

    #[test]
    fn test_levels_cover_runs() {
        let store = store_with(&[0, 0, 1, 1, 1, 0]);
        let plan = EventPlan::new(&layout(), &selection());
        let mut runs = Vec::new();
        for_each_level(&store, &plan, 0, 5, |s, a, b| runs.push((s.value, a, b)));
        assert_eq!(runs, vec![(0, 0, 1), (1, 2, 4), (0, 5, 5)]);
    }

    #[test]
    fn test_empty_store_has_no_events() {
        let store = TelemetryStore::new(2, 10);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 100);
        assert_eq!(events.edges().count(), 0);
        assert_eq!(events.window(), None);
    }

    #[test]
    fn test_incremental_extends_level_in_place() {
        let store = store_with(&[1, 1, 1, 1, 1, 1]);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 2);
        events.update(&store, 0, 5);
        let marker = events
            .level(BitfieldId {
                location: FLAGS,
                lsb: 0,
            })
            .unwrap();
        assert_eq!(marker.ranges.len(), 1);
        assert_eq!((marker.ranges[0].first, marker.ranges[0].last), (0, 5));
        assert_eq!(marker.ranges[0].last_timestamp, 50);
    }

    #[test]
    fn test_same_window_is_noop() {
        let store = store_with(&[0, 1, 0, 1]);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 3);
        let before = snapshot(&events);
        events.update(&store, 0, 3);
        assert_eq!(snapshot(&events), before);
    }

    #[test]
    fn test_shrinking_window_rebuilds() {
        let store = store_with(&[0, 1, 0, 1, 0, 1]);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 5);
        events.update(&store, 0, 2);
        assert_eq!(events.window(), Some((0, 2)));
        assert_eq!(snapshot(&events), snapshot(&fresh(&store, 0, 2)));
        assert_eq!(events.edges().map(|e| e.sample_number).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_moved_min_rebuilds() {
        let store = store_with(&[0, 1, 0, 1, 0, 1, 1, 1]);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 4);
        // overlapping window with a later start
        events.update(&store, 2, 7);
        assert_eq!(snapshot(&events), snapshot(&fresh(&store, 2, 7)));
        assert!(events.edges().all(|e| e.sample_number > 2));
        // overlapping window with an earlier start
        events.update(&store, 1, 7);
        assert_eq!(snapshot(&events), snapshot(&fresh(&store, 1, 7)));
    }

    #[test]
    fn test_window_clamped_to_published() {
        let store = store_with(&[0, 1]);
        let mut events = BitfieldEvents::new(&layout(), &selection());
        events.update(&store, 0, 1_000);
        assert_eq!(events.window(), Some((0, 1)));
    }

    #[test]
    fn test_unknown_states_ignored() {
        let selection = EventSelection {
            edges: vec![BitfieldState {
                bitfield: BitfieldId {
                    location: 7,
                    lsb: 0,
                },
                value: 1,
            }],
            levels: Vec::new(),
        };
        assert!(EventPlan::new(&layout(), &selection).is_empty());
    }

    proptest! {
        #[test]
        fn test_incremental_matches_rebuild(
            flags in prop::collection::vec(0u8..8, 1..200),
            cuts in prop::collection::vec(0usize..200, 1..6),
        ) {
            let store = store_with(&flags);
            let max = flags.len() - 1;
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(max)).collect();
            cuts.sort_unstable();
            cuts.push(max);

            let mut events = BitfieldEvents::new(&layout(), &selection());
            for cut in cuts {
                events.update(&store, 0, cut);
            }
            prop_assert_eq!(snapshot(&events), snapshot(&fresh(&store, 0, max)));
        }
    }
}
