// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::notes::{InstanceId, TimerTask};
use crate::project::{
    beats_to_ms, effective_bpm, Sequence, SequenceItem, SequenceItemKind, SequenceMode, Song,
    DEFAULT_BPM,
};

use super::EngineState;

/// Presses of the same instance closer together than this are controller
/// bounce, not intent.
pub(crate) const DEBOUNCE_MS: u64 = 30;

/// The item a trigger instance most recently started, kept so its release
/// can find and close it.
#[derive(Clone)]
pub(crate) struct TriggeredItem {
    pub(crate) seq_id: String,
    pub(crate) item: Arc<SequenceItem>,
}

/// Per-sequence stepping state, created lazily on first trigger.
#[derive(Default)]
pub(crate) struct StepState {
    step_index: HashMap<String, usize>,
    group_index: HashMap<String, (usize, usize)>,
    last_triggered: HashMap<InstanceId, TriggeredItem>,
    last_press_ms: HashMap<InstanceId, u64>,
    positions: HashMap<String, i32>,
}

impl StepState {
    pub(crate) fn clear(&mut self) {
        self.step_index.clear();
        self.group_index.clear();
        self.last_triggered.clear();
        self.last_press_ms.clear();
        self.positions.clear();
    }

    /// The published position of a sequence; -1 means ready at the top.
    pub(crate) fn position(&self, seq_id: &str) -> i32 {
        self.positions.get(seq_id).copied().unwrap_or(-1)
    }
}

impl EngineState {
    pub(crate) fn sequence_press(
        &mut self,
        sequence: &Arc<Sequence>,
        instance: &InstanceId,
        now: u64,
    ) {
        if let Some(last) = self.steps.last_press_ms.get(instance) {
            if now.saturating_sub(*last) < DEBOUNCE_MS {
                debug!(
                    sequence = sequence.name,
                    "Press within debounce window, ignoring."
                );
                return;
            }
        }
        self.steps.last_press_ms.insert(instance.clone(), now);

        match sequence.mode {
            SequenceMode::Step => self.step_press(sequence, instance, now),
            SequenceMode::Auto => self.auto_press(sequence, instance, now),
            SequenceMode::Group => {
                let has_refs = sequence
                    .items
                    .iter()
                    .any(|item| matches!(item.kind, SequenceItemKind::SequenceRef(_)));
                if has_refs {
                    self.group_press(sequence, instance, now)
                } else {
                    // A group authored as a plain list of items steps.
                    self.step_press(sequence, instance, now)
                }
            }
        }
    }

    pub(crate) fn sequence_release(
        &mut self,
        sequence: &Arc<Sequence>,
        instance: &InstanceId,
        now: u64,
    ) {
        if sequence.mode == SequenceMode::Auto {
            return;
        }
        if self.owners.get(&sequence.id) != Some(instance) {
            debug!(
                sequence = sequence.name,
                "Release from a non-owning instance, ignoring."
            );
            return;
        }
        let triggered = match self.steps.last_triggered.get(instance) {
            Some(triggered) => triggered.clone(),
            None => return,
        };
        if triggered.seq_id != sequence.id {
            return;
        }
        if triggered.item.sustain_until_next {
            // The next press's advance silences it.
            return;
        }
        self.close_sequence_item(&sequence.id, &triggered.item, instance, now);
    }

    /// One step advance: silence what the previous step left latched, then
    /// start the item at the current index and move the index on.
    fn step_press(&mut self, sequence: &Arc<Sequence>, instance: &InstanceId, now: u64) {
        if sequence.items.is_empty() {
            return;
        }
        self.stop_sequence_source(&sequence.id, now);
        self.owners.insert(sequence.id.clone(), instance.clone());

        let index = self
            .steps
            .step_index
            .get(&sequence.id)
            .copied()
            .unwrap_or(0)
            % sequence.items.len();
        let item = sequence.items[index].clone();
        self.steps.last_triggered.insert(
            instance.clone(),
            TriggeredItem {
                seq_id: sequence.id.clone(),
                item: item.clone(),
            },
        );

        let bpm = self.sequence_bpm(sequence);
        self.start_sequence_item(&sequence.id, item, instance, bpm, now);

        self.steps
            .step_index
            .insert(sequence.id.clone(), (index + 1) % sequence.items.len());
        self.steps.positions.insert(sequence.id.clone(), index as i32);
    }

    /// Schedules every item at its beat offset. A second press while a
    /// prior run is still scheduling stacks a second chain; the voice
    /// ledger keeps the wire well-formed.
    fn auto_press(&mut self, sequence: &Arc<Sequence>, instance: &InstanceId, now: u64) {
        let bpm = self.sequence_bpm(sequence);
        for item in sequence.items.iter() {
            let at = now + beats_to_ms(item.beat_position, bpm);
            self.timers.schedule(
                at,
                TimerTask::SequenceItem {
                    seq_id: sequence.id.clone(),
                    item: item.clone(),
                    instance: instance.clone(),
                    bpm,
                },
            );
        }
    }

    /// Outer/inner stepping over sub-sequences. Inline items act as
    /// single-item sub-sequences; unplayable references are skipped.
    fn group_press(&mut self, sequence: &Arc<Sequence>, instance: &InstanceId, now: u64) {
        if sequence.items.is_empty() {
            return;
        }
        let song = match self.current_song() {
            Some(song) => song,
            None => return,
        };
        self.stop_sequence_source(&sequence.id, now);
        self.owners.insert(sequence.id.clone(), instance.clone());

        let count = sequence.items.len();
        let (mut outer, mut inner) = self
            .steps
            .group_index
            .get(&sequence.id)
            .copied()
            .unwrap_or((0, 0));
        outer %= count;

        for _ in 0..count {
            let entry = sequence.items[outer].clone();
            match &entry.kind {
                SequenceItemKind::SequenceRef(target) => {
                    let sub = song.sequences.get(target).cloned();
                    match sub {
                        Some(sub) if !sub.items.is_empty() => {
                            if inner >= sub.items.len() {
                                inner = 0;
                            }
                            let item = sub.items[inner].clone();
                            let absolute = group_absolute_position(sequence, &song, outer, inner);
                            self.play_group_item(sequence, item, instance, now);
                            let next = if inner + 1 >= sub.items.len() {
                                ((outer + 1) % count, 0)
                            } else {
                                (outer, inner + 1)
                            };
                            self.steps.group_index.insert(sequence.id.clone(), next);
                            self.steps
                                .positions
                                .insert(sequence.id.clone(), absolute as i32);
                            return;
                        }
                        _ => {
                            debug!(target_id = target, "Skipping unplayable sub-sequence.");
                            outer = (outer + 1) % count;
                            inner = 0;
                        }
                    }
                }
                _ => {
                    let absolute = group_absolute_position(sequence, &song, outer, 0);
                    self.play_group_item(sequence, entry, instance, now);
                    self.steps
                        .group_index
                        .insert(sequence.id.clone(), ((outer + 1) % count, 0));
                    self.steps
                        .positions
                        .insert(sequence.id.clone(), absolute as i32);
                    return;
                }
            }
        }
    }

    fn play_group_item(
        &mut self,
        sequence: &Arc<Sequence>,
        item: Arc<SequenceItem>,
        instance: &InstanceId,
        now: u64,
    ) {
        self.steps.last_triggered.insert(
            instance.clone(),
            TriggeredItem {
                seq_id: sequence.id.clone(),
                item: item.clone(),
            },
        );
        let bpm = self.sequence_bpm(sequence);
        self.start_sequence_item(&sequence.id, item, instance, bpm, now);
    }

    /// Starts a single sequence item under the sequence's source id.
    pub(crate) fn start_sequence_item(
        &mut self,
        seq_id: &str,
        item: Arc<SequenceItem>,
        instance: &InstanceId,
        bpm: f32,
        now: u64,
    ) {
        match &item.kind {
            SequenceItemKind::PresetRef(target) => {
                let preset = self
                    .current_song()
                    .and_then(|song| song.presets.get(target).cloned());
                match preset {
                    Some(preset) => self.open_preset(
                        &preset,
                        instance,
                        bpm,
                        item.override_duration,
                        seq_id,
                        now,
                    ),
                    None => debug!(target_id = target, "Sequence item targets unknown preset."),
                }
            }
            SequenceItemKind::InlineNote(note) => {
                let note = note.clone();
                if self.notes.start(
                    &mut self.timers,
                    &mut self.voices,
                    seq_id,
                    instance,
                    &note,
                    bpm,
                    item.override_duration,
                    now,
                ) {
                    self.panic_pending = true;
                }
            }
            SequenceItemKind::SequenceRef(target) => {
                debug!(target_id = target, "Nested sequence reference cannot play directly.");
            }
        }
    }

    fn close_sequence_item(
        &mut self,
        seq_id: &str,
        item: &SequenceItem,
        instance: &InstanceId,
        now: u64,
    ) {
        match &item.kind {
            SequenceItemKind::PresetRef(target) => {
                let preset = self
                    .current_song()
                    .and_then(|song| song.presets.get(target).cloned());
                if let Some(preset) = preset {
                    self.close_preset(&preset, instance, item.sustain_until_next, seq_id, now);
                }
            }
            SequenceItemKind::InlineNote(note) => {
                if self.notes.stop(
                    &mut self.timers,
                    &mut self.voices,
                    seq_id,
                    instance,
                    note.channel,
                    note.pitch,
                    now,
                ) {
                    self.panic_pending = true;
                }
            }
            SequenceItemKind::SequenceRef(_) => {}
        }
    }

    /// Silences the notes a sequence left latched.
    pub(crate) fn stop_sequence_source(&mut self, source_id: &str, now: u64) {
        if self
            .notes
            .stop_source(&mut self.timers, &mut self.voices, source_id, now)
        {
            self.panic_pending = true;
        }
    }

    fn sequence_bpm(&self, sequence: &Sequence) -> f32 {
        match sequence.bpm_override {
            Some(bpm) if bpm > 0.0 => bpm,
            _ => self
                .current_song()
                .map(|song| effective_bpm(song.bpm))
                .unwrap_or(DEFAULT_BPM),
        }
    }
}

/// Absolute step position of a group entry: prior items count for their
/// full effective length.
fn group_absolute_position(sequence: &Sequence, song: &Song, outer: usize, inner: usize) -> usize {
    let mut absolute = inner;
    for item in sequence.items.iter().take(outer) {
        absolute += match &item.kind {
            SequenceItemKind::SequenceRef(target) => {
                song.sequences.get(target).map_or(0, |sub| sub.items.len())
            }
            _ => 1,
        };
    }
    absolute
}
