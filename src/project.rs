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
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The tempo used whenever a song or sequence has no usable BPM.
pub const DEFAULT_BPM: f32 = 120.0;

/// Returns the given BPM, or the default when it is zero or negative.
pub fn effective_bpm(bpm: f32) -> f32 {
    if bpm > 0.0 {
        bpm
    } else {
        DEFAULT_BPM
    }
}

/// Converts a beat offset to milliseconds at the given tempo.
pub fn beats_to_ms(beats: f32, bpm: f32) -> u64 {
    let ms = beats as f64 * 60_000.0 / effective_bpm(bpm) as f64;
    ms.max(0.0).round() as u64
}

/// The unit a note duration is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationUnit {
    Ms,
    Beat,
}

/// A note duration with its unit. Beat durations resolve against the tempo
/// that is active when the note is scheduled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DurationValue {
    pub value: f32,
    pub unit: DurationUnit,
}

impl DurationValue {
    /// Resolves the duration to milliseconds at the given tempo.
    pub fn to_ms(&self, bpm: f32) -> u64 {
        match self.unit {
            DurationUnit::Ms => self.value.max(0.0).round() as u64,
            DurationUnit::Beat => beats_to_ms(self.value, bpm),
        }
    }
}

/// A single note within a preset or sequence. A duration of `None` means the
/// note is latched: it sounds until its trigger releases it.
#[derive(Clone, Debug)]
pub struct NoteItem {
    /// MIDI pitch, 0..=127.
    pub pitch: u8,
    /// Normalized velocity, 0.0..=1.0.
    pub velocity: f32,
    /// MIDI channel, 1..=16.
    pub channel: u8,
    /// Delay before the note sounds, in milliseconds.
    pub pre_delay_ms: u64,
    pub duration: Option<DurationValue>,
}

/// Which keys a glissando walk may land on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFilter {
    White,
    Black,
    Both,
}

impl KeyFilter {
    /// Returns true if the filter admits the given pitch.
    pub fn admits(&self, pitch: u8) -> bool {
        let black = matches!(pitch % 12, 1 | 3 | 6 | 8 | 10);
        match self {
            KeyFilter::White => !black,
            KeyFilter::Black => black,
            KeyFilter::Both => true,
        }
    }
}

/// An automatic note walk played before (attack) or after (release) a preset.
#[derive(Clone, Debug)]
pub struct GlissandoConfig {
    pub attack_on: bool,
    pub release_on: bool,
    pub lowest_pitch: u8,
    pub target_pitch: u8,
    /// How long each step of the walk is held, in milliseconds.
    pub step_ms: u64,
    pub mode: KeyFilter,
    /// Velocity at the start of the attack walk (and end of the release walk).
    pub velocity_lo: f32,
    /// Velocity at the end of the attack walk (and start of the release walk).
    pub velocity_hi: f32,
    /// MIDI channel the walk plays on, 1..=16.
    pub channel: u8,
}

/// A named chord/voicing: an unordered set of notes triggered together.
#[derive(Clone, Debug)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub notes: Vec<NoteItem>,
    pub glissando: Option<GlissandoConfig>,
}

/// How a sequence responds to trigger presses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceMode {
    /// Each press advances to the next item, round-robin.
    Step,
    /// A press schedules every item at its beat offset.
    Auto,
    /// Items are sub-sequence references stepped outer/inner; without any
    /// reference the sequence behaves exactly like Step.
    Group,
}

/// What a sequence item plays when it is reached.
#[derive(Clone, Debug)]
pub enum SequenceItemKind {
    PresetRef(String),
    InlineNote(NoteItem),
    SequenceRef(String),
}

#[derive(Clone, Debug)]
pub struct SequenceItem {
    pub id: String,
    pub kind: SequenceItemKind,
    /// Offset within the sequence, in beats. Only meaningful in Auto mode.
    pub beat_position: f32,
    /// Overrides the duration of every note the item plays.
    pub override_duration: Option<DurationValue>,
    /// When set, releasing the trigger leaves the item sounding; the next
    /// step advance silences it instead.
    pub sustain_until_next: bool,
}

#[derive(Clone, Debug)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    pub mode: SequenceMode,
    pub items: Vec<Arc<SequenceItem>>,
    pub bpm_override: Option<f32>,
}

/// A named set of mappings that are active together.
#[derive(Clone, Debug)]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub mapping_ids: HashSet<String>,
}

/// What an input mapping does when its trigger fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingAction {
    Preset,
    Sequence,
    SwitchScene,
}

/// Whether a mapping is always active or only within scenes that include it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingScope {
    Global,
    Scene,
}

/// Binds physical triggers (computer keys, MIDI notes) to an action.
#[derive(Clone, Debug)]
pub struct InputMapping {
    pub id: String,
    /// Comma-separated list of accepted key values.
    pub keyboard_value: String,
    /// Comma-separated list of accepted MIDI pitches.
    pub midi_value: String,
    /// MIDI channel filter, 1..=16; 0 matches any channel.
    pub midi_channel: u8,
    pub is_midi_range: bool,
    pub midi_range_start: u8,
    pub midi_range_end: u8,
    pub action: MappingAction,
    pub target_id: String,
    pub enabled: bool,
    pub scope: MappingScope,
}

/// A project-wide action bound to a trigger.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalAction {
    PrevSong,
    NextSong,
    /// Jumps to the 1-based song number.
    GotoSong(usize),
    ResetSequences,
}

#[derive(Clone, Debug)]
pub struct GlobalMapping {
    pub id: String,
    pub keyboard_value: String,
    pub midi_value: String,
    pub midi_channel: u8,
    pub action: GlobalAction,
    pub enabled: bool,
}

pub struct Song {
    pub id: String,
    pub name: String,
    pub bpm: f32,
    pub presets: HashMap<String, Arc<Preset>>,
    pub sequences: HashMap<String, Arc<Sequence>>,
    /// Mappings in definition order; when several match one event, all are
    /// dispatched in this order.
    pub mappings: Vec<Arc<InputMapping>>,
    pub scenes: HashMap<String, Arc<Scene>>,
    pub active_scene_id: Option<String>,
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (presets: {}, sequences: {}, mappings: {}, scenes: {})",
            self.name,
            self.presets.len(),
            self.sequences.len(),
            self.mappings.len(),
            self.scenes.len()
        )
    }
}

pub struct Project {
    pub name: String,
    pub songs: Vec<Arc<Song>>,
    pub global_mappings: Vec<GlobalMapping>,
    /// Preferred MIDI input device name, if any.
    pub selected_input: Option<String>,
    /// Preferred MIDI output device name, if any.
    pub selected_output: Option<String>,
}

impl Project {
    /// Finds the index of the song with the given id.
    pub fn song_index(&self, song_id: &str) -> Option<usize> {
        self.songs.iter().position(|song| song.id == song_id)
    }

    /// Returns human-readable referential-integrity problems. The engine
    /// treats dangling references as no-ops at runtime; this surfaces them
    /// up front so a project can be checked before a performance.
    pub fn integrity_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for song in self.songs.iter() {
            for mapping in song.mappings.iter() {
                let target_ok = match mapping.action {
                    MappingAction::Preset => song.presets.contains_key(&mapping.target_id),
                    MappingAction::Sequence => song.sequences.contains_key(&mapping.target_id),
                    MappingAction::SwitchScene => song.scenes.contains_key(&mapping.target_id),
                };
                if !target_ok {
                    warnings.push(format!(
                        "song {}: mapping {} targets unknown id {}",
                        song.name, mapping.id, mapping.target_id
                    ));
                }
            }

            for sequence in song.sequences.values() {
                for item in sequence.items.iter() {
                    match &item.kind {
                        SequenceItemKind::PresetRef(target) => {
                            if !song.presets.contains_key(target) {
                                warnings.push(format!(
                                    "song {}: sequence {} references unknown preset {}",
                                    song.name, sequence.name, target
                                ));
                            }
                        }
                        SequenceItemKind::SequenceRef(target) => {
                            if !song.sequences.contains_key(target) {
                                warnings.push(format!(
                                    "song {}: sequence {} references unknown sequence {}",
                                    song.name, sequence.name, target
                                ));
                            }
                        }
                        SequenceItemKind::InlineNote(_) => {}
                    }
                }
            }

            for scene in song.scenes.values() {
                for mapping_id in scene.mapping_ids.iter() {
                    if !song.mappings.iter().any(|m| &m.id == mapping_id) {
                        warnings.push(format!(
                            "song {}: scene {} lists unknown mapping {}",
                            song.name, scene.name, mapping_id
                        ));
                    }
                }
            }

            if let Some(scene_id) = &song.active_scene_id {
                if !song.scenes.contains_key(scene_id) {
                    warnings.push(format!(
                        "song {}: active scene {} does not exist",
                        song.name, scene_id
                    ));
                }
            }
        }

        warnings
    }
}
