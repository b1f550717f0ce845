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
use std::sync::Arc;

use crate::project::{GlobalMapping, InputMapping, MappingScope, Scene, Song};

/// Resolves incoming trigger events against a song's mappings under the
/// currently active scene. Matching never fails: malformed configured values
/// simply do not match.
pub struct Resolver<'a> {
    song: &'a Song,
    scene: Option<&'a Scene>,
}

impl<'a> Resolver<'a> {
    pub fn new(song: &'a Song, scene: Option<&'a Scene>) -> Resolver<'a> {
        Resolver { song, scene }
    }

    /// Mappings matching a keyboard value. When `apply_scene` is set, only
    /// mappings active under the current scene are considered; releases pass
    /// false so a press made in a scene that has since been left can still
    /// find its mapping (ownership makes stray releases no-ops).
    pub fn match_keyboard(&self, value: &str, apply_scene: bool) -> Vec<Arc<InputMapping>> {
        let value = value.trim().to_lowercase();
        candidates(self.song, self.scene, apply_scene)
            .filter(|mapping| list_contains(&mapping.keyboard_value, &value))
            .cloned()
            .collect()
    }

    /// Mappings matching a MIDI pitch on a channel. The channel filter is
    /// applied first (0 is omni), then the pitch list or range.
    pub fn match_midi(&self, pitch: u8, channel: u8, apply_scene: bool) -> Vec<Arc<InputMapping>> {
        candidates(self.song, self.scene, apply_scene)
            .filter(|mapping| {
                channel_matches(mapping.midi_channel, channel) && midi_matches(mapping, pitch)
            })
            .cloned()
            .collect()
    }
}

/// Enabled mappings in definition order, scene-filtered when asked.
fn candidates<'s>(
    song: &'s Song,
    scene: Option<&'s Scene>,
    apply_scene: bool,
) -> impl Iterator<Item = &'s Arc<InputMapping>> + 's {
    song.mappings.iter().filter(move |mapping| {
        if !mapping.enabled {
            return false;
        }
        if !apply_scene || mapping.scope == MappingScope::Global {
            return true;
        }
        scene.is_some_and(|scene| scene.mapping_ids.contains(&mapping.id))
    })
}

/// Enabled global mappings matching a keyboard value, in definition order.
pub fn match_global_keyboard<'a>(
    mappings: &'a [GlobalMapping],
    value: &str,
) -> Vec<&'a GlobalMapping> {
    let value = value.trim().to_lowercase();
    mappings
        .iter()
        .filter(|mapping| mapping.enabled && list_contains(&mapping.keyboard_value, &value))
        .collect()
}

/// Enabled global mappings matching a MIDI pitch on a channel.
pub fn match_global_midi(mappings: &[GlobalMapping], pitch: u8, channel: u8) -> Vec<&GlobalMapping> {
    mappings
        .iter()
        .filter(|mapping| {
            mapping.enabled
                && channel_matches(mapping.midi_channel, channel)
                && list_contains_pitch(&mapping.midi_value, pitch)
        })
        .collect()
}

fn channel_matches(filter: u8, channel: u8) -> bool {
    filter == 0 || filter == channel
}

/// True if the comma-separated list contains the (lowercased) value.
fn list_contains(list: &str, value: &str) -> bool {
    list.split(',')
        .map(|entry| entry.trim().to_lowercase())
        .any(|entry| !entry.is_empty() && entry == value)
}

/// True if the comma-separated list of integers contains the pitch.
/// Entries that fail to parse are skipped.
fn list_contains_pitch(list: &str, pitch: u8) -> bool {
    list.split(',')
        .filter_map(|entry| entry.trim().parse::<u8>().ok())
        .any(|entry| entry == pitch)
}

fn midi_matches(mapping: &InputMapping, pitch: u8) -> bool {
    if mapping.is_midi_range {
        mapping.midi_range_start <= pitch && pitch <= mapping.midi_range_end
    } else {
        list_contains_pitch(&mapping.midi_value, pitch)
    }
}
