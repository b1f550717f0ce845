// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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
use serde::Deserialize;

use crate::project;

use super::error::ConfigError;

fn enabled_default() -> bool {
    true
}

/// A JSON representation of an input mapping.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Mapping {
    id: String,
    #[serde(default)]
    keyboard_value: String,
    #[serde(default)]
    midi_value: String,
    /// 0 is omni.
    #[serde(default)]
    midi_channel: u8,
    #[serde(default)]
    is_midi_range: bool,
    #[serde(default)]
    midi_range_start: u8,
    #[serde(default)]
    midi_range_end: u8,
    action: Action,
    target_id: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
    #[serde(default)]
    scope: Scope,
}

impl Mapping {
    /// Converts the config mapping into a proper mapping object.
    pub(super) fn to_mapping(&self) -> Result<project::InputMapping, ConfigError> {
        Ok(project::InputMapping {
            id: self.id.clone(),
            keyboard_value: self.keyboard_value.clone(),
            midi_value: self.midi_value.clone(),
            midi_channel: parse_omni_channel(self.midi_channel)?,
            is_midi_range: self.is_midi_range,
            midi_range_start: self.midi_range_start.min(127),
            midi_range_end: self.midi_range_end.min(127),
            action: match self.action {
                Action::Preset => project::MappingAction::Preset,
                Action::Sequence => project::MappingAction::Sequence,
                Action::SwitchScene => project::MappingAction::SwitchScene,
            },
            target_id: self.target_id.clone(),
            enabled: self.enabled,
            scope: match self.scope {
                Scope::Global => project::MappingScope::Global,
                Scope::Scene => project::MappingScope::Scene,
            },
        })
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Action {
    Preset,
    Sequence,
    SwitchScene,
}

#[derive(Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Scope {
    #[default]
    Global,
    Scene,
}

/// A JSON representation of a project-wide mapping.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Global {
    id: String,
    #[serde(default)]
    keyboard_value: String,
    #[serde(default)]
    midi_value: String,
    #[serde(default)]
    midi_channel: u8,
    action: GlobalAction,
    #[serde(default)]
    action_value: Option<usize>,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

impl Global {
    /// Converts the config mapping into a proper global mapping object.
    pub(super) fn to_mapping(&self) -> Result<project::GlobalMapping, ConfigError> {
        let action = match self.action {
            GlobalAction::PrevSong => project::GlobalAction::PrevSong,
            GlobalAction::NextSong => project::GlobalAction::NextSong,
            GlobalAction::ResetSequences => project::GlobalAction::ResetSequences,
            GlobalAction::GotoSong => match self.action_value {
                Some(number) if number >= 1 => project::GlobalAction::GotoSong(number),
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "global mapping {} needs a positive actionValue",
                        self.id
                    )))
                }
            },
        };

        Ok(project::GlobalMapping {
            id: self.id.clone(),
            keyboard_value: self.keyboard_value.clone(),
            midi_value: self.midi_value.clone(),
            midi_channel: parse_omni_channel(self.midi_channel)?,
            action,
            enabled: self.enabled,
        })
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum GlobalAction {
    PrevSong,
    NextSong,
    GotoSong,
    ResetSequences,
}

/// Parses a channel filter. Input is expected to be [0, 16]; 0 is omni.
fn parse_omni_channel(channel: u8) -> Result<u8, ConfigError> {
    if channel > 16 {
        return Err(ConfigError::Invalid(format!(
            "channel {} is invalid",
            channel
        )));
    }
    Ok(channel)
}
