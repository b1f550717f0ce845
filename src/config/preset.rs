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

/// A JSON representation of a preset.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Preset {
    id: String,
    name: String,
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    glissando: Option<Glissando>,
}

impl Preset {
    /// Converts the config preset into a proper preset object.
    pub(super) fn to_preset(&self) -> Result<project::Preset, ConfigError> {
        Ok(project::Preset {
            id: self.id.clone(),
            name: self.name.clone(),
            notes: self
                .notes
                .iter()
                .map(|note| note.to_note())
                .collect::<Result<Vec<project::NoteItem>, ConfigError>>()?,
            glissando: self
                .glissando
                .as_ref()
                .map(|glissando| glissando.to_glissando())
                .transpose()?,
        })
    }
}

/// A JSON representation of a note.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Note {
    pitch: u8,
    velocity: f32,
    channel: u8,
    #[serde(default)]
    pre_delay_ms: u64,
    #[serde(default)]
    duration: Option<Duration>,
}

impl Note {
    pub(super) fn to_note(&self) -> Result<project::NoteItem, ConfigError> {
        Ok(project::NoteItem {
            pitch: parse_pitch(self.pitch)?,
            velocity: parse_velocity(self.velocity)?,
            channel: parse_channel(self.channel)?,
            pre_delay_ms: self.pre_delay_ms,
            duration: self.duration.as_ref().map(|duration| duration.to_duration()),
        })
    }
}

/// A JSON representation of a duration with its unit.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Duration {
    value: f32,
    unit: Unit,
}

impl Duration {
    pub(super) fn to_duration(&self) -> project::DurationValue {
        project::DurationValue {
            value: self.value,
            unit: self.unit.to_unit(),
        }
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Unit {
    Ms,
    Beat,
}

impl Unit {
    pub(super) fn to_unit(self) -> project::DurationUnit {
        match self {
            Unit::Ms => project::DurationUnit::Ms,
            Unit::Beat => project::DurationUnit::Beat,
        }
    }
}

/// A JSON representation of a glissando configuration.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Glissando {
    #[serde(default)]
    attack_on: bool,
    #[serde(default)]
    release_on: bool,
    lowest_pitch: u8,
    target_pitch: u8,
    step_ms: u64,
    mode: Mode,
    velocity_lo: f32,
    velocity_hi: f32,
    #[serde(default = "default_glissando_channel")]
    channel: u8,
}

fn default_glissando_channel() -> u8 {
    1
}

impl Glissando {
    fn to_glissando(&self) -> Result<project::GlissandoConfig, ConfigError> {
        Ok(project::GlissandoConfig {
            attack_on: self.attack_on,
            release_on: self.release_on,
            lowest_pitch: parse_pitch(self.lowest_pitch)?,
            target_pitch: parse_pitch(self.target_pitch)?,
            step_ms: self.step_ms,
            mode: match self.mode {
                Mode::White => project::KeyFilter::White,
                Mode::Black => project::KeyFilter::Black,
                Mode::Both => project::KeyFilter::Both,
            },
            velocity_lo: parse_velocity(self.velocity_lo)?,
            velocity_hi: parse_velocity(self.velocity_hi)?,
            channel: parse_channel(self.channel)?,
        })
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    White,
    Black,
    Both,
}

/// Parses a pitch. Input is expected to be [0, 127].
pub(super) fn parse_pitch(pitch: u8) -> Result<u8, ConfigError> {
    if pitch > 127 {
        return Err(ConfigError::Invalid(format!("pitch {} is invalid", pitch)));
    }
    Ok(pitch)
}

/// Parses a channel. Input is expected to be [1, 16].
pub(super) fn parse_channel(channel: u8) -> Result<u8, ConfigError> {
    if !(1..=16).contains(&channel) {
        return Err(ConfigError::Invalid(format!(
            "channel {} is invalid",
            channel
        )));
    }
    Ok(channel)
}

/// Parses a normalized velocity. Input is expected to be [0.0, 1.0].
pub(super) fn parse_velocity(velocity: f32) -> Result<f32, ConfigError> {
    if !(0.0..=1.0).contains(&velocity) {
        return Err(ConfigError::Invalid(format!(
            "velocity {} is invalid",
            velocity
        )));
    }
    Ok(velocity)
}
