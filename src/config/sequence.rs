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
use std::sync::Arc;

use serde::Deserialize;

use crate::project;

use super::error::ConfigError;
use super::preset::{Note, Unit};

/// A JSON representation of a sequence.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Sequence {
    id: String,
    name: String,
    mode: Mode,
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    bpm_override: Option<f32>,
    /// Editor-only: the grid the editor snaps beat positions to.
    #[serde(default, rename = "gridSnap")]
    _grid_snap: Option<f32>,
}

impl Sequence {
    /// Converts the config sequence into a proper sequence object.
    pub(super) fn to_sequence(&self) -> Result<project::Sequence, ConfigError> {
        Ok(project::Sequence {
            id: self.id.clone(),
            name: self.name.clone(),
            mode: match self.mode {
                Mode::Step => project::SequenceMode::Step,
                Mode::Auto => project::SequenceMode::Auto,
                Mode::Group => project::SequenceMode::Group,
            },
            items: self
                .items
                .iter()
                .map(|item| item.to_item().map(Arc::new))
                .collect::<Result<Vec<Arc<project::SequenceItem>>, ConfigError>>()?,
            bpm_override: self.bpm_override,
        })
    }
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    Step,
    Auto,
    Group,
}

/// A JSON representation of a sequence item.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    id: String,
    #[serde(rename = "type")]
    kind: ItemType,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    note_data: Option<Note>,
    #[serde(default)]
    beat_position: f32,
    #[serde(default)]
    override_duration: Option<f32>,
    #[serde(default)]
    override_unit: Option<Unit>,
    #[serde(default)]
    sustain_until_next: bool,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ItemType {
    Preset,
    Note,
    Sequence,
}

impl Item {
    fn to_item(&self) -> Result<project::SequenceItem, ConfigError> {
        let kind = match self.kind {
            ItemType::Preset => project::SequenceItemKind::PresetRef(self.require_target()?),
            ItemType::Sequence => project::SequenceItemKind::SequenceRef(self.require_target()?),
            ItemType::Note => match &self.note_data {
                Some(note) => project::SequenceItemKind::InlineNote(note.to_note()?),
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "sequence item {} has no noteData",
                        self.id
                    )))
                }
            },
        };

        Ok(project::SequenceItem {
            id: self.id.clone(),
            kind,
            beat_position: self.beat_position.max(0.0),
            override_duration: self.override_duration.map(|value| project::DurationValue {
                value,
                unit: self
                    .override_unit
                    .map(|unit| unit.to_unit())
                    .unwrap_or(project::DurationUnit::Ms),
            }),
            sustain_until_next: self.sustain_until_next,
        })
    }

    fn require_target(&self) -> Result<String, ConfigError> {
        self.target_id.clone().ok_or_else(|| {
            ConfigError::Invalid(format!("sequence item {} has no targetId", self.id))
        })
    }
}
